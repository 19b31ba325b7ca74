use crate::models::Listing;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Sentinel stored when a listing carries no location element
pub const UNKNOWN_LOCATION: &str = "Locatie onbekend";

/// Extraction failure for a single listing block.
///
/// Callers log and drop the one listing; the rest of the page continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("listing without link element on {source_url}")]
    MissingLink { source_url: String },
    #[error("listing without title on {source_url}")]
    MissingTitle { source_url: String },
}

/// Selector schema for one listing site.
///
/// Adding a site means adding a table entry; `host` is matched as a suffix
/// of the page's host, and a `None` host acts as the fallback schema tried
/// against sites discovered via search.
pub struct SiteRule {
    pub host: Option<&'static str>,
    /// One listing block on the page
    pub listing: &'static str,
    pub title: &'static str,
    pub price: &'static str,
    pub location: &'static str,
    pub link: &'static str,
}

pub const SITE_RULES: &[SiteRule] = &[
    SiteRule {
        host: Some("pararius.nl"),
        listing: "section.listing-search-item",
        title: "a.listing-search-item__link--title",
        price: "div.listing-search-item__price",
        location: "div.listing-search-item__location",
        link: "a.listing-search-item__link--title",
    },
    SiteRule {
        host: Some("pararius.com"),
        listing: "section.listing-search-item",
        title: "a.listing-search-item__link--title",
        price: "div.listing-search-item__price",
        location: "div.listing-search-item__location",
        link: "a.listing-search-item__link--title",
    },
    // Fallback schema for sites reached through search results; pages that
    // don't use this markup simply produce no listing blocks.
    SiteRule {
        host: None,
        listing: "section.listing-search-item",
        title: "a.listing-search-item__link--title",
        price: "div.listing-search-item__price",
        location: "div.listing-search-item__location",
        link: "a.listing-search-item__link--title",
    },
];

/// Pick the extraction rule for a page URL.
fn rule_for(source_url: &str) -> Option<&'static SiteRule> {
    let host = Url::parse(source_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()));

    SITE_RULES.iter().find(|rule| match (rule.host, &host) {
        (Some(suffix), Some(host)) => host.ends_with(suffix),
        (Some(_), None) => false,
        (None, _) => true,
    })
}

/// Normalize a raw price text to whole euros.
///
/// Strips every non-digit character and parses the remainder, so
/// "€ 1.250 p/m" becomes 1250. No digits (or an unparseable remainder)
/// means the price is unknown, which is a value, not an error.
pub fn clean_price(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Resolve a listing href against the page it was found on.
///
/// Absolute hrefs are used verbatim; relative ones are joined onto the
/// page's origin with exactly one slash between them.
pub fn resolve_link(href: &str, source_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    let origin = match Url::parse(source_url) {
        Ok(url) => url.origin().ascii_serialization(),
        Err(_) => source_url.to_string(),
    };
    format!(
        "{}/{}",
        origin.trim_end_matches('/'),
        href.trim_start_matches('/')
    )
}

/// Site/domain name a listing is attributed to.
pub fn source_name(source_url: &str) -> String {
    Url::parse(source_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| source_url.to_string())
}

fn select_text(block: &ElementRef, selector: &Selector) -> Option<String> {
    block
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

/// Extract listing records from one page.
///
/// Each listing block parses independently: a block missing its link or
/// title yields an `Err` entry the caller logs and skips, without touching
/// the other blocks. A page whose markup matches no rule yields nothing.
pub fn extract_listings(html: &str, source_url: &str) -> Vec<Result<Listing, ExtractError>> {
    let rule = match rule_for(source_url) {
        Some(rule) => rule,
        None => return Vec::new(),
    };

    let document = Html::parse_document(html);
    let listing_sel = Selector::parse(rule.listing).unwrap();
    let title_sel = Selector::parse(rule.title).unwrap();
    let price_sel = Selector::parse(rule.price).unwrap();
    let location_sel = Selector::parse(rule.location).unwrap();
    let link_sel = Selector::parse(rule.link).unwrap();

    let source = source_name(source_url);
    let mut records = Vec::new();

    for block in document.select(&listing_sel) {
        let title = match select_text(&block, &title_sel) {
            Some(title) if !title.is_empty() => title,
            _ => {
                records.push(Err(ExtractError::MissingTitle {
                    source_url: source_url.to_string(),
                }));
                continue;
            }
        };

        let price = select_text(&block, &price_sel)
            .as_deref()
            .and_then(clean_price);

        let location = select_text(&block, &location_sel)
            .filter(|loc| !loc.is_empty())
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());

        let href = block
            .select(&link_sel)
            .next()
            .and_then(|el| el.value().attr("href"));
        let link = match href {
            Some(href) => resolve_link(href, source_url),
            None => {
                records.push(Err(ExtractError::MissingLink {
                    source_url: source_url.to_string(),
                }));
                continue;
            }
        };

        records.push(Ok(Listing::new(
            title,
            price,
            location,
            link,
            source.clone(),
        )));
    }

    debug!(
        source_url,
        listings = records.len(),
        "Extracted listing blocks"
    );
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <section class="listing-search-item">
            <a class="listing-search-item__link--title" href="/huurwoning/utrecht/123">
                Ruime woning aan de gracht
            </a>
            <div class="listing-search-item__price">&euro; 1.250 p/m</div>
            <div class="listing-search-item__location">Wittevrouwen, Utrecht</div>
        </section>
        <section class="listing-search-item">
            <a class="listing-search-item__link--title" href="https://www.pararius.nl/huurwoning/utrecht/456">
                Studio bij het station
            </a>
            <div class="listing-search-item__price">Prijs op aanvraag</div>
        </section>
        </body></html>
    "#;

    #[test]
    fn extracts_listings_with_pararius_schema() {
        let records = extract_listings(PAGE, "https://www.pararius.nl/huurwoningen/utrecht");
        assert_eq!(records.len(), 2);

        let first = records[0].as_ref().unwrap();
        assert_eq!(first.title, "Ruime woning aan de gracht");
        assert_eq!(first.price, Some(1250));
        assert_eq!(first.location, "Wittevrouwen, Utrecht");
        assert_eq!(
            first.link,
            "https://www.pararius.nl/huurwoning/utrecht/123"
        );
        assert_eq!(first.source, "www.pararius.nl");
        assert!(!first.notified);
    }

    #[test]
    fn missing_price_and_location_become_unknowns() {
        let records = extract_listings(PAGE, "https://www.pararius.nl/huurwoningen/utrecht");
        let second = records[1].as_ref().unwrap();
        assert_eq!(second.price, None);
        assert_eq!(second.location, UNKNOWN_LOCATION);
        assert_eq!(
            second.link,
            "https://www.pararius.nl/huurwoning/utrecht/456"
        );
    }

    #[test]
    fn missing_link_is_an_error_for_that_listing_only() {
        let html = r#"
            <section class="listing-search-item">
                <span class="listing-search-item__link--title">geen anchor</span>
            </section>
            <section class="listing-search-item">
                <a class="listing-search-item__link--title" href="/w/1">Woning</a>
                <div class="listing-search-item__price">€ 900</div>
            </section>
        "#;
        let records = extract_listings(html, "https://voorbeeld.nl/huur");
        assert_eq!(records.len(), 2);
        assert!(matches!(
            records[0],
            Err(ExtractError::MissingTitle { .. }) | Err(ExtractError::MissingLink { .. })
        ));
        assert!(records[1].is_ok());
    }

    #[test]
    fn page_without_listing_markup_yields_nothing() {
        let records = extract_listings("<html><p>niets</p></html>", "https://elders.nl/");
        assert!(records.is_empty());
    }

    #[test]
    fn clean_price_strips_everything_but_digits() {
        assert_eq!(clean_price("€ 1.250 p/m"), Some(1250));
        assert_eq!(clean_price("1500"), Some(1500));
        assert_eq!(clean_price("€2.100,-"), Some(2100));
    }

    #[test]
    fn clean_price_without_digits_is_unknown() {
        assert_eq!(clean_price("Prijs op aanvraag"), None);
        assert_eq!(clean_price(""), None);
    }

    #[test]
    fn absolute_hrefs_are_kept_verbatim() {
        assert_eq!(
            resolve_link("https://a.nl/w/1", "https://b.nl/lijst"),
            "https://a.nl/w/1"
        );
    }

    #[test]
    fn relative_hrefs_join_the_origin_with_one_slash() {
        assert_eq!(
            resolve_link("/huurwoning/9", "https://www.pararius.nl/lijst/utrecht"),
            "https://www.pararius.nl/huurwoning/9"
        );
        assert_eq!(
            resolve_link("huurwoning/9", "https://www.pararius.nl"),
            "https://www.pararius.nl/huurwoning/9"
        );
    }
}
