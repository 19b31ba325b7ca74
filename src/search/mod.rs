use crate::models::{CandidateLink, Engine};
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

/// Result count requested per engine query
pub const RESULTS_PER_QUERY: usize = 20;

/// Default query templates, expanded with the configured city and rent bounds
pub const DEFAULT_QUERY_TEMPLATES: &[&str] = &[
    "huurwoningen in {city} tussen {min} en {max} euro",
    "appartement huren {city} tussen {min} en {max} euro",
    "woning huren {city} goedkoop",
];

/// Extraction rule for one search engine's results page.
///
/// Adding an engine is a new table entry, not a new conditional branch.
struct EngineRule {
    engine: Engine,
    /// CSS selector for one organic result block
    container: &'static str,
    /// CSS selector for the result anchor within a block
    anchor: &'static str,
}

const ENGINE_RULES: &[EngineRule] = &[
    EngineRule {
        engine: Engine::Google,
        container: "div.g",
        anchor: "a",
    },
    EngineRule {
        engine: Engine::Bing,
        container: "li.b_algo",
        anchor: "a",
    },
    EngineRule {
        engine: Engine::DuckDuckGo,
        container: "div.result",
        anchor: "a.result__a",
    },
];

/// Engines queried on every run
pub const ENGINES: &[Engine] = &[Engine::Google, Engine::Bing, Engine::DuckDuckGo];

/// Build the results-page URL for a query against one engine.
pub fn search_url(engine: Engine, query: &str, num_results: usize) -> String {
    let count = num_results.to_string();
    let url = match engine {
        Engine::Google => Url::parse_with_params(
            "https://www.google.com/search",
            &[("q", query), ("num", count.as_str())],
        ),
        Engine::Bing => Url::parse_with_params(
            "https://www.bing.com/search",
            &[("q", query), ("count", count.as_str())],
        ),
        Engine::DuckDuckGo => {
            Url::parse_with_params("https://duckduckgo.com/html", &[("q", query)])
        }
    };
    // The base URLs are fixed literals, parsing cannot fail
    url.unwrap().to_string()
}

/// Expand query templates against the configured city and rent bounds.
///
/// Custom templates replace the defaults entirely when given; both support
/// the `{city}`, `{min}` and `{max}` placeholders.
pub fn build_queries(city: &str, rent_min: i64, rent_max: i64, custom: &[String]) -> Vec<String> {
    let templates: Vec<String> = if custom.is_empty() {
        DEFAULT_QUERY_TEMPLATES.iter().map(|t| t.to_string()).collect()
    } else {
        custom.to_vec()
    };

    templates
        .iter()
        .map(|template| {
            template
                .replace("{city}", city)
                .replace("{min}", &rent_min.to_string())
                .replace("{max}", &rent_max.to_string())
        })
        .collect()
}

/// Extract candidate links from a search-results page.
///
/// Engines without a matching rule yield an empty sequence; a malformed page
/// does the same. Only http(s) hrefs are kept.
pub fn extract_results(html: &str, engine: Engine, query: &str) -> Vec<CandidateLink> {
    let rule = match ENGINE_RULES.iter().find(|r| r.engine == engine) {
        Some(rule) => rule,
        None => return Vec::new(),
    };

    let document = Html::parse_document(html);
    let container = Selector::parse(rule.container).unwrap();
    let anchor = Selector::parse(rule.anchor).unwrap();

    let mut results = Vec::new();
    for block in document.select(&container) {
        if let Some(a) = block.select(&anchor).next() {
            if let Some(href) = a.value().attr("href") {
                if href.starts_with("http://") || href.starts_with("https://") {
                    results.push(CandidateLink {
                        url: href.to_string(),
                        engine,
                        query: query.to_string(),
                    });
                }
            }
        }
    }

    debug!(
        engine = engine.name(),
        query,
        found = results.len(),
        "Extracted search results"
    );
    results
}
