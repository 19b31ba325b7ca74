use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Search engine a candidate link was discovered through
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Engine {
    Google,
    Bing,
    DuckDuckGo,
}

impl Engine {
    pub fn name(&self) -> &'static str {
        match self {
            Engine::Google => "google",
            Engine::Bing => "bing",
            Engine::DuckDuckGo => "duckduckgo",
        }
    }
}

/// A URL discovered on a search-results page, not yet confirmed to hold a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateLink {
    pub url: String,
    pub engine: Engine,
    pub query: String,
}

/// Core rental listing model
///
/// `link` is the identity of a listing: the persistent store keys on it and
/// the at-most-once notification guarantee is defined per link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub title: String,
    /// Monthly rent in whole euros. `None` means the price could not be read
    /// from the page, which is distinct from zero.
    pub price: Option<i64>,
    pub location: String,
    pub link: String,
    /// Site the listing was scraped from
    pub source: String,
    pub notified: bool,
    pub seen_at: DateTime<Utc>,
}

impl Listing {
    pub fn new(
        title: String,
        price: Option<i64>,
        location: String,
        link: String,
        source: String,
    ) -> Self {
        Self {
            title,
            price,
            location,
            link,
            source,
            notified: false,
            seen_at: Utc::now(),
        }
    }
}
