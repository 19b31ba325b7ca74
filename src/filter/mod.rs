use crate::extract::UNKNOWN_LOCATION;
use crate::models::Listing;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Price-range predicate with inclusive bounds.
///
/// An unknown price never passes: a listing we cannot price is not worth an
/// alert, and guessing would break the filter's determinism.
pub fn passes_price(listing: &Listing, rent_min: i64, rent_max: i64) -> bool {
    match listing.price {
        Some(price) => price >= rent_min && price <= rent_max,
        None => false,
    }
}

/// Enforces a minimum interval between calls, process-wide.
///
/// Callers serialize on the internal lock, so concurrent workers cannot
/// squeeze two calls inside one interval.
pub struct Pacer {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Wait until the interval since the previous call has elapsed, then
    /// claim the current slot.
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeHit {
    display_name: String,
}

/// Best-effort geographic validation through a Nominatim-style geocoder.
///
/// The unknown-location sentinel passes (benefit of the doubt); a location
/// that geocodes outside the target region fails; a geocoding transport
/// failure fails closed instead of crashing the run.
pub struct RegionChecker {
    client: Client,
    endpoint: String,
    region: String,
    pacer: Pacer,
}

/// Nominatim's usage policy caps at one request per second
const GEOCODE_MIN_INTERVAL: Duration = Duration::from_secs(1);

impl RegionChecker {
    pub fn new(region: String, timeout: Duration) -> Result<Self> {
        Self::with_endpoint(
            region,
            timeout,
            "https://nominatim.openstreetmap.org/search".to_string(),
        )
    }

    pub fn with_endpoint(region: String, timeout: Duration, endpoint: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("rental-scout/0.1")
            .build()
            .context("Failed to create geocoding client")?;

        Ok(Self {
            client,
            endpoint,
            region: region.to_lowercase(),
            pacer: Pacer::new(GEOCODE_MIN_INTERVAL),
        })
    }

    pub async fn is_in_region(&self, location: &str) -> bool {
        if location == UNKNOWN_LOCATION {
            return true;
        }

        self.pacer.wait().await;

        match self.lookup(location).await {
            Ok(hits) => {
                let matched = hits
                    .iter()
                    .any(|hit| hit.display_name.to_lowercase().contains(&self.region));
                debug!(location, matched, "Geocoded location");
                matched
            }
            Err(err) => {
                // Fail closed: an unreachable geocoder must not let
                // out-of-region listings through
                warn!(location, error = %err, "Geocoding failed, rejecting location");
                false
            }
        }
    }

    async fn lookup(&self, location: &str) -> Result<Vec<GeocodeHit>> {
        let url = Url::parse_with_params(
            &self.endpoint,
            &[("q", location), ("format", "json"), ("limit", "3")],
        )
        .context("Invalid geocoding endpoint")?;

        let body = self
            .client
            .get(url)
            .send()
            .await
            .context("Geocoding request failed")?
            .error_for_status()
            .context("Geocoder returned an error status")?
            .text()
            .await
            .context("Could not read geocoder response")?;

        let hits: Vec<GeocodeHit> = serde_json::from_str(&body)
            .with_context(|| format!("Could not decode geocoder response: {body:.120}"))?;
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Listing;

    fn listing(price: Option<i64>) -> Listing {
        Listing::new(
            "Testwoning".to_string(),
            price,
            "Utrecht".to_string(),
            "https://voorbeeld.nl/w/1".to_string(),
            "voorbeeld.nl".to_string(),
        )
    }

    #[test]
    fn bounds_are_inclusive() {
        assert!(passes_price(&listing(Some(1000)), 1000, 1250));
        assert!(passes_price(&listing(Some(1250)), 1000, 1250));
        assert!(passes_price(&listing(Some(1100)), 1000, 1250));
    }

    #[test]
    fn one_unit_outside_either_bound_fails() {
        assert!(!passes_price(&listing(Some(999)), 1000, 1250));
        assert!(!passes_price(&listing(Some(1251)), 1000, 1250));
    }

    #[test]
    fn unknown_price_never_passes() {
        assert!(!passes_price(&listing(None), 0, i64::MAX));
    }

    #[tokio::test]
    async fn unknown_location_passes_without_geocoding() {
        // Endpoint is unroutable on purpose: the sentinel short-circuits
        // before any network call
        let checker = RegionChecker::with_endpoint(
            "Utrecht".to_string(),
            Duration::from_millis(10),
            "http://127.0.0.1:1/search".to_string(),
        )
        .unwrap();
        assert!(checker.is_in_region(UNKNOWN_LOCATION).await);
    }

    #[tokio::test]
    async fn geocoder_failure_fails_closed() {
        let checker = RegionChecker::with_endpoint(
            "Utrecht".to_string(),
            Duration::from_millis(50),
            "http://127.0.0.1:1/search".to_string(),
        )
        .unwrap();
        assert!(!checker.is_in_region("Lombok, Utrecht").await);
    }

    #[tokio::test]
    async fn pacer_spaces_out_consecutive_calls() {
        let pacer = Pacer::new(Duration::from_millis(30));
        let start = Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
