use crate::extract;
use crate::fetch::{Fetch, FetchError};
use crate::filter::{passes_price, Pacer, RegionChecker};
use crate::models::CandidateLink;
use crate::notify::{Delivery, Notifier};
use crate::search::{self, RESULTS_PER_QUERY};
use crate::store::{ListingStore, StoreError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Run parameters for the orchestrator
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub city: String,
    pub rent_min: i64,
    pub rent_max: i64,
    /// Extra query templates; empty means the built-in Dutch defaults
    pub custom_queries: Vec<String>,
    /// Bound on concurrently processed sites
    pub concurrency: usize,
    /// Run-level deadline: no new site starts after it elapses
    pub deadline: Option<Duration>,
    /// Best-effort spacing between search-engine queries
    pub search_delay: Duration,
}

/// What happened during one run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub candidates: usize,
    pub sites_processed: usize,
    pub listings_extracted: usize,
    pub notified: usize,
    pub already_notified: usize,
    pub failures: usize,
}

#[derive(Default)]
struct Counters {
    sites_processed: AtomicUsize,
    listings_extracted: AtomicUsize,
    notified: AtomicUsize,
    already_notified: AtomicUsize,
    failures: AtomicUsize,
}

impl Counters {
    fn bump(field: &AtomicUsize) {
        field.fetch_add(1, Ordering::Relaxed);
    }
}

/// Claim a URL in the in-run processed set. Test-and-set: the first caller
/// gets `true` and owns the URL for the rest of the run.
async fn claim(processed: &Mutex<HashSet<String>>, url: &str) -> bool {
    processed.lock().await.insert(url.to_string())
}

/// Drives one full pass: query generation, candidate aggregation across
/// engines, then independent per-site extraction, filtering, dedup and
/// notification. No failure below the run level aborts the run.
pub struct Pipeline {
    config: PipelineConfig,
    fetcher: Arc<dyn Fetch>,
    store: Arc<dyn ListingStore>,
    notifier: Arc<Notifier>,
    region: Option<Arc<RegionChecker>>,
    search_pacer: Pacer,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        fetcher: Arc<dyn Fetch>,
        store: Arc<dyn ListingStore>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let search_pacer = Pacer::new(config.search_delay);
        Self {
            config,
            fetcher,
            store,
            notifier,
            region: None,
            search_pacer,
        }
    }

    /// Enable best-effort geographic validation of listing locations.
    pub fn with_region_checker(mut self, checker: Arc<RegionChecker>) -> Self {
        self.region = Some(checker);
        self
    }

    pub async fn run(self: &Arc<Self>) -> RunStats {
        let start = Instant::now();
        let queries =
            search::build_queries(
                &self.config.city,
                self.config.rent_min,
                self.config.rent_max,
                &self.config.custom_queries,
            );
        info!(
            city = %self.config.city,
            rent_min = self.config.rent_min,
            rent_max = self.config.rent_max,
            queries = queries.len(),
            "Starting pipeline run"
        );

        // Owned by this run; workers share it for claim-before-fetch
        let processed = Arc::new(Mutex::new(HashSet::new()));
        let counters = Arc::new(Counters::default());

        let candidates = self.aggregate_candidates(&queries).await;
        let mut sites = Vec::new();
        for candidate in candidates {
            if claim(&processed, &candidate.url).await {
                sites.push(candidate);
            }
        }
        let candidate_count = sites.len();
        info!(candidates = candidate_count, "Aggregated candidate sites");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for candidate in sites {
            if let Some(deadline) = self.config.deadline {
                if start.elapsed() >= deadline {
                    info!(url = %candidate.url, "Run deadline reached, not starting remaining sites");
                    break;
                }
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let this = Arc::clone(self);
            let processed = Arc::clone(&processed);
            let counters = Arc::clone(&counters);
            tasks.spawn(async move {
                let _permit = permit;
                this.process_site(&candidate, &processed, &counters).await;
            });
        }
        while tasks.join_next().await.is_some() {}

        let stats = RunStats {
            candidates: candidate_count,
            sites_processed: counters.sites_processed.load(Ordering::Relaxed),
            listings_extracted: counters.listings_extracted.load(Ordering::Relaxed),
            notified: counters.notified.load(Ordering::Relaxed),
            already_notified: counters.already_notified.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        };
        info!(
            notified = stats.notified,
            sites = stats.sites_processed,
            elapsed = ?start.elapsed(),
            "Pipeline run finished"
        );
        stats
    }

    /// Fan every query out across all engines and collect candidate links.
    /// A failed search query costs only its own results.
    async fn aggregate_candidates(&self, queries: &[String]) -> Vec<CandidateLink> {
        let mut candidates = Vec::new();
        for query in queries {
            for &engine in search::ENGINES {
                self.search_pacer.wait().await;
                let url = search::search_url(engine, query, RESULTS_PER_QUERY);
                match self.fetcher.fetch(&url).await {
                    Ok(html) => {
                        candidates.extend(search::extract_results(&html, engine, query));
                    }
                    Err(err) => {
                        warn!(
                            engine = engine.name(),
                            query = %query,
                            stage = "search",
                            error = %err,
                            "Search query failed"
                        );
                    }
                }
            }
        }
        candidates
    }

    /// exists + notified together decide the skip: a stored record that was
    /// never notified still goes through persist and notify, which covers a
    /// prior run that crashed between the two.
    async fn dedup_gate(&self, link: &str) -> Result<bool, StoreError> {
        Ok(self.store.exists(link).await? && self.store.is_notified(link).await?)
    }

    async fn process_site(
        &self,
        candidate: &CandidateLink,
        processed: &Mutex<HashSet<String>>,
        counters: &Counters,
    ) {
        let url = candidate.url.as_str();
        debug!(url, engine = candidate.engine.name(), "Processing site");
        Counters::bump(&counters.sites_processed);

        let html = match self.fetcher.fetch(url).await {
            Ok(html) => html,
            Err(FetchError::Gone { status, .. }) => {
                info!(url, status, stage = "fetch", "Page gone, skipping site");
                return;
            }
            Err(err) => {
                warn!(url, stage = "fetch", error = %err, "Fetch failed, skipping site");
                Counters::bump(&counters.failures);
                return;
            }
        };

        for record in extract::extract_listings(&html, url) {
            let listing = match record {
                Ok(listing) => listing,
                Err(err) => {
                    warn!(url, stage = "extract", error = %err, "Skipping malformed listing");
                    Counters::bump(&counters.failures);
                    continue;
                }
            };
            Counters::bump(&counters.listings_extracted);

            if !passes_price(&listing, self.config.rent_min, self.config.rent_max) {
                debug!(link = %listing.link, price = ?listing.price, "Rejected by price filter");
                continue;
            }

            if let Some(region) = &self.region {
                if !region.is_in_region(&listing.location).await {
                    info!(
                        link = %listing.link,
                        location = %listing.location,
                        "Outside target region"
                    );
                    continue;
                }
            }

            // The same listing may surface through several sites or queries
            // within one run
            if !claim(processed, &listing.link).await {
                debug!(link = %listing.link, "Already handled in this run");
                continue;
            }

            match self.dedup_gate(&listing.link).await {
                Ok(true) => {
                    debug!(link = %listing.link, "Already notified, skipping");
                    Counters::bump(&counters.already_notified);
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(link = %listing.link, stage = "dedup", error = %err, "Store check failed");
                    Counters::bump(&counters.failures);
                    continue;
                }
            }

            if let Err(err) = self.store.upsert(&listing).await {
                warn!(link = %listing.link, stage = "persist", error = %err, "Failed to persist listing");
                Counters::bump(&counters.failures);
                continue;
            }

            match self.notifier.notify(self.store.as_ref(), &listing).await {
                Ok(Delivery::Delivered) => Counters::bump(&counters.notified),
                Ok(Delivery::Skipped) => Counters::bump(&counters.already_notified),
                Err(err) => {
                    // Retried naturally on a later run through the dedup gate
                    warn!(link = %listing.link, stage = "notify", error = %err, "Notification failed");
                    Counters::bump(&counters.failures);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Engine;
    use crate::notify::testing::CountingTransport;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    const SITE_URL: &str = "https://www.pararius.nl/huurwoningen/utrecht";
    const LISTING_LINK: &str = "https://www.pararius.nl/huurwoning/utrecht/123";

    const SITE_PAGE: &str = r#"
        <section class="listing-search-item">
            <a class="listing-search-item__link--title" href="/huurwoning/utrecht/123">
                Woning aan de gracht
            </a>
            <div class="listing-search-item__price">&euro; 1.250 p/m</div>
            <div class="listing-search-item__location">Wittevrouwen, Utrecht</div>
        </section>
    "#;

    /// Fetch backed by canned pages; anything absent is a server error and
    /// URLs in `gone` answer like a deleted page.
    struct MapFetcher {
        pages: HashMap<String, String>,
        gone: HashSet<String>,
    }

    #[async_trait]
    impl Fetch for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            if self.gone.contains(url) {
                return Err(FetchError::Gone {
                    url: url.to_string(),
                    status: 410,
                });
            }
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    url: url.to_string(),
                    status: 503,
                })
        }
    }

    fn search_page(site_urls: &[&str]) -> String {
        let blocks: String = site_urls
            .iter()
            .map(|url| format!(r#"<div class="g"><a href="{url}">resultaat</a></div>"#))
            .collect();
        format!("<html><body>{blocks}</body></html>")
    }

    struct Harness {
        pipeline: Arc<Pipeline>,
        store: Arc<MemoryStore>,
        transport: Arc<CountingTransport>,
    }

    fn harness(fetcher: MapFetcher, rent_min: i64, rent_max: i64) -> Harness {
        harness_with_store(fetcher, rent_min, rent_max, Arc::new(MemoryStore::new()))
    }

    fn harness_with_store(
        fetcher: MapFetcher,
        rent_min: i64,
        rent_max: i64,
        store: Arc<MemoryStore>,
    ) -> Harness {
        let transport = Arc::new(CountingTransport::new());
        let notifier = Arc::new(Notifier::new(transport.clone()));
        let config = PipelineConfig {
            city: "Utrecht".to_string(),
            rent_min,
            rent_max,
            custom_queries: vec!["woning {city}".to_string()],
            concurrency: 2,
            deadline: None,
            search_delay: Duration::ZERO,
        };
        let pipeline = Arc::new(Pipeline::new(
            config,
            Arc::new(fetcher),
            store.clone(),
            notifier,
        ));
        Harness {
            pipeline,
            store,
            transport,
        }
    }

    fn google_search_url() -> String {
        search::search_url(Engine::Google, "woning Utrecht", RESULTS_PER_QUERY)
    }

    fn single_site_fetcher() -> MapFetcher {
        let mut pages = HashMap::new();
        pages.insert(google_search_url(), search_page(&[SITE_URL]));
        pages.insert(SITE_URL.to_string(), SITE_PAGE.to_string());
        MapFetcher {
            pages,
            gone: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn discovers_persists_and_notifies_a_new_listing() {
        let h = harness(single_site_fetcher(), 1000, 1250);

        let stats = h.pipeline.run().await;

        assert_eq!(stats.notified, 1);
        assert_eq!(h.transport.sent_count(), 1);
        let stored = h.store.get(LISTING_LINK).await.unwrap();
        assert_eq!(stored.price, Some(1250));
        assert!(stored.notified);
    }

    #[tokio::test]
    async fn two_sequential_runs_notify_at_most_once() {
        let h = harness(single_site_fetcher(), 1000, 1250);

        let first = h.pipeline.run().await;
        let second = h.pipeline.run().await;

        assert_eq!(first.notified, 1);
        assert_eq!(second.notified, 0);
        assert_eq!(second.already_notified, 1);
        assert_eq!(h.transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn stored_but_unnotified_listing_is_notified_on_the_next_run() {
        let store = Arc::new(MemoryStore::new());
        // A previous run persisted the listing and crashed before notifying
        let listing = crate::models::Listing::new(
            "Woning aan de gracht".to_string(),
            Some(1250),
            "Wittevrouwen, Utrecht".to_string(),
            LISTING_LINK.to_string(),
            "www.pararius.nl".to_string(),
        );
        store.upsert(&listing).await.unwrap();

        let h = harness_with_store(single_site_fetcher(), 1000, 1250, store);
        let stats = h.pipeline.run().await;

        assert_eq!(stats.notified, 1);
        assert_eq!(h.transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn price_outside_bounds_is_neither_stored_nor_notified() {
        let h = harness(single_site_fetcher(), 1000, 1200);

        let stats = h.pipeline.run().await;

        assert_eq!(stats.notified, 0);
        assert_eq!(stats.listings_extracted, 1);
        assert_eq!(h.transport.sent_count(), 0);
        assert!(!h.store.exists(LISTING_LINK).await.unwrap());
    }

    #[tokio::test]
    async fn a_gone_page_does_not_stop_other_sites() {
        let gone_url = "https://www.pararius.nl/huurwoningen/weg";
        let mut pages = HashMap::new();
        pages.insert(google_search_url(), search_page(&[gone_url, SITE_URL]));
        pages.insert(SITE_URL.to_string(), SITE_PAGE.to_string());
        let fetcher = MapFetcher {
            pages,
            gone: HashSet::from([gone_url.to_string()]),
        };

        let h = harness(fetcher, 1000, 1250);
        let stats = h.pipeline.run().await;

        assert_eq!(stats.candidates, 2);
        assert_eq!(stats.notified, 1);
        assert_eq!(h.transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_candidates_are_claimed_once_per_run() {
        // The same site surfaces under several engines/queries; only one
        // worker may fetch it
        let mut pages = HashMap::new();
        pages.insert(google_search_url(), search_page(&[SITE_URL, SITE_URL]));
        pages.insert(SITE_URL.to_string(), SITE_PAGE.to_string());
        let fetcher = MapFetcher {
            pages,
            gone: HashSet::new(),
        };

        let h = harness(fetcher, 1000, 1250);
        let stats = h.pipeline.run().await;

        assert_eq!(stats.candidates, 1);
        assert_eq!(stats.sites_processed, 1);
    }

    #[tokio::test]
    async fn elapsed_deadline_stops_new_sites() {
        let h = harness(single_site_fetcher(), 1000, 1250);
        let mut config = h.pipeline.config.clone();
        config.deadline = Some(Duration::ZERO);
        let pipeline = Arc::new(Pipeline::new(
            config,
            Arc::new(single_site_fetcher()),
            h.store.clone(),
            Arc::new(Notifier::new(h.transport.clone())),
        ));

        let stats = pipeline.run().await;

        assert_eq!(stats.candidates, 1);
        assert_eq!(stats.sites_processed, 0);
        assert_eq!(h.transport.sent_count(), 0);
    }
}
