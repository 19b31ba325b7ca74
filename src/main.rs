mod config;
mod extract;
mod fetch;
mod filter;
mod models;
mod notify;
mod pipeline;
mod search;
mod store;

use clap::Parser;
use config::Args;
use fetch::{HttpFetcher, RetryPolicy};
use filter::RegionChecker;
use notify::{Notifier, TwilioConfig, TwilioWhatsApp};
use pipeline::Pipeline;
use std::sync::Arc;
use store::SqliteStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    args.validate()?;

    info!("🏠 Rental Scout");

    // Missing transport credentials abort here, before any site processing
    let twilio = TwilioConfig::from_env()?;
    let transport = Arc::new(TwilioWhatsApp::new(twilio, args.timeout())?);
    let notifier = Arc::new(Notifier::new(transport));

    let store = Arc::new(SqliteStore::open(&args.database).await?);
    let fetcher = Arc::new(HttpFetcher::new(args.timeout(), RetryPolicy::default())?);

    let mut pipeline = Pipeline::new(args.pipeline_config(), fetcher, store, notifier);
    if args.region_check {
        let checker = RegionChecker::new(args.city.clone(), args.timeout())?;
        pipeline = pipeline.with_region_checker(Arc::new(checker));
    }

    let stats = Arc::new(pipeline).run().await;

    info!(
        "✅ {} new listing(s) notified ({} candidate sites, {} failures)",
        stats.notified, stats.candidates, stats.failures
    );

    Ok(())
}
