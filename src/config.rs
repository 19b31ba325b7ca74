use crate::pipeline::PipelineConfig;
use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line surface of the scout.
///
/// Twilio credentials are not flags; they come from the environment (or a
/// `.env` file) so they stay out of shell history.
#[derive(Debug, Parser)]
#[command(
    name = "rental-scout",
    about = "Finds new rental listings via web search and alerts once per listing"
)]
pub struct Args {
    /// City to search in
    #[arg(long)]
    pub city: String,

    /// Minimum monthly rent in euros, inclusive
    #[arg(long)]
    pub rent_min: i64,

    /// Maximum monthly rent in euros, inclusive
    #[arg(long)]
    pub rent_max: i64,

    /// Extra query template with {city}, {min} and {max} placeholders;
    /// repeatable, replaces the built-in templates
    #[arg(long = "query")]
    pub queries: Vec<String>,

    /// SQLite database holding every listing ever seen
    #[arg(long, default_value = "rental_scout.db")]
    pub database: PathBuf,

    /// Number of sites processed concurrently
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Run deadline in seconds; no new site is started after it elapses
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Geocode listing locations and drop those outside the city
    #[arg(long)]
    pub region_check: bool,

    /// Seconds between search-engine queries
    #[arg(long, default_value_t = 2)]
    pub search_delay: u64,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.rent_min < 0 {
            bail!("minimum rent cannot be negative");
        }
        if self.rent_min > self.rent_max {
            bail!(
                "minimum rent ({}) cannot exceed maximum rent ({})",
                self.rent_min,
                self.rent_max
            );
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            city: self.city.clone(),
            rent_min: self.rent_min,
            rent_max: self.rent_max,
            custom_queries: self.queries.clone(),
            concurrency: self.concurrency,
            deadline: self.deadline.map(Duration::from_secs),
            search_delay: Duration::from_secs(self.search_delay),
        }
    }
}
