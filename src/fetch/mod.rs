pub mod user_agent;

pub use user_agent::UserAgentPool;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure modes of a single page fetch
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection-level failure that survived the whole retry budget
    #[error("could not reach {url} after {attempts} attempt(s): {source}")]
    Transient {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    /// 404 or 410: the page is gone and retrying is pointless
    #[error("page gone ({status}): {url}")]
    Gone { url: String, status: u16 },
    /// Any other non-success HTTP status; not retried
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },
}

/// Explicit retry configuration for connection-level failures.
///
/// HTTP error statuses are never retried; only failures to establish or
/// complete the connection count against `max_attempts`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (zero-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// Seam between the pipeline and the network
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch a page body, retrying transient failures per the policy.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// The sole HTTP boundary of the scraper
pub struct HttpFetcher {
    client: Client,
    policy: RetryPolicy,
    agents: UserAgentPool,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            policy,
            agents: UserAgentPool::default(),
        })
    }

    pub fn with_user_agents(mut self, agents: UserAgentPool) -> Self {
        self.agents = agents;
        self
    }

    fn is_retryable(err: &reqwest::Error) -> bool {
        err.is_connect() || err.is_timeout()
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            // Rotate the client identity on every request, retries included
            let result = self
                .client
                .get(url)
                .header(USER_AGENT, self.agents.next())
                .send()
                .await;

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    attempt += 1;
                    if Self::is_retryable(&err) && attempt < self.policy.max_attempts {
                        let delay = self.policy.delay_for(attempt - 1);
                        warn!(url, attempt, "Connection failed, retrying in {:?}", delay);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(FetchError::Transient {
                        url: url.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }
            };

            let status = response.status();
            if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
                return Err(FetchError::Gone {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let body = response.text().await.map_err(|err| FetchError::Transient {
                url: url.to_string(),
                attempts: attempt + 1,
                source: err,
            })?;

            debug!(url, bytes = body.len(), "Fetched page");
            return Ok(body);
        }
    }
}
