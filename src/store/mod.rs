pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::models::Listing;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistent dedup and notification-state store, keyed by listing link.
///
/// This is the single source of truth across runs and across concurrent
/// workers: the implementations provide atomic upsert and an idempotent
/// notified flag, so the pipeline does no locking of its own around it.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Whether a record with this link has ever been stored, regardless of
    /// its notification state.
    async fn exists(&self, link: &str) -> Result<bool, StoreError>;

    /// Insert or refresh a record by link.
    ///
    /// On conflict the mutable fields (title, price, location, source) are
    /// overwritten; the stored `notified` flag is never downgraded.
    async fn upsert(&self, listing: &Listing) -> Result<(), StoreError>;

    async fn is_notified(&self, link: &str) -> Result<bool, StoreError>;

    /// Record that a notification was dispatched for this link. Idempotent;
    /// only called after the transport confirmed the send.
    async fn mark_notified(&self, link: &str) -> Result<(), StoreError>;
}
