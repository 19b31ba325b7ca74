use super::{ListingStore, StoreError};
use crate::models::Listing;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS rental_listings (
        link     TEXT PRIMARY KEY,
        title    TEXT NOT NULL,
        price    INTEGER,
        location TEXT NOT NULL,
        source   TEXT NOT NULL,
        notified INTEGER NOT NULL DEFAULT 0,
        seen_at  TEXT NOT NULL
    )
"#;

/// SQLite-backed listing store.
///
/// Upsert atomicity comes from the unique primary key on `link`; the
/// conflict clause deliberately leaves `notified` out so a refresh can
/// never downgrade it.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if needed) the store at the given path.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        info!(path = %path.display(), "Opened listing store");
        Self::init(pool).await
    }

    /// Open a private in-memory store.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // One connection, or every pooled connection would get its own
        // empty in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ListingStore for SqliteStore {
    async fn exists(&self, link: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM rental_listings WHERE link = ?1")
            .bind(link)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn upsert(&self, listing: &Listing) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO rental_listings (link, title, price, location, source, notified, seen_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
            ON CONFLICT(link) DO UPDATE SET
                title    = excluded.title,
                price    = excluded.price,
                location = excluded.location,
                source   = excluded.source,
                seen_at  = excluded.seen_at
            "#,
        )
        .bind(&listing.link)
        .bind(&listing.title)
        .bind(listing.price)
        .bind(&listing.location)
        .bind(&listing.source)
        .bind(listing.seen_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_notified(&self, link: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT notified FROM rental_listings WHERE link = ?1")
            .bind(link)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| r.get::<i64, _>("notified") != 0)
            .unwrap_or(false))
    }

    async fn mark_notified(&self, link: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE rental_listings SET notified = 1 WHERE link = ?1")
            .bind(link)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
