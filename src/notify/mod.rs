use crate::models::Listing;
use crate::store::{ListingStore, StoreError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport is not configured: {0}")]
    MissingConfig(&'static str),
    #[error("transport request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("transport rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a notification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The store already shows a confirmed dispatch for this link
    Skipped,
}

/// Send-and-confirm capability; the pipeline does not care which channel
/// sits behind it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a text payload. `Ok` means dispatch was confirmed, not
    /// merely attempted.
    async fn send(&self, body: &str) -> Result<(), NotifyError>;
}

/// Twilio WhatsApp credentials and addressing
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number, without the `whatsapp:` prefix
    pub from: String,
    /// Recipient number, without the `whatsapp:` prefix
    pub to: String,
}

impl TwilioConfig {
    /// Read credentials from the environment (`.env` supported via dotenvy
    /// at startup). Missing values abort before any site processing.
    pub fn from_env() -> Result<Self> {
        let account_sid =
            std::env::var("TWILIO_ACCOUNT_SID").context("TWILIO_ACCOUNT_SID is not set")?;
        let auth_token =
            std::env::var("TWILIO_AUTH_TOKEN").context("TWILIO_AUTH_TOKEN is not set")?;
        let to = std::env::var("MY_PHONE_NUMBER").context("MY_PHONE_NUMBER is not set")?;
        let from =
            std::env::var("TWILIO_WHATSAPP_FROM").unwrap_or_else(|_| "+14155238886".to_string());

        Ok(Self {
            account_sid,
            auth_token,
            from,
            to,
        })
    }
}

/// WhatsApp delivery through Twilio's message API
#[derive(Debug)]
pub struct TwilioWhatsApp {
    client: Client,
    config: TwilioConfig,
}

impl TwilioWhatsApp {
    pub fn new(config: TwilioConfig, timeout: Duration) -> Result<Self, NotifyError> {
        if config.account_sid.is_empty() || config.auth_token.is_empty() {
            return Err(NotifyError::MissingConfig("Twilio credentials are empty"));
        }
        if config.to.is_empty() {
            return Err(NotifyError::MissingConfig("recipient number is empty"));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Transport for TwilioWhatsApp {
    async fn send(&self, body: &str) -> Result<(), NotifyError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        );

        let form = [
            ("From", format!("whatsapp:{}", self.config.from)),
            ("To", format!("whatsapp:{}", self.config.to)),
            ("Body", body.to_string()),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Alert text sent for a listing.
pub fn message_body(listing: &Listing) -> String {
    let price = match listing.price {
        Some(price) => format!("€{}", price),
        None => "onbekend".to_string(),
    };
    format!(
        "Nieuwe huurwoning gevonden op {}: {}\nPrijs: {}\nLocatie: {}\nLink: {}",
        listing.source, listing.title, price, listing.location, listing.link
    )
}

/// Coordinates the transport with the state store so every link is alerted
/// at most once.
pub struct Notifier {
    transport: Arc<dyn Transport>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Send an alert for a listing unless the store already shows one.
    ///
    /// The `notified` flag is only written after the transport confirms
    /// dispatch. A store failure after a confirmed send is logged as a
    /// reconciliation warning; the worst case is one duplicate alert on the
    /// next run, which beats losing the alert entirely.
    pub async fn notify(
        &self,
        store: &dyn ListingStore,
        listing: &Listing,
    ) -> Result<Delivery, NotifyError> {
        if store.is_notified(&listing.link).await? {
            return Ok(Delivery::Skipped);
        }

        self.transport.send(&message_body(listing)).await?;
        info!(link = %listing.link, title = %listing.title, "Notification sent");

        if let Err(err) = store.mark_notified(&listing.link).await {
            warn!(
                link = %listing.link,
                error = %err,
                "Sent notification but failed to mark it; next run may alert once more"
            );
        }
        Ok(Delivery::Delivered)
    }
}
