//! Seams to the outside world.
//!
//! The [`Reconciler`](crate::reconcile::Reconciler) talks to the card board,
//! object storage, and the SNS certificate host only through these traits,
//! so tests swap in hand-written fakes and production wires in the HTTP
//! clients.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   CardApi    │   │ ObjectStore  │   │ CertFetcher  │
//! │ TrelloClient │   │ S3ObjectStore│   │HttpCertFetch │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        └──────────┬───────┘                  │
//!                   ▼                          ▼
//!              Reconciler                 SnsVerifier
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// Card detail as returned by the board API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub id_list: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CardList {
    pub id: String,
    pub name: String,
}

/// Raw bytes of a downloaded file plus the server-reported content type.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Read access to the kanban board that tracks repair intake.
#[async_trait]
pub trait CardApi: Send + Sync {
    async fn get_card(&self, card_id: &str) -> Result<Card>;

    async fn get_list(&self, list_id: &str) -> Result<CardList>;

    /// Downloads an uploaded card attachment, authenticating as the board user.
    async fn download_attachment(&self, url: &str) -> Result<DownloadedFile>;
}

/// `GetObject`-style access to the bucket SES writes raw mail into.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// Retrieves the PEM-encoded SNS signing certificate at a validated URL.
#[async_trait]
pub trait CertFetcher: Send + Sync {
    async fn fetch_pem(&self, url: &str) -> Result<String>;
}
