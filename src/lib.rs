//! # Repair Intake
//!
//! Webhook service that keeps repair records in step with the repair-intake
//! board and with customers' email replies.
//!
//! Trello card events create repairs (deduplicated on repair number and
//! customer name), move them between vendors, and attach photos. SES
//! receipts delivered through SNS thread customer replies onto the repair
//! named in the `repairs+<id>@` recipient.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────────┐
//! │ /api/trello  │──▶│  signature  │──▶│   events   │──▶│  Reconciler  │
//! │ /api/sns     │   │ HMAC / RSA  │   │  (typed)   │   │              │
//! └──────────────┘   └─────────────┘   └────────────┘   └──────┬───────┘
//!                                                              │
//!                 ┌──────────────┬──────────────┬──────────────┤
//!                 ▼              ▼              ▼              ▼
//!           ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//!           │card_text │   │  Trello  │   │ S3+email │   │  store   │
//!           │ parsing  │   │   API    │   │  (MIME)  │   │ (SQLite) │
//!           └──────────┘   └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Repair, customer and log records |
//! | [`card_text`] | Card title and description extraction |
//! | [`email`] | MIME parsing, quote stripping, plus-address routing |
//! | [`events`] | Typed webhook payloads |
//! | [`signature`] | Trello HMAC and SNS certificate verification |
//! | [`reconcile`] | Event-to-record reconciliation |
//! | [`image_norm`] | Attachment downscaling |
//! | [`store`] | Repository trait with SQLite and in-memory backends |
//! | [`traits`] | Upstream seams (card API, object store, cert fetcher) |
//! | [`trello`] | Trello REST client |
//! | [`s3`] | S3 `GetObject` client |
//! | [`server`] | Webhook HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod card_text;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod events;
pub mod get;
pub mod image_norm;
pub mod migrate;
pub mod models;
pub mod reconcile;
pub mod s3;
pub mod server;
pub mod signature;
pub mod store;
pub mod traits;
pub mod trello;
