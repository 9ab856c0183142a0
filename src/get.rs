//! Repair retrieval by id.
//!
//! Backs the `repair-intake repair <id>` command: the stored repair, its
//! message thread, and a summary of the files stored against it.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::models::RepairRecord;
use crate::store::sqlite::SqliteStore;
use crate::store::{AttachmentOwner, RepairStore};

#[derive(Debug, Clone, Serialize)]
pub struct RepairResponse {
    #[serde(flatten)]
    pub repair: RepairRecord,
    pub attachments: Vec<AttachmentSummary>,
}

/// Attachment metadata without the payload.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentSummary {
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
    pub dimensions: Option<(u32, u32)>,
}

pub async fn get_repair(config: &Config, id: &str) -> Result<RepairResponse> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);

    let Some(repair) = store.find_repair_by_id(id).await? else {
        store.pool().close().await;
        bail!("repair not found: {}", id);
    };

    let attachments = store
        .list_attachments(AttachmentOwner::Repair, id)
        .await?
        .into_iter()
        .map(|a| AttachmentSummary {
            size: a.bytes.len(),
            file_name: a.file_name,
            content_type: a.content_type,
            dimensions: a.dimensions,
        })
        .collect();

    store.pool().close().await;
    Ok(RepairResponse {
        repair,
        attachments,
    })
}

/// CLI entry point: prints the repair as pretty JSON.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let response = get_repair(config, id).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
