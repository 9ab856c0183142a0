//! SQLite-backed [`RepairStore`].
//!
//! Schema lives in [`crate::migrate`]. Case-insensitive lookups go through
//! the `*_key` columns, which hold [`name_key`] of the displayed value.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    name_key, Attachment, CustomerRecord, DedupKey, LineItem, LogRecord, NewCustomer, NewLog,
    NewRepair, RepairMessage, RepairRecord,
};

use super::{contact_matches, AttachmentOwner, CreateRepairOutcome, RepairStore};

const REPAIR_COLUMNS: &str = "id, repair_number, customer_id, customer_first_name, \
     customer_last_name, email, phone, vendor, brand, model, material, reference_number, \
     description, repair_notes, card_id, search, created_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_messages(&self, repair_id: &str) -> Result<Vec<RepairMessage>> {
        let rows = sqlx::query(
            "SELECT sent_at, sender, message FROM repair_messages WHERE repair_id = ? ORDER BY id",
        )
        .bind(repair_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| RepairMessage {
                date: from_millis(row.get("sent_at")),
                from: row.get("sender"),
                message: row.get("message"),
            })
            .collect())
    }

    async fn hydrate_repair(&self, row: Option<SqliteRow>) -> Result<Option<RepairRecord>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let mut record = repair_from_row(&row);
        record.messages = self.load_messages(&record.id).await?;
        Ok(Some(record))
    }

    async fn load_line_items(&self, log_id: &str) -> Result<Vec<LineItem>> {
        let rows = sqlx::query(
            "SELECT repair_number, description FROM log_line_items WHERE log_id = ? ORDER BY position",
        )
        .bind(log_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| LineItem {
                repair_number: row.get("repair_number"),
                description: row.get("description"),
            })
            .collect())
    }

    async fn insert_attachment(
        &self,
        owner: AttachmentOwner,
        owner_id: &str,
        attachment: &Attachment,
    ) -> Result<()> {
        let (width, height) = match attachment.dimensions {
            Some((w, h)) => (Some(i64::from(w)), Some(i64::from(h))),
            None => (None, None),
        };
        sqlx::query(
            r#"
            INSERT INTO attachments (id, owner_kind, owner_id, file_name, content_type,
                                     width, height, data, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(owner.as_str())
        .bind(owner_id)
        .bind(&attachment.file_name)
        .bind(&attachment.content_type)
        .bind(width)
        .bind(height)
        .bind(&attachment.bytes)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!("Failed to store attachment for {} {}", owner.as_str(), owner_id)
        })?;
        Ok(())
    }
}

fn from_secs(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn from_millis(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts).unwrap_or_default()
}

fn repair_from_row(row: &SqliteRow) -> RepairRecord {
    RepairRecord {
        id: row.get("id"),
        repair_number: row.get("repair_number"),
        customer_id: row.get("customer_id"),
        customer_first_name: row.get("customer_first_name"),
        customer_last_name: row.get("customer_last_name"),
        email: row.get("email"),
        phone: row.get("phone"),
        vendor: row.get("vendor"),
        brand: row.get("brand"),
        model: row.get("model"),
        material: row.get("material"),
        reference_number: row.get("reference_number"),
        description: row.get("description"),
        repair_notes: row.get("repair_notes"),
        card_id: row.get("card_id"),
        messages: Vec::new(),
        search: row.get("search"),
        created_at: from_secs(row.get("created_at")),
    }
}

fn customer_from_row(row: &SqliteRow) -> CustomerRecord {
    CustomerRecord {
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        phone: row.get("phone"),
    }
}

#[async_trait]
impl RepairStore for SqliteStore {
    async fn find_repair_by_key(&self, key: &DedupKey) -> Result<Option<RepairRecord>> {
        let (first_key, last_key) = key.name_keys();
        let row = sqlx::query(&format!(
            "SELECT {} FROM repairs \
             WHERE repair_number = ? AND first_name_key = ? AND last_name_key = ?",
            REPAIR_COLUMNS
        ))
        .bind(&key.repair_number)
        .bind(first_key)
        .bind(last_key)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate_repair(row).await
    }

    async fn find_repair_by_id(&self, id: &str) -> Result<Option<RepairRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM repairs WHERE id = ?", REPAIR_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        self.hydrate_repair(row).await
    }

    async fn find_customer(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        phone: &str,
    ) -> Result<Option<CustomerRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, first_name, last_name, email, phone FROM customers
            WHERE first_name_key = ? AND last_name_key = ?
            ORDER BY created_at, id
            "#,
        )
        .bind(name_key(first_name))
        .bind(name_key(last_name))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(customer_from_row)
            .find(|c| contact_matches(c, email, phone)))
    }

    async fn create_customer(&self, customer: NewCustomer) -> Result<CustomerRecord> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO customers (id, first_name, last_name, first_name_key, last_name_key,
                                   email, phone, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&customer.first_name)
        .bind(&customer.last_name)
        .bind(name_key(&customer.first_name))
        .bind(name_key(&customer.last_name))
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert customer")?;

        Ok(CustomerRecord {
            id,
            first_name: customer.first_name,
            last_name: customer.last_name,
            email: customer.email,
            phone: customer.phone,
        })
    }

    async fn create_repair(&self, repair: NewRepair) -> Result<CreateRepairOutcome> {
        let key = repair.dedup_key();
        let (first_key, last_key) = key.name_keys();
        let record = repair.into_record(Uuid::new_v4().to_string(), Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO repairs (id, repair_number, customer_id, customer_first_name,
                                 customer_last_name, first_name_key, last_name_key, email, phone,
                                 vendor, brand, model, material, reference_number, description,
                                 repair_notes, card_id, search, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repair_number, first_name_key, last_name_key) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.repair_number)
        .bind(&record.customer_id)
        .bind(&record.customer_first_name)
        .bind(&record.customer_last_name)
        .bind(first_key)
        .bind(last_key)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(&record.vendor)
        .bind(&record.brand)
        .bind(&record.model)
        .bind(&record.material)
        .bind(&record.reference_number)
        .bind(&record.description)
        .bind(&record.repair_notes)
        .bind(&record.card_id)
        .bind(&record.search)
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert repair")?;

        if result.rows_affected() == 1 {
            return Ok(CreateRepairOutcome::Created(record));
        }

        let existing = self.find_repair_by_key(&key).await?.with_context(|| {
            format!("Repair {} conflicted but could not be read back", key.repair_number)
        })?;
        Ok(CreateRepairOutcome::Duplicate(existing))
    }

    async fn create_log(&self, log: NewLog) -> Result<LogRecord> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO logs (id, customer_id, customer_name, customer_name_key, vendor, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&log.customer_id)
        .bind(&log.customer_name)
        .bind(name_key(&log.customer_name))
        .bind(&log.vendor)
        .bind(created_at.timestamp())
        .execute(&mut *tx)
        .await
        .context("Failed to insert log")?;

        for (position, item) in log.line_items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO log_line_items (log_id, position, repair_number, description) VALUES (?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(position as i64)
            .bind(&item.repair_number)
            .bind(&item.description)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(LogRecord {
            id,
            customer_id: log.customer_id,
            customer_name: log.customer_name,
            vendor: log.vendor,
            line_items: log.line_items,
            created_at,
        })
    }

    async fn update_repair_vendor(&self, id: &str, vendor: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE repairs SET vendor = ? WHERE id = ?")
            .bind(vendor)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_message(&self, id: &str, message: RepairMessage) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM repairs WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO repair_messages (repair_id, sent_at, sender, message) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(message.date.timestamp_millis())
        .bind(&message.from)
        .bind(&message.message)
        .execute(&self.pool)
        .await
        .context("Failed to append repair message")?;
        Ok(true)
    }

    async fn add_repair_attachment(&self, id: &str, attachment: &Attachment) -> Result<()> {
        self.insert_attachment(AttachmentOwner::Repair, id, attachment)
            .await
    }

    async fn find_log_for_repair(
        &self,
        customer_name: &str,
        repair_number: &str,
    ) -> Result<Option<LogRecord>> {
        let row = sqlx::query(
            r#"
            SELECT l.id, l.customer_id, l.customer_name, l.vendor, l.created_at
            FROM logs l
            WHERE l.customer_name_key = ?
              AND EXISTS (SELECT 1 FROM log_line_items li
                          WHERE li.log_id = l.id AND li.repair_number = ?)
            ORDER BY l.created_at, l.id
            LIMIT 1
            "#,
        )
        .bind(name_key(customer_name))
        .bind(repair_number)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.get("id");
        let line_items = self.load_line_items(&id).await?;
        Ok(Some(LogRecord {
            id,
            customer_id: row.get("customer_id"),
            customer_name: row.get("customer_name"),
            vendor: row.get("vendor"),
            line_items,
            created_at: from_secs(row.get("created_at")),
        }))
    }

    async fn add_log_attachment(&self, id: &str, attachment: &Attachment) -> Result<()> {
        self.insert_attachment(AttachmentOwner::Log, id, attachment)
            .await
    }

    async fn list_attachments(
        &self,
        owner: AttachmentOwner,
        id: &str,
    ) -> Result<Vec<Attachment>> {
        let rows = sqlx::query(
            r#"
            SELECT file_name, content_type, width, height, data FROM attachments
            WHERE owner_kind = ? AND owner_id = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(owner.as_str())
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let width: Option<i64> = row.get("width");
                let height: Option<i64> = row.get("height");
                Attachment {
                    file_name: row.get("file_name"),
                    content_type: row.get("content_type"),
                    bytes: row.get("data"),
                    dimensions: width.zip(height).map(|(w, h)| (w as u32, h as u32)),
                }
            })
            .collect())
    }
}
