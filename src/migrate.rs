//! Idempotent schema setup for the repair database.
//!
//! Name columns have a `_key` twin holding the trimmed, lower-cased form.
//! The unique index over `(repair_number, first_name_key, last_name_key)`
//! is what turns a racing second create into a duplicate.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name_key TEXT NOT NULL,
            last_name_key TEXT NOT NULL,
            email TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repairs (
            id TEXT PRIMARY KEY,
            repair_number TEXT NOT NULL,
            customer_id TEXT,
            customer_first_name TEXT NOT NULL,
            customer_last_name TEXT NOT NULL,
            first_name_key TEXT NOT NULL,
            last_name_key TEXT NOT NULL,
            email TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            vendor TEXT,
            brand TEXT NOT NULL DEFAULT '',
            model TEXT NOT NULL DEFAULT '',
            material TEXT NOT NULL DEFAULT '',
            reference_number TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            repair_notes TEXT NOT NULL DEFAULT '',
            card_id TEXT,
            search TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            UNIQUE(repair_number, first_name_key, last_name_key),
            FOREIGN KEY (customer_id) REFERENCES customers(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repair_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repair_id TEXT NOT NULL,
            sent_at INTEGER NOT NULL,
            sender TEXT NOT NULL,
            message TEXT NOT NULL,
            FOREIGN KEY (repair_id) REFERENCES repairs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS logs (
            id TEXT PRIMARY KEY,
            customer_id TEXT,
            customer_name TEXT NOT NULL,
            customer_name_key TEXT NOT NULL,
            vendor TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS log_line_items (
            log_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            repair_number TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (log_id, position),
            FOREIGN KEY (log_id) REFERENCES logs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            owner_kind TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            content_type TEXT NOT NULL,
            width INTEGER,
            height INTEGER,
            data BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_customers_name ON customers(first_name_key, last_name_key)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_repair_messages_repair ON repair_messages(repair_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_customer_name ON logs(customer_name_key)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_log_line_items_number ON log_line_items(repair_number)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_attachments_owner ON attachments(owner_kind, owner_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
