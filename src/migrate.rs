//! Idempotent schema creation for both databases.
//!
//! - Local cache: `ebooks` keyed by external id, plus `ebook_tags` as the
//!   multi-entry tag index.
//! - Server of record: `pdf_metadata` keyed by an auto-assigned internal id
//!   with the external id in a unique `uuid` column.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn migrate_local(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ebooks (
            id TEXT PRIMARY KEY,
            internal_id INTEGER,
            filename TEXT NOT NULL,
            title TEXT,
            author TEXT,
            metadata_json TEXT,
            uploaded_at TEXT NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ebook_tags (
            ebook_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (ebook_id, position),
            FOREIGN KEY (ebook_id) REFERENCES ebooks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ebooks_filename ON ebooks(filename)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ebooks_title ON ebooks(title)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ebooks_author ON ebooks(author)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ebooks_sync_status ON ebooks(sync_status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ebook_tags_tag ON ebook_tags(tag)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn migrate_remote(pool: &SqlitePool) -> Result<()> {
    // AUTOINCREMENT keeps internal ids from being reused after a delete.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pdf_metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT UNIQUE,
            filename TEXT NOT NULL,
            title TEXT,
            author TEXT,
            creator TEXT,
            producer TEXT,
            creation_date TEXT,
            modification_date TEXT,
            subject TEXT,
            keywords TEXT,
            pages INTEGER,
            uploaded_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pdf_metadata_filename ON pdf_metadata(filename)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pdf_metadata_uploaded_at ON pdf_metadata(uploaded_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Creates both schemas. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let local = db::connect_local(config).await?;
    migrate_local(&local).await?;
    local.close().await;

    let remote = db::connect_remote(config).await?;
    migrate_remote(&remote).await?;
    remote.close().await;

    Ok(())
}
