//! SQLite connection management.
//!
//! Both stores live in SQLite: the client cache at `[local].path` and the
//! server of record at `[remote].path`. Pools use WAL mode so catalog reads
//! and concurrent sync writes do not block each other. The database file
//! and its parent directories are created if they don't exist.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use baobab_core::store::StoreError;

use crate::config::Config;

/// Create a connection pool to the SQLite database at `db_path`.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    Ok(pool)
}

/// Pool for the client-side cache.
pub async fn connect_local(config: &Config) -> Result<SqlitePool> {
    connect(&config.local.path).await
}

/// Pool for the server-side store of record.
pub async fn connect_remote(config: &Config) -> Result<SqlitePool> {
    connect(&config.remote.path).await
}

/// Maps a driver error into the store error taxonomy.
pub(crate) fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parses RFC 3339 or SQLite's `CURRENT_TIMESTAMP` format (UTC).
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc()))
        .map_err(|e| StoreError::Backend(format!("bad timestamp '{}': {}", raw, e)))
}
