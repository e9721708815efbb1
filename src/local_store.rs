//! SQLite-backed [`LocalStore`]: the client-side ebook cache.
//!
//! Records live in `ebooks`, keyed by external id. Tags live in
//! `ebook_tags`, one row per (record, position), which doubles as the
//! multi-entry tag index. Descriptive metadata is kept as a JSON column since
//! the cache never queries inside it.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use baobab_core::models::{Ebook, EbookMetadata, SyncStatus};
use baobab_core::store::{LocalStore, StoreError, StoreResult};

use crate::db::{backend, format_ts, parse_ts};

const EBOOK_COLUMNS: &str =
    "e.id, e.internal_id, e.filename, e.title, e.author, e.metadata_json, e.uploaded_at, e.sync_status";

/// SQLite implementation of [`LocalStore`].
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(dead_code)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Tags for one record, or for every record when `id` is `None`.
    async fn load_tags(&self, id: Option<&str>) -> StoreResult<HashMap<String, Vec<String>>> {
        let rows = match id {
            Some(id) => {
                sqlx::query(
                    "SELECT ebook_id, tag FROM ebook_tags WHERE ebook_id = ? ORDER BY position",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT ebook_id, tag FROM ebook_tags ORDER BY ebook_id, position")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(backend)?;

        let mut tags: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            tags.entry(row.get("ebook_id"))
                .or_default()
                .push(row.get("tag"));
        }
        Ok(tags)
    }

    async fn hydrate(&self, rows: Vec<SqliteRow>) -> StoreResult<Vec<Ebook>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let mut tags = self.load_tags(None).await?;
        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                row_to_ebook(row, tags.remove(&id).unwrap_or_default())
            })
            .collect()
    }
}

fn row_to_ebook(row: &SqliteRow, tags: Vec<String>) -> StoreResult<Ebook> {
    let metadata = match row.get::<Option<String>, _>("metadata_json") {
        Some(raw) => Some(
            serde_json::from_str::<EbookMetadata>(&raw)
                .map_err(|e| StoreError::Backend(format!("bad metadata_json: {}", e)))?,
        ),
        None => None,
    };
    let uploaded_at: String = row.get("uploaded_at");
    let sync_status: String = row.get("sync_status");

    Ok(Ebook {
        id: row.get("id"),
        internal_id: row.get("internal_id"),
        filename: row.get("filename"),
        title: row.get("title"),
        author: row.get("author"),
        tags,
        metadata,
        uploaded_at: parse_ts(&uploaded_at)?,
        sync_status: sync_status.parse().map_err(StoreError::Backend)?,
    })
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get_all(&self) -> StoreResult<Vec<Ebook>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ebooks e ORDER BY e.uploaded_at DESC, e.id",
            EBOOK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        self.hydrate(rows).await
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<Ebook>> {
        let row = sqlx::query(&format!("SELECT {} FROM ebooks e WHERE e.id = ?", EBOOK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => {
                let mut tags = self.load_tags(Some(id)).await?;
                row_to_ebook(&row, tags.remove(id).unwrap_or_default()).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn get_by_filename(&self, filename: &str) -> StoreResult<Option<Ebook>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM ebooks WHERE filename = ? LIMIT 1")
                .bind(filename)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        match id {
            Some(id) => self.get_by_id(&id).await,
            None => Ok(None),
        }
    }

    async fn get_by_tag(&self, tag: &str) -> StoreResult<Vec<Ebook>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT DISTINCT {}
            FROM ebooks e
            JOIN ebook_tags t ON t.ebook_id = e.id
            WHERE t.tag = ?
            ORDER BY e.uploaded_at DESC, e.id
            "#,
            EBOOK_COLUMNS
        ))
        .bind(tag)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        self.hydrate(rows).await
    }

    async fn get_by_status(&self, statuses: &[SyncStatus]) -> StoreResult<Vec<Ebook>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM ebooks e WHERE e.sync_status IN ({}) ORDER BY e.uploaded_at DESC, e.id",
            EBOOK_COLUMNS, placeholders
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(backend)?;

        self.hydrate(rows).await
    }

    async fn save(&self, mut ebook: Ebook) -> StoreResult<Ebook> {
        ebook.validate()?;
        if !ebook.has_id() {
            ebook.id = uuid::Uuid::new_v4().to_string();
        }
        let tags = std::mem::take(&mut ebook.tags);
        ebook.set_tags(tags);

        let metadata_json = ebook
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO ebooks (id, internal_id, filename, title, author,
                                metadata_json, uploaded_at, sync_status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                internal_id = excluded.internal_id,
                filename = excluded.filename,
                title = excluded.title,
                author = excluded.author,
                metadata_json = excluded.metadata_json,
                uploaded_at = excluded.uploaded_at,
                sync_status = excluded.sync_status
            "#,
        )
        .bind(&ebook.id)
        .bind(ebook.internal_id)
        .bind(&ebook.filename)
        .bind(&ebook.title)
        .bind(&ebook.author)
        .bind(&metadata_json)
        .bind(format_ts(&ebook.uploaded_at))
        .bind(ebook.sync_status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query("DELETE FROM ebook_tags WHERE ebook_id = ?")
            .bind(&ebook.id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for (position, tag) in ebook.tags.iter().enumerate() {
            sqlx::query("INSERT INTO ebook_tags (ebook_id, position, tag) VALUES (?, ?, ?)")
                .bind(&ebook.id)
                .bind(position as i64)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(ebook)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("DELETE FROM ebook_tags WHERE ebook_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let result = sqlx::query("DELETE FROM ebooks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}
