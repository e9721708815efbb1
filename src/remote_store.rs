//! SQLite-backed server of record.
//!
//! Rows live in `pdf_metadata`, keyed by an auto-assigned integer `id` (the
//! internal identity) with the client's external id in the unique `uuid`
//! column. Tags are not stored server-side; rows always map back to records
//! in the `synced` state.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use baobab_core::models::{Ebook, EbookMetadata, SyncStatus};
use baobab_core::store::{upsert_with, RemoteStore, ServerStore, StoreError, StoreResult};

use crate::db::{backend, format_ts, parse_ts};

const ROW_COLUMNS: &str = "id, uuid, filename, title, author, creator, producer, \
     creation_date, modification_date, subject, keywords, pages, \
     CAST(uploaded_at AS TEXT) AS uploaded_at";

/// SQLite implementation of [`RemoteStore`] and [`ServerStore`].
pub struct SqliteRemoteStore {
    pool: SqlitePool,
}

impl SqliteRemoteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(dead_code)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> StoreResult<Option<Ebook>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM pdf_metadata WHERE {} = ? ORDER BY id LIMIT 1",
            ROW_COLUMNS, clause
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(row_to_ebook).transpose()
    }
}

/// Column values for the descriptive fields of a record.
struct RowFields {
    creator: Option<String>,
    producer: Option<String>,
    creation_date: Option<String>,
    modification_date: Option<String>,
    subject: Option<String>,
    keywords: Option<String>,
    pages: Option<i64>,
}

impl RowFields {
    fn from_ebook(ebook: &Ebook) -> StoreResult<Self> {
        let meta = ebook.metadata.clone().unwrap_or_default();
        let keywords = if meta.keywords.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&meta.keywords)
                    .map_err(|e| StoreError::Invalid(e.to_string()))?,
            )
        };
        Ok(Self {
            creator: meta.creator,
            producer: meta.producer,
            creation_date: meta.creation_date.as_ref().map(format_ts),
            modification_date: meta.modification_date.as_ref().map(format_ts),
            subject: meta.subject,
            keywords,
            pages: meta.page_count.map(i64::from),
        })
    }
}

/// Keywords are stored as a JSON array. Rows written by older clients hold
/// a plain comma-separated string.
fn decode_keywords(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(list) => list,
        Err(_) => raw
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

fn optional_date(row: &SqliteRow, column: &str, internal_id: i64) -> Option<chrono::DateTime<chrono::Utc>> {
    let raw: Option<String> = row.get(column);
    raw.and_then(|raw| match parse_ts(&raw) {
        Ok(ts) => Some(ts),
        Err(e) => {
            warn!(internal_id, column, error = %e, "ignoring unreadable date");
            None
        }
    })
}

fn row_to_ebook(row: &SqliteRow) -> StoreResult<Ebook> {
    let internal_id: i64 = row.get("id");
    let uuid: Option<String> = row.get("uuid");
    let pages: Option<i64> = row.get("pages");
    let keywords: Option<String> = row.get("keywords");

    let metadata = EbookMetadata {
        subject: row.get("subject"),
        keywords: keywords.as_deref().map(decode_keywords).unwrap_or_default(),
        page_count: pages.and_then(|p| u32::try_from(p).ok()),
        creator: row.get("creator"),
        producer: row.get("producer"),
        creation_date: optional_date(row, "creation_date", internal_id),
        modification_date: optional_date(row, "modification_date", internal_id),
    };

    let uploaded_at: Option<String> = row.get("uploaded_at");
    let uploaded_at = match uploaded_at {
        Some(raw) => parse_ts(&raw)?,
        None => chrono::Utc::now(),
    };

    Ok(Ebook {
        id: uuid
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| internal_id.to_string()),
        internal_id: Some(internal_id),
        filename: row.get("filename"),
        title: row.get("title"),
        author: row.get("author"),
        tags: Vec::new(),
        metadata: if metadata.is_empty() { None } else { Some(metadata) },
        uploaded_at,
        sync_status: SyncStatus::Synced,
    })
}

#[async_trait]
impl RemoteStore for SqliteRemoteStore {
    async fn upsert(&self, ebook: &Ebook) -> StoreResult<Ebook> {
        upsert_with(self, ebook).await
    }

    async fn get_by_external_id(&self, id: &str) -> StoreResult<Option<Ebook>> {
        self.fetch_one_where("uuid", id).await
    }
}

#[async_trait]
impl ServerStore for SqliteRemoteStore {
    async fn insert(&self, ebook: &Ebook) -> StoreResult<Ebook> {
        ebook.validate()?;
        let uuid = if ebook.has_id() {
            ebook.id.clone()
        } else {
            uuid::Uuid::new_v4().to_string()
        };
        let fields = RowFields::from_ebook(ebook)?;

        let result = sqlx::query(
            r#"
            INSERT INTO pdf_metadata (uuid, filename, title, author, creator, producer,
                                      creation_date, modification_date, subject,
                                      keywords, pages)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&uuid)
        .bind(&ebook.filename)
        .bind(&ebook.title)
        .bind(&ebook.author)
        .bind(&fields.creator)
        .bind(&fields.producer)
        .bind(&fields.creation_date)
        .bind(&fields.modification_date)
        .bind(&fields.subject)
        .bind(&fields.keywords)
        .bind(fields.pages)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        let internal_id = result.last_insert_rowid();
        debug!(internal_id, id = %uuid, filename = %ebook.filename, "remote row inserted");

        self.get_by_internal_id(internal_id)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("row {} vanished after insert", internal_id)))
    }

    async fn list(&self) -> StoreResult<Vec<Ebook>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM pdf_metadata ORDER BY uploaded_at DESC, id DESC",
            ROW_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_ebook).collect()
    }

    async fn get_by_internal_id(&self, internal_id: i64) -> StoreResult<Option<Ebook>> {
        let row = sqlx::query(&format!("SELECT {} FROM pdf_metadata WHERE id = ?", ROW_COLUMNS))
            .bind(internal_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.as_ref().map(row_to_ebook).transpose()
    }

    async fn get_by_filename(&self, filename: &str) -> StoreResult<Option<Ebook>> {
        self.fetch_one_where("filename", filename).await
    }

    async fn update(&self, internal_id: i64, ebook: &Ebook) -> StoreResult<Ebook> {
        ebook.validate()?;
        let fields = RowFields::from_ebook(ebook)?;
        let incoming_id = if ebook.has_id() {
            Some(ebook.id.clone())
        } else {
            None
        };

        // The external id is only ever written when the row has none.
        let result = sqlx::query(
            r#"
            UPDATE pdf_metadata SET
                uuid = COALESCE(uuid, ?),
                filename = ?,
                title = ?,
                author = ?,
                creator = ?,
                producer = ?,
                creation_date = ?,
                modification_date = ?,
                subject = ?,
                keywords = ?,
                pages = ?
            WHERE id = ?
            "#,
        )
        .bind(&incoming_id)
        .bind(&ebook.filename)
        .bind(&ebook.title)
        .bind(&ebook.author)
        .bind(&fields.creator)
        .bind(&fields.producer)
        .bind(&fields.creation_date)
        .bind(&fields.modification_date)
        .bind(&fields.subject)
        .bind(&fields.keywords)
        .bind(fields.pages)
        .bind(internal_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("internal id {}", internal_id)));
        }
        debug!(internal_id, id = %ebook.id, "remote row updated");

        self.get_by_internal_id(internal_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("internal id {}", internal_id)))
    }

    async fn delete(&self, internal_id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM pdf_metadata WHERE id = ?")
            .bind(internal_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("internal id {}", internal_id)));
        }
        Ok(())
    }
}
