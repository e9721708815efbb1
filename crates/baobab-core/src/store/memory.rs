//! In-memory store implementations for tests and embedding.
//!
//! Uses `HashMap`/`BTreeMap` behind `std::sync::RwLock`. The remote variant
//! enforces the same uniqueness and not-found rules as the SQLite backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::models::Ebook;

use super::{upsert_with, LocalStore, RemoteStore, ServerStore, StoreError, StoreResult};

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Backend("store lock poisoned".to_string())
}

fn newest_first(records: &mut [Ebook]) {
    records.sort_by(|a, b| {
        b.uploaded_at
            .cmp(&a.uploaded_at)
            .then_with(|| b.internal_id.cmp(&a.internal_id))
    });
}

/// In-memory [`LocalStore`].
#[derive(Default)]
pub struct InMemoryLocalStore {
    records: RwLock<HashMap<String, Ebook>>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn get_all(&self) -> StoreResult<Vec<Ebook>> {
        let mut all: Vec<Ebook> = self.records.read().map_err(poisoned)?.values().cloned().collect();
        newest_first(&mut all);
        Ok(all)
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<Ebook>> {
        Ok(self.records.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn get_by_filename(&self, filename: &str) -> StoreResult<Option<Ebook>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .find(|e| e.filename == filename))
    }

    async fn get_by_tag(&self, tag: &str) -> StoreResult<Vec<Ebook>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|e| e.tags.iter().any(|t| t == tag))
            .collect())
    }

    async fn save(&self, mut ebook: Ebook) -> StoreResult<Ebook> {
        ebook.validate()?;
        if !ebook.has_id() {
            ebook.id = uuid::Uuid::new_v4().to_string();
        }
        let tags = std::mem::take(&mut ebook.tags);
        ebook.set_tags(tags);
        self.records
            .write()
            .map_err(poisoned)?
            .insert(ebook.id.clone(), ebook.clone());
        Ok(ebook)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        Ok(self.records.write().map_err(poisoned)?.remove(id).is_some())
    }
}

#[derive(Default)]
struct RemoteRows {
    rows: BTreeMap<i64, Ebook>,
    next_id: i64,
}

/// In-memory [`ServerStore`].
#[derive(Default)]
pub struct InMemoryRemoteStore {
    inner: RwLock<RemoteRows>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The remote view of a record: no tags, always `synced`.
fn canonical(ebook: &Ebook, internal_id: i64, external_id: String) -> Ebook {
    let mut row = ebook.clone();
    row.id = external_id;
    row.internal_id = Some(internal_id);
    row.tags = Vec::new();
    row.sync_status = crate::models::SyncStatus::Synced;
    row
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn upsert(&self, ebook: &Ebook) -> StoreResult<Ebook> {
        upsert_with(self, ebook).await
    }

    async fn get_by_external_id(&self, id: &str) -> StoreResult<Option<Ebook>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.rows.values().find(|r| r.id == id).cloned())
    }
}

#[async_trait]
impl ServerStore for InMemoryRemoteStore {
    async fn insert(&self, ebook: &Ebook) -> StoreResult<Ebook> {
        ebook.validate()?;
        let mut inner = self.inner.write().map_err(poisoned)?;
        let external_id = if ebook.has_id() {
            ebook.id.clone()
        } else {
            uuid::Uuid::new_v4().to_string()
        };
        if inner.rows.values().any(|r| r.id == external_id) {
            return Err(StoreError::Backend(format!(
                "UNIQUE constraint failed: pdf_metadata.uuid ({})",
                external_id
            )));
        }
        inner.next_id += 1;
        let internal_id = inner.next_id;
        let mut row = canonical(ebook, internal_id, external_id);
        row.uploaded_at = Utc::now();
        inner.rows.insert(internal_id, row.clone());
        Ok(row)
    }

    async fn list(&self) -> StoreResult<Vec<Ebook>> {
        let mut all: Vec<Ebook> = self.inner.read().map_err(poisoned)?.rows.values().cloned().collect();
        newest_first(&mut all);
        Ok(all)
    }

    async fn get_by_internal_id(&self, internal_id: i64) -> StoreResult<Option<Ebook>> {
        Ok(self.inner.read().map_err(poisoned)?.rows.get(&internal_id).cloned())
    }

    async fn get_by_filename(&self, filename: &str) -> StoreResult<Option<Ebook>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.rows.values().find(|r| r.filename == filename).cloned())
    }

    async fn update(&self, internal_id: i64, ebook: &Ebook) -> StoreResult<Ebook> {
        ebook.validate()?;
        let mut inner = self.inner.write().map_err(poisoned)?;
        let existing = inner
            .rows
            .get(&internal_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("internal id {}", internal_id)))?;
        // A legacy row without an external id adopts the incoming one.
        let external_id = if existing.id.is_empty() {
            ebook.id.clone()
        } else {
            existing.id.clone()
        };
        let mut row = canonical(ebook, internal_id, external_id);
        row.uploaded_at = existing.uploaded_at;
        inner.rows.insert(internal_id, row.clone());
        Ok(row)
    }

    async fn delete(&self, internal_id: i64) -> StoreResult<()> {
        match self.inner.write().map_err(poisoned)?.rows.remove(&internal_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("internal id {}", internal_id))),
        }
    }
}
