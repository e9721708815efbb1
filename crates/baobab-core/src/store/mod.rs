//! Storage abstractions for Baobab Reader.
//!
//! Two stores hold ebook records:
//!
//! - [`LocalStore`]: the client-side cache keyed by external id. Never
//!   touches the network.
//! - [`RemoteStore`]: the server of record, keyed by an internal numeric
//!   identity with the external id stored alongside. [`ServerStore`] extends
//!   it with the operations only the server itself needs.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Upsert resolution
//!
//! Remote upserts decide between update and insert with a two-tier lookup
//! (see [`resolve_upsert`]): a carried `internal_id` wins; otherwise the
//! external `id` is looked up; otherwise the record is new. A client that has
//! never seen an internal id and one replaying an already-synced record both
//! land on the same row.

pub mod memory;

use async_trait::async_trait;

use crate::models::{Ebook, SyncStatus};

/// Failure of a store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The targeted identity does not exist.
    #[error("ebook not found: {0}")]
    NotFound(String),
    /// The record cannot be persisted as given.
    #[error("invalid ebook: {0}")]
    Invalid(String),
    /// The underlying storage engine failed.
    #[error("storage error: {0}")]
    Backend(String),
    /// The remote store could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
    /// The remote store answered with a failure status.
    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Client-side ebook cache.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_all`](LocalStore::get_all) | Every record, most recent upload first |
/// | [`get_by_id`](LocalStore::get_by_id) | Lookup by external id |
/// | [`get_by_filename`](LocalStore::get_by_filename) | First record with this filename |
/// | [`get_by_tag`](LocalStore::get_by_tag) | Records carrying a tag |
/// | [`get_by_status`](LocalStore::get_by_status) | Records in any of the given states |
/// | [`save`](LocalStore::save) | Insert or overwrite; assigns an id when missing |
/// | [`delete`](LocalStore::delete) | Remove by id; reports whether a record existed |
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get_all(&self) -> StoreResult<Vec<Ebook>>;

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<Ebook>>;

    async fn get_by_filename(&self, filename: &str) -> StoreResult<Option<Ebook>>;

    async fn get_by_tag(&self, tag: &str) -> StoreResult<Vec<Ebook>>;

    async fn get_by_status(&self, statuses: &[SyncStatus]) -> StoreResult<Vec<Ebook>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|e| statuses.contains(&e.sync_status))
            .collect())
    }

    /// Persists `ebook` as given (including its `sync_status`).
    ///
    /// Assigns a fresh UUID when `id` is empty; otherwise overwrites the
    /// record with that id. Returns the stored record.
    async fn save(&self, ebook: Ebook) -> StoreResult<Ebook>;

    /// Removes the record with this id. Returns `false` when there was none.
    async fn delete(&self, id: &str) -> StoreResult<bool>;
}

/// The server of record, as seen by the sync agent.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert-or-update following [`resolve_upsert`]. The returned record
    /// carries the assigned `internal_id` and the canonical field values.
    async fn upsert(&self, ebook: &Ebook) -> StoreResult<Ebook>;

    async fn get_by_external_id(&self, id: &str) -> StoreResult<Option<Ebook>>;
}

/// Server-side operations on the remote store.
#[async_trait]
pub trait ServerStore: RemoteStore {
    /// Always inserts. Assigns an external id when `ebook.id` is empty.
    async fn insert(&self, ebook: &Ebook) -> StoreResult<Ebook>;

    /// Every row, most recent upload first.
    async fn list(&self) -> StoreResult<Vec<Ebook>>;

    async fn get_by_internal_id(&self, internal_id: i64) -> StoreResult<Option<Ebook>>;

    async fn get_by_filename(&self, filename: &str) -> StoreResult<Option<Ebook>>;

    /// Overwrites the descriptive fields of the row `internal_id`.
    ///
    /// Fails with [`StoreError::NotFound`] when the row does not exist.
    async fn update(&self, internal_id: i64, ebook: &Ebook) -> StoreResult<Ebook>;

    /// Fails with [`StoreError::NotFound`] when no row matched.
    async fn delete(&self, internal_id: i64) -> StoreResult<()>;
}

/// Where a remote upsert should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertTarget {
    Update(i64),
    Insert,
}

/// Decides whether `ebook` updates an existing remote row or inserts a new
/// one.
pub async fn resolve_upsert<S>(store: &S, ebook: &Ebook) -> StoreResult<UpsertTarget>
where
    S: ServerStore + ?Sized,
{
    if let Some(internal_id) = ebook.internal_id {
        return Ok(UpsertTarget::Update(internal_id));
    }
    if !ebook.has_id() {
        return Ok(UpsertTarget::Insert);
    }
    match store.get_by_external_id(&ebook.id).await? {
        Some(existing) => existing
            .internal_id
            .map(UpsertTarget::Update)
            .ok_or_else(|| StoreError::Backend(format!("row for {} has no internal id", ebook.id))),
        None => Ok(UpsertTarget::Insert),
    }
}

/// Shared [`RemoteStore::upsert`] body for [`ServerStore`] backends.
pub async fn upsert_with<S>(store: &S, ebook: &Ebook) -> StoreResult<Ebook>
where
    S: ServerStore + ?Sized,
{
    ebook.validate()?;
    match resolve_upsert(store, ebook).await? {
        UpsertTarget::Update(internal_id) => store.update(internal_id, ebook).await,
        UpsertTarget::Insert => store.insert(ebook).await,
    }
}
