//! Client-side catalog: local-first writes and deferred sync.
//!
//! Every mutation lands in the [`LocalStore`] first and leaves the record
//! `pending`. Pushing to the server happens separately: loading the catalog
//! spawns one independent sync task per record that needs one and hands
//! back a [`SyncBatch`] the caller may join or simply drop.
//!
//! ```text
//! add / edit / import ──▶ local store (pending)
//!
//! load ──▶ records ──▶ for each pending/error: tokio::spawn(agent.sync(id))
//!                                               (optionally capped by a semaphore)
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use baobab_core::extract::MetadataExtractor;
use baobab_core::models::{non_blank, Ebook, EbookMetadata, SyncStatus};
use baobab_core::store::{LocalStore, RemoteStore, StoreError};
use baobab_core::sync::{AlwaysOnline, Connectivity, ConnectivityFlag, SyncAgent, SyncOutcome};

use crate::config::{Config, SyncConfig};
use crate::extract::PdfMetadataExtractor;
use crate::local_store::SqliteLocalStore;
use crate::remote_client::HttpRemoteStore;
use crate::remote_store::SqliteRemoteStore;
use crate::{db, migrate};

/// Which records a catalog load syncs, and how many at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub retry_errored: bool,
    /// `None` means unbounded.
    pub max_in_flight: Option<usize>,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            retry_errored: true,
            max_in_flight: None,
        }
    }
}

impl From<&SyncConfig> for SyncPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            retry_errored: config.retry_errored,
            max_in_flight: Some(config.max_in_flight),
        }
    }
}

impl SyncPolicy {
    fn wants(&self, status: SyncStatus) -> bool {
        match status {
            SyncStatus::Pending => true,
            SyncStatus::Error => self.retry_errored,
            SyncStatus::Synced => false,
        }
    }
}

/// Fields for a manually entered record.
#[derive(Debug, Clone, Default)]
pub struct NewEbook {
    pub filename: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Option<EbookMetadata>,
}

/// A local edit. `None` leaves a field unchanged; a blank string clears an
/// optional field.
#[derive(Debug, Clone, Default)]
pub struct EbookEdit {
    pub filename: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl EbookEdit {
    pub fn is_empty(&self) -> bool {
        self.filename.is_none() && self.title.is_none() && self.author.is_none() && self.tags.is_none()
    }
}

/// Sync tasks spawned by one catalog load.
///
/// Dropping the batch detaches the tasks; they keep running.
pub struct SyncBatch {
    handles: Vec<(String, JoinHandle<SyncOutcome>)>,
}

impl SyncBatch {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(|(id, _)| id.as_str())
    }

    /// Waits for every task. A task that panicked is reported as failed.
    pub async fn join(self) -> SyncReport {
        let mut outcomes = Vec::with_capacity(self.handles.len());
        for (id, handle) in self.handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(id = %id, error = %e, "sync task did not complete");
                    SyncOutcome::Failed {
                        reason: "sync task panicked".to_string(),
                    }
                }
            };
            outcomes.push((id, outcome));
        }
        SyncReport { outcomes }
    }
}

/// Per-record outcomes of a joined [`SyncBatch`], in launch order.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub outcomes: Vec<(String, SyncOutcome)>,
}

impl SyncReport {
    pub fn synced(&self) -> usize {
        self.count(|o| o.is_synced())
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Failed { .. }))
    }

    pub fn offline(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Offline))
    }

    /// Pushed, but edited locally meanwhile; still pending.
    pub fn superseded(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Superseded { .. }))
    }

    fn count(&self, pred: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// The client's entry point to its ebook collection.
pub struct Catalog {
    local: Arc<dyn LocalStore>,
    agent: Arc<SyncAgent>,
    extractor: Arc<dyn MetadataExtractor>,
    policy: SyncPolicy,
    limiter: Option<Arc<Semaphore>>,
}

impl Catalog {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn Connectivity>,
        extractor: Arc<dyn MetadataExtractor>,
        policy: SyncPolicy,
    ) -> Self {
        let limiter = policy
            .max_in_flight
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        Self {
            agent: Arc::new(SyncAgent::new(local.clone(), remote, connectivity)),
            local,
            extractor,
            policy,
            limiter,
        }
    }

    /// Opens the catalog described by `config`.
    ///
    /// The local store is always the SQLite file at `[local].path`. The
    /// remote is the server at `[remote].url` when set, otherwise the remote
    /// database at `[remote].path` opened directly. `offline` forces every
    /// sync to be deferred.
    pub async fn open(config: &Config, offline: bool) -> Result<Self> {
        let local_pool = db::connect_local(config).await?;
        migrate::migrate_local(&local_pool).await?;
        let local: Arc<dyn LocalStore> = Arc::new(SqliteLocalStore::new(local_pool));

        let (remote, connectivity): (Arc<dyn RemoteStore>, Arc<dyn Connectivity>) =
            match &config.remote.url {
                Some(url) => {
                    let http = HttpRemoteStore::new(
                        url,
                        std::time::Duration::from_secs(config.remote.timeout_secs),
                    )?;
                    let probe: Arc<dyn Connectivity> = Arc::new(http.connectivity());
                    let remote: Arc<dyn RemoteStore> = Arc::new(http);
                    (remote, probe)
                }
                None => {
                    let pool = db::connect_remote(config).await?;
                    migrate::migrate_remote(&pool).await?;
                    let remote: Arc<dyn RemoteStore> = Arc::new(SqliteRemoteStore::new(pool));
                    let probe: Arc<dyn Connectivity> = Arc::new(AlwaysOnline);
                    (remote, probe)
                }
            };
        let connectivity: Arc<dyn Connectivity> = if offline {
            Arc::new(ConnectivityFlag::new(false))
        } else {
            connectivity
        };

        Ok(Self::new(
            local,
            remote,
            connectivity,
            Arc::new(PdfMetadataExtractor::new(config.upload.max_bytes)),
            SyncPolicy::from(&config.sync),
        ))
    }

    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    /// Every record, newest first, plus the syncs this load launched.
    ///
    /// Never waits on the syncs; the returned records are the state before
    /// any of them ran.
    pub async fn load(&self) -> Result<(Vec<Ebook>, SyncBatch)> {
        let records = self.local.get_all().await.context("Failed to read catalog")?;
        let ids: Vec<String> = records
            .iter()
            .filter(|e| self.policy.wants(e.sync_status))
            .map(|e| e.id.clone())
            .collect();
        let batch = self.spawn_syncs(ids);
        Ok((records, batch))
    }

    /// Launches one independent sync task per id.
    pub fn spawn_syncs(&self, ids: Vec<String>) -> SyncBatch {
        if !ids.is_empty() {
            debug!(count = ids.len(), "launching syncs");
        }
        let handles = ids
            .into_iter()
            .map(|id| {
                let agent = self.agent.clone();
                let limiter = self.limiter.clone();
                let task_id = id.clone();
                let handle = tokio::spawn(async move {
                    let _permit = match limiter {
                        Some(sem) => sem.acquire_owned().await.ok(),
                        None => None,
                    };
                    agent.sync(&task_id).await
                });
                (id, handle)
            })
            .collect();
        SyncBatch { handles }
    }

    /// Syncs one record and waits for the outcome.
    pub async fn sync_one(&self, id: &str) -> SyncOutcome {
        self.agent.sync(id).await
    }

    /// Loads the catalog and waits for every sync it launched.
    pub async fn sync_pending(&self) -> Result<SyncReport> {
        let (_, batch) = self.load().await?;
        Ok(batch.join().await)
    }

    pub async fn list(&self) -> Result<Vec<Ebook>> {
        Ok(self.local.get_all().await?)
    }

    pub async fn get(&self, id: &str) -> Result<Ebook> {
        self.local
            .get_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()).into())
    }

    pub async fn find_by_tag(&self, tag: &str) -> Result<Vec<Ebook>> {
        Ok(self.local.get_by_tag(tag).await?)
    }

    /// Creates a manually entered record (`pending`, fresh id, stamped now).
    pub async fn add(&self, new: NewEbook) -> Result<Ebook> {
        let mut ebook = Ebook::new(new.filename.trim());
        ebook.title = non_blank(new.title);
        ebook.author = non_blank(new.author);
        ebook.set_tags(new.tags);
        ebook.metadata = new.metadata.filter(|m| !m.is_empty());
        self.create(ebook).await
    }

    /// Extracts metadata from a document and creates a `pending` record.
    ///
    /// Fails without touching the catalog when the document cannot be
    /// opened.
    pub async fn import(&self, filename: &str, bytes: Vec<u8>) -> Result<Ebook> {
        let extractor = self.extractor.clone();
        let label = filename.to_string();
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&bytes, &label))
            .await
            .context("Extraction task failed")??;
        self.create(extracted.into_ebook(filename)).await
    }

    async fn create(&self, mut ebook: Ebook) -> Result<Ebook> {
        ebook.id = String::new();
        ebook.internal_id = None;
        ebook.uploaded_at = Utc::now();
        ebook.sync_status = SyncStatus::Pending;
        let saved = self.local.save(ebook).await?;
        info!(id = %saved.id, filename = %saved.filename, "ebook added");
        Ok(saved)
    }

    /// Applies a local edit and resets the record to `pending`.
    pub async fn edit(&self, id: &str, edit: EbookEdit) -> Result<Ebook> {
        let mut ebook = self.get(id).await?;
        if let Some(filename) = edit.filename {
            ebook.filename = filename.trim().to_string();
        }
        if let Some(title) = edit.title {
            ebook.title = non_blank(Some(title));
        }
        if let Some(author) = edit.author {
            ebook.author = non_blank(Some(author));
        }
        if let Some(tags) = edit.tags {
            ebook.set_tags(tags);
        }
        ebook.sync_status = SyncStatus::Pending;
        let saved = self.local.save(ebook).await?;
        info!(id = %saved.id, "ebook edited");
        Ok(saved)
    }

    /// Removes the local copy. The server's row, if any, is kept.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if !self.local.delete(id).await? {
            return Err(StoreError::NotFound(id.to_string()).into());
        }
        info!(id, "ebook deleted locally");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use baobab_core::extract::{ExtractError, ExtractedMetadata};
    use baobab_core::store::memory::{InMemoryLocalStore, InMemoryRemoteStore};
    use baobab_core::store::StoreResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Remote that counts attempts per id and misbehaves for chosen filenames.
    #[derive(Default)]
    struct ScriptedRemote {
        inner: InMemoryRemoteStore,
        attempts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedRemote {
        fn attempts_for(&self, id: &str) -> usize {
            self.attempts.lock().unwrap().iter().filter(|a| *a == id).count()
        }
    }

    #[async_trait]
    impl RemoteStore for ScriptedRemote {
        async fn upsert(&self, ebook: &Ebook) -> StoreResult<Ebook> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.attempts.lock().unwrap().push(ebook.id.clone());
            match ebook.filename.as_str() {
                "reject.pdf" => Err(StoreError::Backend("disk full".to_string())),
                "panic.pdf" => panic!("remote exploded"),
                _ => self.inner.upsert(ebook).await,
            }
        }

        async fn get_by_external_id(&self, id: &str) -> StoreResult<Option<Ebook>> {
            self.inner.get_by_external_id(id).await
        }
    }

    struct StubExtractor;

    impl MetadataExtractor for StubExtractor {
        fn extract(&self, bytes: &[u8], filename: &str) -> Result<ExtractedMetadata, ExtractError> {
            if bytes.starts_with(b"%PDF") {
                Ok(ExtractedMetadata {
                    title: Some("Report".to_string()),
                    page_count: Some(3),
                    ..Default::default()
                })
            } else {
                Err(ExtractError::Open {
                    filename: filename.to_string(),
                    reason: "not a pdf".to_string(),
                })
            }
        }
    }

    struct Harness {
        catalog: Catalog,
        remote: Arc<ScriptedRemote>,
        online: Arc<ConnectivityFlag>,
    }

    fn harness(policy: SyncPolicy) -> Harness {
        let remote = Arc::new(ScriptedRemote::default());
        let online = Arc::new(ConnectivityFlag::new(true));
        let catalog = Catalog::new(
            Arc::new(InMemoryLocalStore::new()),
            remote.clone(),
            online.clone(),
            Arc::new(StubExtractor),
            policy,
        );
        Harness {
            catalog,
            remote,
            online,
        }
    }

    fn named(filename: &str) -> NewEbook {
        NewEbook {
            filename: filename.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_add_creates_pending_record_with_id() {
        let h = harness(SyncPolicy::default());
        let added = h
            .catalog
            .add(NewEbook {
                filename: " notes.pdf ".to_string(),
                title: Some("Notes".to_string()),
                author: Some("  ".to_string()),
                tags: vec!["a".to_string(), "a".to_string(), "b".to_string()],
                metadata: None,
            })
            .await
            .unwrap();
        assert!(added.has_id());
        assert_eq!(added.filename, "notes.pdf");
        assert_eq!(added.author, None);
        assert_eq!(added.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(added.sync_status, SyncStatus::Pending);
        assert_eq!(h.catalog.get(&added.id).await.unwrap(), added);
    }

    #[tokio::test]
    async fn test_load_syncs_each_pending_and_error_record_once() {
        let h = harness(SyncPolicy::default());
        let pending = h.catalog.add(named("a.pdf")).await.unwrap();
        let mut errored = h.catalog.add(named("b.pdf")).await.unwrap();
        errored.sync_status = SyncStatus::Error;
        h.catalog.local().save(errored.clone()).await.unwrap();
        let mut synced = h.catalog.add(named("c.pdf")).await.unwrap();
        synced.sync_status = SyncStatus::Synced;
        h.catalog.local().save(synced.clone()).await.unwrap();

        let (records, batch) = h.catalog.load().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(batch.len(), 2);
        let report = batch.join().await;
        assert_eq!(report.synced(), 2);

        assert_eq!(h.remote.attempts_for(&pending.id), 1);
        assert_eq!(h.remote.attempts_for(&errored.id), 1);
        assert_eq!(h.remote.attempts_for(&synced.id), 0);
        for record in h.catalog.list().await.unwrap() {
            assert_eq!(record.sync_status, SyncStatus::Synced);
        }
    }

    #[tokio::test]
    async fn test_errored_records_wait_when_retry_disabled() {
        let h = harness(SyncPolicy {
            retry_errored: false,
            max_in_flight: Some(1),
        });
        let mut errored = h.catalog.add(named("b.pdf")).await.unwrap();
        errored.sync_status = SyncStatus::Error;
        h.catalog.local().save(errored).await.unwrap();

        let (_, batch) = h.catalog.load().await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(h.remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let h = harness(SyncPolicy {
            retry_errored: true,
            max_in_flight: Some(2),
        });
        let good = h.catalog.add(named("good.pdf")).await.unwrap();
        let bad = h.catalog.add(named("reject.pdf")).await.unwrap();
        let boom = h.catalog.add(named("panic.pdf")).await.unwrap();

        let report = h.catalog.sync_pending().await.unwrap();
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.synced(), 1);
        assert_eq!(report.failed(), 2);

        let good = h.catalog.get(&good.id).await.unwrap();
        let bad = h.catalog.get(&bad.id).await.unwrap();
        let boom = h.catalog.get(&boom.id).await.unwrap();
        assert_eq!(good.sync_status, SyncStatus::Synced);
        assert_eq!(bad.sync_status, SyncStatus::Error);
        // The panicking task never got to record an outcome.
        assert_eq!(boom.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_dropped_batch_still_completes() {
        let h = harness(SyncPolicy::default());
        let added = h.catalog.add(named("a.pdf")).await.unwrap();
        let (_, batch) = h.catalog.load().await.unwrap();
        drop(batch);

        for _ in 0..100 {
            if h.catalog.get(&added.id).await.unwrap().sync_status == SyncStatus::Synced {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("detached sync never completed");
    }

    #[tokio::test]
    async fn test_resync_keeps_internal_id() {
        let h = harness(SyncPolicy::default());
        let added = h.catalog.add(named("a.pdf")).await.unwrap();
        let first = h.catalog.sync_one(&added.id).await;
        let second = h.catalog.sync_one(&added.id).await;
        assert_eq!(first, second);
        assert!(second.is_synced());
        assert_eq!(h.remote.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_edit_stays_pending() {
        let h = harness(SyncPolicy::default());
        let added = h.catalog.add(named("a.pdf")).await.unwrap();
        assert!(h.catalog.sync_one(&added.id).await.is_synced());

        h.online.set_online(false);
        let edited = h
            .catalog
            .edit(
                &added.id,
                EbookEdit {
                    title: Some("Renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.sync_status, SyncStatus::Pending);
        assert_eq!(edited.internal_id, h.catalog.get(&added.id).await.unwrap().internal_id);

        assert_eq!(h.catalog.sync_one(&added.id).await, SyncOutcome::Offline);
        let after = h.catalog.get(&added.id).await.unwrap();
        assert_eq!(after.sync_status, SyncStatus::Pending);
        assert_eq!(after.title.as_deref(), Some("Renamed"));

        h.online.set_online(true);
        assert!(h.catalog.sync_one(&added.id).await.is_synced());
        let remote = h.remote.get_by_external_id(&added.id).await.unwrap().unwrap();
        assert_eq!(remote.title.as_deref(), Some("Renamed"));
    }

    #[tokio::test]
    async fn test_edit_clears_blank_fields_and_replaces_tags() {
        let h = harness(SyncPolicy::default());
        let added = h
            .catalog
            .add(NewEbook {
                filename: "a.pdf".to_string(),
                title: Some("Old".to_string()),
                tags: vec!["x".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        let edited = h
            .catalog
            .edit(
                &added.id,
                EbookEdit {
                    title: Some(String::new()),
                    tags: Some(vec!["y".to_string(), " z ".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.title, None);
        assert_eq!(edited.tags, vec!["y".to_string(), "z".to_string()]);
        assert_eq!(edited.uploaded_at, added.uploaded_at);
    }

    #[tokio::test]
    async fn test_find_by_tag() {
        let h = harness(SyncPolicy::default());
        let tagged = h
            .catalog
            .add(NewEbook {
                filename: "a.pdf".to_string(),
                tags: vec!["poetry".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        h.catalog.add(named("b.pdf")).await.unwrap();

        let found = h.catalog.find_by_tag("poetry").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, tagged.id);
        assert!(h.catalog.find_by_tag("prose").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_missing_is_not_found() {
        let h = harness(SyncPolicy::default());
        let err = h.catalog.edit("nope", EbookEdit::default()).await.unwrap_err();
        assert!(err.downcast_ref::<StoreError>().is_some_and(|e| e.is_not_found()));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found_and_catalog_unchanged() {
        let h = harness(SyncPolicy::default());
        h.catalog.add(named("a.pdf")).await.unwrap();
        let before = h.catalog.list().await.unwrap();

        let err = h.catalog.delete("does-not-exist").await.unwrap_err();
        assert!(err.downcast_ref::<StoreError>().is_some_and(|e| e.is_not_found()));
        assert_eq!(h.catalog.list().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_delete_is_local_only() {
        let h = harness(SyncPolicy::default());
        let added = h.catalog.add(named("a.pdf")).await.unwrap();
        h.catalog.sync_one(&added.id).await;

        h.catalog.delete(&added.id).await.unwrap();
        assert!(h.catalog.list().await.unwrap().is_empty());
        assert!(h.remote.get_by_external_id(&added.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_import_then_sync() {
        let h = harness(SyncPolicy::default());
        let imported = h.catalog.import("report.pdf", b"%PDF-1.4".to_vec()).await.unwrap();
        assert_eq!(imported.title.as_deref(), Some("Report"));
        assert_eq!(imported.author, None);
        assert_eq!(imported.sync_status, SyncStatus::Pending);
        assert_eq!(imported.metadata.as_ref().and_then(|m| m.page_count), Some(3));

        let report = h.catalog.sync_pending().await.unwrap();
        assert_eq!(report.synced(), 1);
        let synced = h.catalog.get(&imported.id).await.unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert!(synced.internal_id.is_some());
    }

    #[tokio::test]
    async fn test_import_of_unreadable_document_adds_nothing() {
        let h = harness(SyncPolicy::default());
        let err = h.catalog.import("bad.pdf", b"garbage".to_vec()).await.unwrap_err();
        assert!(err.downcast_ref::<ExtractError>().is_some());
        assert!(h.catalog.list().await.unwrap().is_empty());
    }
}
