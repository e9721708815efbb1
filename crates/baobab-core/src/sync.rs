//! Single-record reconciliation between the local cache and the remote store.
//!
//! [`SyncAgent::sync`] pushes one local record to the [`RemoteStore`] and
//! records the outcome in the record's `sync_status`:
//!
//! ```text
//! lookup ──absent──▶ Missing
//!    │
//! online? ──no──▶ Offline            (status untouched)
//!    │
//! upsert ──err──▶ status = error     Failed
//!    │
//!    └──ok──▶ status = synced, adopt internal id + canonical fields
//!             (edited meanwhile: adopt internal id only)   Superseded
//! ```
//!
//! The agent never returns an error. The authoritative result is the
//! record's status; [`SyncOutcome`] is for reporting only.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::models::{Ebook, SyncStatus};
use crate::store::{LocalStore, RemoteStore, StoreError};

/// Answers whether the remote store is worth contacting right now.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Connectivity that never reports offline.
pub struct AlwaysOnline;

#[async_trait]
impl Connectivity for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

/// Connectivity switched by hand (CLI `--offline`, tests).
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connectivity for ConnectivityFlag {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// What a single [`SyncAgent::sync`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No local record with that id (before or after the remote call).
    Missing,
    /// Deferred; status left as it was.
    Offline,
    /// Record is now `synced` with this internal id.
    Synced { internal_id: i64 },
    /// Pushed, but the local record was edited while the push was in
    /// flight; only the internal id was adopted and the status kept.
    Superseded { internal_id: i64 },
    /// Record marked `error` (or could not be read/written locally).
    Failed { reason: String },
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced { .. })
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Missing => f.write_str("missing"),
            SyncOutcome::Offline => f.write_str("offline"),
            SyncOutcome::Synced { internal_id } => write!(f, "synced (internal id {})", internal_id),
            SyncOutcome::Superseded { internal_id } => {
                write!(f, "edited during sync (internal id {})", internal_id)
            }
            SyncOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Pushes local records to the remote store.
///
/// Holds explicitly injected store handles; clone the `Arc` to share one
/// agent across tasks.
pub struct SyncAgent {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<dyn Connectivity>,
}

impl SyncAgent {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            local,
            remote,
            connectivity,
        }
    }

    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    /// Reconciles the local record `id` with the remote store.
    pub async fn sync(&self, id: &str) -> SyncOutcome {
        let record = match self.local.get_by_id(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(id, "nothing to sync");
                return SyncOutcome::Missing;
            }
            Err(e) => {
                warn!(id, error = %e, "could not read local record");
                return SyncOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if !self.connectivity.is_online().await {
            debug!(id, status = %record.sync_status, "offline, sync deferred");
            return SyncOutcome::Offline;
        }

        match self.remote.upsert(&record).await {
            Ok(persisted) if persisted.internal_id.is_some() => {
                self.record_success(&record, &persisted).await
            }
            Ok(_) => {
                let err = StoreError::Backend("remote returned no internal id".to_string());
                self.record_failure(id, err).await
            }
            Err(e) => self.record_failure(id, e).await,
        }
    }

    async fn record_success(&self, pushed: &Ebook, persisted: &Ebook) -> SyncOutcome {
        let id = pushed.id.as_str();
        let Some(mut current) = self.reload(id).await else {
            return SyncOutcome::Missing;
        };
        let edited = !current.same_content(pushed);
        if edited {
            current.adopt_internal_id(persisted);
        } else {
            current.apply_canonical(persisted);
        }
        let internal_id = current.internal_id.unwrap_or_default();
        match self.local.save(current).await {
            Ok(_) if edited => {
                info!(id, internal_id, "ebook edited during sync, left for next push");
                SyncOutcome::Superseded { internal_id }
            }
            Ok(_) => {
                info!(id, internal_id, "ebook synced");
                SyncOutcome::Synced { internal_id }
            }
            Err(e) => {
                warn!(id, error = %e, "synced remotely but could not update local record");
                SyncOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn record_failure(&self, id: &str, err: StoreError) -> SyncOutcome {
        warn!(id, error = %err, "sync failed");
        let reason = err.to_string();
        let Some(mut current) = self.reload(id).await else {
            return SyncOutcome::Missing;
        };
        current.sync_status = SyncStatus::Error;
        if let Err(e) = self.local.save(current).await {
            warn!(id, error = %e, "could not record sync failure");
        }
        SyncOutcome::Failed { reason }
    }

    /// Re-reads the record before writing an outcome so that a record
    /// deleted mid-sync is not resurrected.
    async fn reload(&self, id: &str) -> Option<Ebook> {
        match self.local.get_by_id(id).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                debug!(id, "record deleted during sync");
                None
            }
            Err(e) => {
                warn!(id, error = %e, "could not reload local record");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{InMemoryLocalStore, InMemoryRemoteStore};
    use crate::store::StoreResult;

    struct RejectingRemote;

    #[async_trait]
    impl RemoteStore for RejectingRemote {
        async fn upsert(&self, _ebook: &Ebook) -> StoreResult<Ebook> {
            Err(StoreError::Rejected {
                status: 500,
                message: "boom".to_string(),
            })
        }

        async fn get_by_external_id(&self, _id: &str) -> StoreResult<Option<Ebook>> {
            Ok(None)
        }
    }

    /// Holds every upsert until released, so tests can edit mid-push.
    #[derive(Default)]
    struct GatedRemote {
        inner: InMemoryRemoteStore,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl RemoteStore for GatedRemote {
        async fn upsert(&self, ebook: &Ebook) -> StoreResult<Ebook> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.upsert(ebook).await
        }

        async fn get_by_external_id(&self, id: &str) -> StoreResult<Option<Ebook>> {
            self.inner.get_by_external_id(id).await
        }
    }

    fn agent_with(
        local: Arc<InMemoryLocalStore>,
        remote: Arc<dyn RemoteStore>,
        online: bool,
    ) -> SyncAgent {
        SyncAgent::new(local, remote, Arc::new(ConnectivityFlag::new(online)))
    }

    async fn saved(local: &InMemoryLocalStore, title: &str) -> Ebook {
        let mut ebook = Ebook::new(format!("{}.pdf", title.to_lowercase()));
        ebook.title = Some(title.to_string());
        local.save(ebook).await.unwrap()
    }

    #[tokio::test]
    async fn test_sync_success_adopts_internal_id() {
        let local = Arc::new(InMemoryLocalStore::new());
        let remote = Arc::new(InMemoryRemoteStore::new());
        let agent = agent_with(local.clone(), remote.clone(), true);
        let ebook = saved(&local, "Report").await;

        let outcome = agent.sync(&ebook.id).await;
        assert!(outcome.is_synced());

        let after = local.get_by_id(&ebook.id).await.unwrap().unwrap();
        assert_eq!(after.sync_status, SyncStatus::Synced);
        assert!(after.internal_id.is_some());
        let row = remote.get_by_external_id(&ebook.id).await.unwrap().unwrap();
        assert_eq!(row.internal_id, after.internal_id);
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let local = Arc::new(InMemoryLocalStore::new());
        let remote = Arc::new(InMemoryRemoteStore::new());
        let agent = agent_with(local.clone(), remote.clone(), true);
        let ebook = saved(&local, "Report").await;

        agent.sync(&ebook.id).await;
        let first = local.get_by_id(&ebook.id).await.unwrap().unwrap();
        agent.sync(&ebook.id).await;
        let second = local.get_by_id(&ebook.id).await.unwrap().unwrap();

        assert_eq!(second.sync_status, SyncStatus::Synced);
        assert_eq!(second.internal_id, first.internal_id);
        assert_eq!(remote.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_leaves_status_unchanged() {
        let local = Arc::new(InMemoryLocalStore::new());
        let agent = agent_with(local.clone(), Arc::new(RejectingRemote), false);
        let mut ebook = saved(&local, "Report").await;
        ebook.sync_status = SyncStatus::Error;
        local.save(ebook.clone()).await.unwrap();

        assert_eq!(agent.sync(&ebook.id).await, SyncOutcome::Offline);
        let after = local.get_by_id(&ebook.id).await.unwrap().unwrap();
        assert_eq!(after.sync_status, SyncStatus::Error);
    }

    #[tokio::test]
    async fn test_remote_failure_marks_error() {
        let local = Arc::new(InMemoryLocalStore::new());
        let agent = agent_with(local.clone(), Arc::new(RejectingRemote), true);
        let ebook = saved(&local, "Report").await;

        let outcome = agent.sync(&ebook.id).await;
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        let after = local.get_by_id(&ebook.id).await.unwrap().unwrap();
        assert_eq!(after.sync_status, SyncStatus::Error);
        assert_eq!(after.internal_id, None);
    }

    #[tokio::test]
    async fn test_missing_record_is_silent() {
        let local = Arc::new(InMemoryLocalStore::new());
        let agent = agent_with(local.clone(), Arc::new(RejectingRemote), true);
        assert_eq!(agent.sync("no-such-id").await, SyncOutcome::Missing);
        assert!(local.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_internal_id_marks_error() {
        let local = Arc::new(InMemoryLocalStore::new());
        let remote = Arc::new(InMemoryRemoteStore::new());
        let agent = agent_with(local.clone(), remote, true);
        let mut ebook = saved(&local, "Orphan").await;
        ebook.internal_id = Some(41);
        local.save(ebook.clone()).await.unwrap();

        let outcome = agent.sync(&ebook.id).await;
        match outcome {
            SyncOutcome::Failed { reason } => assert!(reason.contains("not found")),
            other => panic!("expected failure, got {}", other),
        }
        let after = local.get_by_id(&ebook.id).await.unwrap().unwrap();
        assert_eq!(after.sync_status, SyncStatus::Error);
    }

    #[tokio::test]
    async fn test_edit_during_push_stays_pending() {
        let local = Arc::new(InMemoryLocalStore::new());
        let remote = Arc::new(GatedRemote::default());
        let agent = Arc::new(agent_with(local.clone(), remote.clone(), true));
        let ebook = saved(&local, "Original").await;

        let task = {
            let agent = agent.clone();
            let id = ebook.id.clone();
            tokio::spawn(async move { agent.sync(&id).await })
        };
        remote.entered.notified().await;
        let mut edited = local.get_by_id(&ebook.id).await.unwrap().unwrap();
        edited.title = Some("Edited".to_string());
        edited.sync_status = SyncStatus::Pending;
        local.save(edited).await.unwrap();
        remote.release.notify_one();

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Superseded { .. }), "{}", outcome);
        let after = local.get_by_id(&ebook.id).await.unwrap().unwrap();
        assert_eq!(after.title.as_deref(), Some("Edited"));
        assert_eq!(after.sync_status, SyncStatus::Pending);
        assert!(after.internal_id.is_some());
        let row = remote.inner.get_by_external_id(&ebook.id).await.unwrap().unwrap();
        assert_eq!(row.title.as_deref(), Some("Original"));

        remote.release.notify_one();
        assert!(agent.sync(&ebook.id).await.is_synced());
        let row = remote.inner.get_by_external_id(&ebook.id).await.unwrap().unwrap();
        assert_eq!(row.title.as_deref(), Some("Edited"));
        assert_eq!(row.internal_id, after.internal_id);
        assert_eq!(remote.inner.len(), 1);
    }
}
