//! Sync orchestrator.
//!
//! [`SyncEngine`] drives the read → merge → apply cycle for the extensions
//! synchronizable. It moves `Idle → Syncing → Idle` around every `pull`,
//! `push` and `sync` call; a call that finds the engine already syncing is a
//! silent no-op. A `sync` whose remote write loses the race against another
//! machine restarts from scratch, up to [`SyncConfig::max_sync_attempts`].

use crate::applicator::{ApplyPlan, ApplyReport, Applicator};
use crate::config::{Configuration, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::events::SyncStatus;
use crate::local::{ExtensionEnablement, ExtensionGallery, ExtensionManagement, LocalStateReader};
use crate::merge::{merge, MergeResult};
use crate::queue::SerialQueue;
use crate::remote::{Precondition, RemoteRecord, RemoteStore, SyncData};
use crate::state::{LastSyncRecord, LastSyncStore};
use extsync_storage::DurableStore;
use extsync_types::{ExtensionIdentifier, Snapshot, SyncExtension};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Collaborators the engine is wired to.
#[derive(Clone)]
pub struct SyncServices {
    pub management: Arc<dyn ExtensionManagement>,
    pub gallery: Arc<dyn ExtensionGallery>,
    pub enablement: Arc<dyn ExtensionEnablement>,
    pub remote: Arc<dyn RemoteStore>,
    /// Holds the last-sync checkpoint.
    pub storage: Arc<dyn DurableStore>,
    pub configuration: Arc<dyn Configuration>,
}

/// How a `pull`, `push` or `sync` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The feature or the gallery is disabled.
    Disabled,
    /// Another operation is in flight.
    AlreadySyncing,
    /// `pull` found nothing on the remote.
    NoRemoteData,
    Completed(SyncReport),
}

impl SyncOutcome {
    /// Returns the report of a completed operation.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Summary of a completed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// The merge that was applied.
    pub merge: MergeResult,
    /// Skip list persisted with the checkpoint.
    pub skipped: Vec<SyncExtension>,
    pub remote_written: bool,
    pub checkpoint_written: bool,
    /// Cycles run, including those lost to conflicts.
    pub attempts: usize,
}

impl SyncReport {
    fn new(merge: MergeResult, applied: ApplyReport, attempts: usize) -> Self {
        Self {
            merge,
            skipped: applied.skipped,
            remote_written: applied.remote_written,
            checkpoint_written: applied.checkpoint_written,
            attempts,
        }
    }
}

/// The extensions sync engine.
pub struct SyncEngine {
    config: SyncConfig,
    gallery: Arc<dyn ExtensionGallery>,
    remote: Arc<dyn RemoteStore>,
    configuration: Arc<dyn Configuration>,
    local: LocalStateReader,
    last_sync: LastSyncStore,
    applicator: Applicator,
    /// Lane shared by every remote mutation made from this process.
    queue: Arc<SerialQueue>,
    status: watch::Sender<SyncStatus>,
}

impl SyncEngine {
    /// Creates a new engine in the `Idle` state.
    pub fn new(services: SyncServices, config: SyncConfig) -> Self {
        let SyncServices {
            management,
            gallery,
            enablement,
            remote,
            storage,
            configuration,
        } = services;

        let queue = Arc::new(SerialQueue::new());
        let last_sync = LastSyncStore::new(storage, config.last_sync_path.clone());
        let applicator = Applicator::new(
            management.clone(),
            gallery.clone(),
            enablement.clone(),
            remote.clone(),
            last_sync.clone(),
            queue.clone(),
            config.remote_key.clone(),
        );
        let (status, _) = watch::channel(SyncStatus::Idle);

        Self {
            local: LocalStateReader::new(management, enablement),
            config,
            gallery,
            remote,
            configuration,
            last_sync,
            applicator,
            queue,
            status,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Subscribes to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Returns true if extension sync is switched on and the gallery is
    /// available. An unset flag counts as on.
    pub fn is_enabled(&self) -> bool {
        self.configuration
            .get_bool(&self.config.enable_key)
            .unwrap_or(true)
            && self.gallery.is_enabled()
    }

    /// The live ignore list.
    pub fn ignored_extensions(&self) -> Vec<String> {
        self.configuration.get_string_list(&self.config.ignored_key)
    }

    fn is_ignored(&self, identifier: &ExtensionIdentifier) -> bool {
        self.ignored_extensions()
            .iter()
            .any(|id| identifier.matches_id(id.trim()))
    }

    /// Moves `Idle → Syncing`. Returns `None` if already syncing.
    fn begin(&self) -> Option<StatusGuard<'_>> {
        let entered = self.status.send_if_modified(|status| match status {
            SyncStatus::Idle => {
                *status = SyncStatus::Syncing;
                true
            }
            SyncStatus::Syncing => false,
        });
        entered.then(|| StatusGuard(&self.status))
    }

    /// Checks the feature flag and the status gate.
    fn enter(&self, operation: &str) -> Result<StatusGuard<'_>, SyncOutcome> {
        if !self.is_enabled() {
            info!("Extensions: Skipped {} as extensions sync is disabled.", operation);
            return Err(SyncOutcome::Disabled);
        }
        match self.begin() {
            Some(guard) => Ok(guard),
            None => {
                debug!("Extensions: Skipped {} as a sync is in progress.", operation);
                Err(SyncOutcome::AlreadySyncing)
            }
        }
    }

    // ── Operations ──────────────────────────────────────────────

    /// Replaces local extensions with whatever the remote declares.
    ///
    /// Nothing is uninstalled. Local-only extensions are kept and published.
    pub async fn pull(&self) -> SyncResult<SyncOutcome> {
        let _guard = match self.enter("pulling") {
            Ok(guard) => guard,
            Err(outcome) => return Ok(outcome),
        };
        info!("Extensions: Started pulling extensions...");

        let remote_record = self.remote.read(&self.config.remote_key, None).await?;
        let Some(remote) = remote_record.snapshot()? else {
            info!("Extensions: Remote extensions does not exist.");
            return Ok(SyncOutcome::NoRemoteData);
        };

        let last_sync = self.last_sync.read().await?;
        let local = self.local.snapshot().await?;
        let result = merge(
            &local,
            Some(&remote),
            Some(&Snapshot::new()),
            &[],
            &self.ignored_extensions(),
        );

        let plan = ApplyPlan {
            merge: result.clone(),
            remote_record,
            last_sync,
        };
        let applied = self.applicator.apply(plan, false).await?;
        info!("Extensions: Finished pulling extensions.");
        Ok(SyncOutcome::Completed(SyncReport::new(result, applied, 1)))
    }

    /// Overwrites the remote with the local extensions.
    ///
    /// The write is unconditional, so concurrent remote changes are lost.
    pub async fn push(&self) -> SyncResult<SyncOutcome> {
        let _guard = match self.enter("pushing") {
            Ok(guard) => guard,
            Err(outcome) => return Ok(outcome),
        };
        info!("Extensions: Started pushing extensions...");

        let local = self.local.snapshot().await?;
        let mut result = merge(&local, None, None, &[], &self.ignored_extensions());
        if result.remote.is_none() {
            result.remote = Some(Snapshot::new());
        }

        let remote_record = self.remote.read(&self.config.remote_key, None).await?;
        let last_sync = self.last_sync.read().await?;
        let plan = ApplyPlan {
            merge: result.clone(),
            remote_record,
            last_sync,
        };
        let applied = self.applicator.apply(plan, true).await?;
        info!("Extensions: Finished pushing extensions.");
        Ok(SyncOutcome::Completed(SyncReport::new(result, applied, 1)))
    }

    /// Runs a full three-way sync cycle.
    ///
    /// Fails with [`SyncError::TooManyConflicts`] once every attempt has lost
    /// the race against another writer.
    pub async fn sync(&self) -> SyncResult<SyncOutcome> {
        let _guard = match self.enter("synchronizing") {
            Ok(guard) => guard,
            Err(outcome) => return Ok(outcome),
        };
        info!("Extensions: Started synchronizing extensions...");

        let attempts = self.config.max_sync_attempts.max(1);
        for attempt in 1..=attempts {
            match self.sync_once(attempt).await {
                Ok(report) => {
                    info!("Extensions: Finished synchronizing extensions.");
                    return Ok(SyncOutcome::Completed(report));
                }
                Err(e) if e.is_conflict() => {
                    info!(
                        "Extensions: Failed to synchronize as there is a new remote version available (attempt {}/{}).",
                        attempt, attempts
                    );
                }
                Err(e) => {
                    error!("Extensions: Failed to synchronize extensions: {}", e);
                    return Err(e);
                }
            }
        }

        warn!("Extensions: Giving up after {} conflicting attempts.", attempts);
        Err(SyncError::TooManyConflicts { attempts })
    }

    /// One read → merge → apply pass. Everything is re-read on each attempt;
    /// only the first may reuse the checkpointed remote content.
    async fn sync_once(&self, attempt: usize) -> SyncResult<SyncReport> {
        let last_sync = self.last_sync.read().await?;
        let known = if attempt == 1 {
            last_sync.as_ref().map(LastSyncRecord::remote_record)
        } else {
            None
        };
        let remote_record = self
            .remote
            .read(&self.config.remote_key, known.as_ref())
            .await?;
        let remote = remote_record.snapshot()?;

        let base = last_sync.as_ref().and_then(|record| match record.snapshot() {
            Ok(base) => base,
            Err(e) => {
                warn!("Extensions: Ignoring unreadable last synchronized extensions: {}", e);
                None
            }
        });
        let skipped = last_sync
            .as_ref()
            .map(|record| record.skipped_extensions.clone())
            .unwrap_or_default();

        let local = self.local.snapshot().await?;
        let result = merge(
            &local,
            remote.as_ref(),
            base.as_ref(),
            &skipped,
            &self.ignored_extensions(),
        );
        debug!(
            "Extensions: Merged {} local, {} remote: {} added, {} updated, {} removed, remote {}",
            local.len(),
            remote.as_ref().map_or(0, Snapshot::len),
            result.added.len(),
            result.updated.len(),
            result.removed.len(),
            if result.remote.is_some() { "changed" } else { "unchanged" },
        );

        let plan = ApplyPlan {
            merge: result.clone(),
            remote_record,
            last_sync,
        };
        let applied = self.applicator.apply(plan, false).await?;
        Ok(SyncReport::new(result, applied, attempt))
    }

    /// Removes `identifier` from the remote snapshot without touching local
    /// state or the checkpoint.
    ///
    /// Returns true if the remote was rewritten. Ignored extensions are never
    /// removed. Runs on the serial queue, not behind the status gate.
    pub async fn remove_extension(&self, identifier: &ExtensionIdentifier) -> SyncResult<bool> {
        if self.is_ignored(identifier) {
            info!("Extensions: Not removing ignored extension {} from remote.", identifier);
            return Ok(false);
        }
        self.queue.run(self.remove_from_remote(identifier)).await
    }

    async fn remove_from_remote(&self, identifier: &ExtensionIdentifier) -> SyncResult<bool> {
        let record: RemoteRecord = self.remote.read(&self.config.remote_key, None).await?;
        let Some(mut snapshot) = record.snapshot()? else {
            return Ok(false);
        };
        if snapshot.remove(identifier) == 0 {
            debug!("Extensions: {} is not in remote extensions.", identifier);
            return Ok(false);
        }

        let content = SyncData::from_snapshot(&snapshot)?.to_json()?;
        let new_ref = self
            .remote
            .write(
                &self.config.remote_key,
                &content,
                Precondition::Expect(record.remote_ref.clone()),
            )
            .await?;
        info!("Extensions: Removed {} from remote extensions (ref {}).", identifier, new_ref);
        Ok(true)
    }

    // ── Local state ─────────────────────────────────────────────

    /// Deletes the last-sync checkpoint, so the next sync has no history.
    pub async fn reset_local(&self) -> SyncResult<()> {
        self.last_sync.reset().await?;
        info!("Extensions: Reset local sync state.");
        Ok(())
    }

    /// Returns true if this machine has completed a sync before.
    pub async fn has_previously_synced(&self) -> SyncResult<bool> {
        self.last_sync.exists().await
    }

    /// Returns true if any non-ignored extension is installed locally.
    pub async fn has_local_data(&self) -> SyncResult<bool> {
        let ignored = self.ignored_extensions();
        let local = self.local.snapshot().await?;
        Ok(local
            .iter()
            .any(|e| !ignored.iter().any(|id| e.identifier.matches_id(id.trim()))))
    }

    // ── Unsupported ─────────────────────────────────────────────

    /// Extensions sync never stops on a conflict, so there is nothing to
    /// restart.
    ///
    /// # Panics
    ///
    /// Always.
    pub fn restart(&self) -> ! {
        panic!("extensions sync does not support restart")
    }

    /// Extensions sync resolves every conflict during merge.
    ///
    /// # Panics
    ///
    /// Always.
    pub fn resolve_conflicts(&self) -> ! {
        panic!("extensions sync has no conflicts to resolve")
    }
}

/// Returns the engine to `Idle` when an operation ends, however it ends.
struct StatusGuard<'a>(&'a watch::Sender<SyncStatus>);

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(SyncStatus::Idle);
    }
}
