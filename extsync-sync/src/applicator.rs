//! Apply engine - commits a merge result.
//!
//! Side effects happen in a fixed order: local mutations, then the remote
//! write, then the last-sync checkpoint. A failure at any step leaves the
//! later steps undone, so the checkpoint never runs ahead of the remote or
//! of the local extensions.
//!
//! Per-extension failures (not in the gallery, install or enablement error)
//! move the extension into the skip list instead of failing the cycle.

use crate::error::SyncResult;
use crate::local::{
    ExtensionEnablement, ExtensionGallery, ExtensionKind, ExtensionManagement, InstalledExtension,
};
use crate::merge::MergeResult;
use crate::queue::SerialQueue;
use crate::remote::{Precondition, RemoteRecord, RemoteStore, SyncData};
use crate::state::{LastSyncRecord, LastSyncStore};
use extsync_types::{ExtensionIdentifier, SyncExtension};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything [`Applicator::apply`] needs besides the collaborators.
#[derive(Debug, Clone)]
pub struct ApplyPlan {
    pub merge: MergeResult,
    /// The remote record the merge was computed against.
    pub remote_record: RemoteRecord,
    /// The checkpoint the merge was computed against.
    pub last_sync: Option<LastSyncRecord>,
}

/// What [`Applicator::apply`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Skip list after local application.
    pub skipped: Vec<SyncExtension>,
    pub remote_written: bool,
    pub checkpoint_written: bool,
    /// Remote record after the write, or the one read if nothing was written.
    pub remote_record: RemoteRecord,
}

enum ItemOutcome {
    Applied,
    Skipped,
}

/// Applies merge results to the local machine, the remote and the checkpoint.
pub struct Applicator {
    management: Arc<dyn ExtensionManagement>,
    gallery: Arc<dyn ExtensionGallery>,
    enablement: Arc<dyn ExtensionEnablement>,
    remote: Arc<dyn RemoteStore>,
    last_sync: LastSyncStore,
    queue: Arc<SerialQueue>,
    remote_key: String,
}

impl Applicator {
    pub fn new(
        management: Arc<dyn ExtensionManagement>,
        gallery: Arc<dyn ExtensionGallery>,
        enablement: Arc<dyn ExtensionEnablement>,
        remote: Arc<dyn RemoteStore>,
        last_sync: LastSyncStore,
        queue: Arc<SerialQueue>,
        remote_key: impl Into<String>,
    ) -> Self {
        Self {
            management,
            gallery,
            enablement,
            remote,
            last_sync,
            queue,
            remote_key: remote_key.into(),
        }
    }

    /// Commits `plan`.
    ///
    /// With `force_push` the remote write skips the ref check.
    pub async fn apply(&self, plan: ApplyPlan, force_push: bool) -> SyncResult<ApplyReport> {
        let ApplyPlan {
            merge,
            mut remote_record,
            last_sync,
        } = plan;

        if !merge.has_changes() {
            info!("Extensions: No changes found during synchronizing extensions.");
        }

        let skipped = if merge.has_local_changes() {
            debug!("Extensions: Updating local extensions...");
            let skipped = self.update_local(&merge).await?;
            info!("Extensions: Updated local extensions.");
            skipped
        } else {
            merge.skipped.clone()
        };

        let mut remote_written = false;
        if let Some(snapshot) = &merge.remote {
            debug!("Extensions: Updating remote extensions...");
            let content = SyncData::from_snapshot(snapshot)?.to_json()?;
            let precondition = if force_push {
                Precondition::Unconditional
            } else {
                Precondition::Expect(remote_record.remote_ref.clone())
            };
            let new_ref = self
                .queue
                .run(self.remote.write(&self.remote_key, &content, precondition))
                .await?;
            info!("Extensions: Updated remote extensions (ref {}).", new_ref);
            remote_record = RemoteRecord::new(new_ref, content);
            remote_written = true;
        }

        let mut checkpoint_written = false;
        if remote_record.has_content() {
            let record = LastSyncRecord::from_remote(&remote_record, skipped.clone());
            if last_sync.as_ref() != Some(&record) {
                debug!("Extensions: Updating last synchronized extensions...");
                self.last_sync.write(&record).await?;
                info!("Extensions: Updated last synchronized extensions.");
                checkpoint_written = true;
            }
        }

        Ok(ApplyReport {
            skipped,
            remote_written,
            checkpoint_written,
            remote_record,
        })
    }

    /// Uninstalls, installs and updates local extensions, returning the new
    /// skip list.
    async fn update_local(&self, merge: &MergeResult) -> SyncResult<Vec<SyncExtension>> {
        let mut cleared: Vec<ExtensionIdentifier> = Vec::new();
        let mut failed: Vec<SyncExtension> = Vec::new();

        if !merge.removed.is_empty() {
            let installed = self.management.list_installed().await?;
            let targets: Vec<InstalledExtension> = installed
                .into_iter()
                .filter(|e| e.kind == ExtensionKind::User)
                .filter(|e| merge.removed.iter().any(|r| r.is_same(&e.identifier)))
                .collect();

            // Every started uninstall runs to completion before a failure aborts the cycle.
            join_all(targets.iter().map(|target| async move {
                debug!("Extensions: Removing local extension {}...", target.identifier);
                self.management.uninstall(target).await?;
                info!("Extensions: Removed local extension {}.", target.identifier);
                SyncResult::Ok(())
            }))
            .await
            .into_iter()
            .collect::<SyncResult<Vec<()>>>()?;
            cleared.extend(merge.removed.iter().cloned());
        }

        if !merge.added.is_empty() || !merge.updated.is_empty() {
            let installed = self.management.list_installed().await?;
            let entries: Vec<&SyncExtension> = merge.added.iter().chain(&merge.updated).collect();
            let outcomes = join_all(entries.iter().map(|e| self.apply_entry(e, &installed))).await;

            for (entry, outcome) in entries.into_iter().zip(outcomes) {
                match outcome {
                    ItemOutcome::Applied => cleared.push(entry.identifier.clone()),
                    ItemOutcome::Skipped => failed.push(entry.clone()),
                }
            }
        }

        let mut skipped: Vec<SyncExtension> = merge
            .skipped
            .iter()
            .filter(|s| !cleared.iter().any(|c| c.is_same(&s.identifier)))
            .cloned()
            .collect();
        for entry in failed {
            if !skipped.iter().any(|s| s.identifier.is_same(&entry.identifier)) {
                skipped.push(entry);
            }
        }
        Ok(skipped)
    }

    async fn apply_entry(
        &self,
        entry: &SyncExtension,
        installed: &[InstalledExtension],
    ) -> ItemOutcome {
        let existing = installed
            .iter()
            .find(|i| i.identifier.is_same(&entry.identifier));

        if let Some(system) = existing.filter(|e| e.kind == ExtensionKind::System) {
            return match self.set_enablement(&system.identifier, entry.enabled).await {
                Ok(()) => ItemOutcome::Applied,
                Err(e) => {
                    warn!("Extensions: Skipping synchronizing extension {}: {}", entry.identifier, e);
                    ItemOutcome::Skipped
                }
            };
        }

        let package = match self
            .gallery
            .resolve_compatible(&entry.identifier, &entry.version)
            .await
        {
            Ok(Some(package)) => package,
            Ok(None) => {
                warn!(
                    "Extensions: Skipping synchronizing extension {}: version {} not found in gallery",
                    entry.identifier, entry.version
                );
                return ItemOutcome::Skipped;
            }
            Err(e) => {
                warn!("Extensions: Skipping synchronizing extension {}: {}", entry.identifier, e);
                return ItemOutcome::Skipped;
            }
        };

        if existing.is_none_or(|e| e.version != package.version) {
            debug!("Extensions: Installing {}@{}...", package.identifier, package.version);
            if let Err(e) = self.management.install(&package).await {
                warn!("Extensions: Skipping synchronizing extension {}: {}", package.label(), e);
                return ItemOutcome::Skipped;
            }
            info!("Extensions: Installed {}@{}.", package.identifier, package.version);
        }

        if let Err(e) = self.set_enablement(&package.identifier, entry.enabled).await {
            warn!("Extensions: Skipping synchronizing extension {}: {}", package.label(), e);
            return ItemOutcome::Skipped;
        }
        ItemOutcome::Applied
    }

    async fn set_enablement(&self, identifier: &ExtensionIdentifier, enabled: bool) -> SyncResult<()> {
        if enabled {
            self.enablement.enable(identifier).await
        } else {
            self.enablement.disable(identifier).await
        }
    }
}
