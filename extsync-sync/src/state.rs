//! Last-sync checkpoint.
//!
//! Persists, per synchronizable, the remote record this machine last
//! reconciled with plus the extensions that failed to apply locally. The
//! checkpoint is the merge base for the next cycle.

use crate::error::SyncResult;
use crate::remote::{RemoteRecord, RemoteRef};
use extsync_storage::{DurableStore, StorageError};
use extsync_types::{Snapshot, SyncExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The durable checkpoint.
///
/// Persisted as `{"ref": ..., "content": ..., "skippedExtensions": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastSyncRecord {
    #[serde(rename = "ref")]
    pub remote_ref: Option<RemoteRef>,
    pub content: Option<String>,
    #[serde(default)]
    pub skipped_extensions: Vec<SyncExtension>,
}

impl LastSyncRecord {
    /// Combines a remote record with the skip list computed for it.
    pub fn from_remote(record: &RemoteRecord, skipped_extensions: Vec<SyncExtension>) -> Self {
        Self {
            remote_ref: record.remote_ref.clone(),
            content: record.content.clone(),
            skipped_extensions,
        }
    }

    /// The remote part of the checkpoint.
    pub fn remote_record(&self) -> RemoteRecord {
        RemoteRecord {
            remote_ref: self.remote_ref.clone(),
            content: self.content.clone(),
        }
    }

    /// Decodes the checkpointed snapshot, if any.
    pub fn snapshot(&self) -> SyncResult<Option<Snapshot>> {
        self.remote_record().snapshot()
    }
}

/// Reads and writes the checkpoint through a [`DurableStore`].
#[derive(Clone)]
pub struct LastSyncStore {
    store: Arc<dyn DurableStore>,
    path: PathBuf,
}

impl LastSyncStore {
    pub fn new(store: Arc<dyn DurableStore>, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the checkpoint.
    ///
    /// A missing or unreadable checkpoint means no history: `Ok(None)`.
    pub async fn read(&self) -> SyncResult<Option<LastSyncRecord>> {
        let bytes = match self.store.read_file(&self.path).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                debug!("No last-sync checkpoint at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => {
                warn!("Failed to read last-sync checkpoint {:?}: {}", self.path, e);
                return Ok(None);
            }
        };

        match serde_json::from_slice::<LastSyncRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Discarding malformed last-sync checkpoint {:?}: {}", self.path, e);
                Ok(None)
            }
        }
    }

    /// Replaces the checkpoint.
    pub async fn write(&self, record: &LastSyncRecord) -> SyncResult<()> {
        let bytes = serde_json::to_vec(record)?;
        self.store.write_file(&self.path, &bytes).await?;
        debug!(
            "Wrote last-sync checkpoint (ref {:?}, {} skipped)",
            record.remote_ref,
            record.skipped_extensions.len()
        );
        Ok(())
    }

    /// Deletes the checkpoint. A missing checkpoint is not an error.
    pub async fn reset(&self) -> SyncResult<()> {
        match self.store.delete_file(&self.path).await {
            Ok(()) => {
                info!("Deleted last-sync checkpoint {:?}", self.path);
                Ok(())
            }
            Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns true if a checkpoint exists.
    pub async fn exists(&self) -> SyncResult<bool> {
        Ok(self.store.exists(&self.path).await?)
    }
}
