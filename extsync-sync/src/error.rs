//! Error types for the sync layer.

use crate::remote::{RemoteRecord, RemoteRef};
use extsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local durable storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed snapshot payload.
    #[error("invalid payload: {0}")]
    Payload(#[from] extsync_types::Error),

    /// Remote store transport failure.
    #[error("remote store error: {0}")]
    Remote(String),

    /// The remote rejected a write because its ref moved on.
    #[error("remote rejected write: expected ref {expected:?}, current ref {:?}", .current.remote_ref)]
    Conflict {
        expected: Option<RemoteRef>,
        current: Box<RemoteRecord>,
    },

    /// Every sync attempt lost the race against another writer.
    #[error("gave up after {attempts} attempts rejected by newer remote versions")]
    TooManyConflicts { attempts: usize },

    /// Remote content was written by a newer client.
    #[error("remote content version {found} is newer than supported version {supported}")]
    IncompatibleRemoteContent { found: u32, supported: u32 },

    /// Gallery lookup failure.
    #[error("gallery error: {0}")]
    Gallery(String),

    /// Extension installation failure.
    #[error("failed to install {id}: {reason}")]
    Install { id: String, reason: String },

    /// Extension removal failure.
    #[error("failed to uninstall {id}: {reason}")]
    Uninstall { id: String, reason: String },

    /// Enable/disable store failure.
    #[error("enablement error: {0}")]
    Enablement(String),
}

impl SyncError {
    /// Returns true for an optimistic-concurrency rejection.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
