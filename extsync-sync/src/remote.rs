//! Remote store client.
//!
//! The remote holds one named blob per synchronizable under optimistic
//! concurrency. Every successful write produces a fresh opaque [`RemoteRef`];
//! a conditional write whose expected ref no longer matches fails with
//! [`SyncError::Conflict`] and never overwrites newer content.
//!
//! The blob itself is a [`SyncData`] envelope: a format version plus the
//! JSON-serialized snapshot.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use extsync_types::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Highest [`SyncData::version`] this client understands.
pub const SYNC_DATA_VERSION: u32 = 1;

/// Opaque version token issued by the remote store.
///
/// Compared for equality, never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRef(String);

impl RemoteRef {
    /// Wraps an existing token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Issues a fresh, time-ordered token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the remote store holds for a key.
///
/// `content == None` means the key has never been written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    #[serde(rename = "ref")]
    pub remote_ref: Option<RemoteRef>,
    pub content: Option<String>,
}

impl RemoteRecord {
    /// A record for a key that was never written.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(remote_ref: RemoteRef, content: impl Into<String>) -> Self {
        Self {
            remote_ref: Some(remote_ref),
            content: Some(content.into()),
        }
    }

    #[must_use]
    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Decodes the snapshot carried by this record, if any.
    pub fn snapshot(&self) -> SyncResult<Option<Snapshot>> {
        match &self.content {
            Some(raw) => Ok(Some(SyncData::parse(raw)?.snapshot()?)),
            None => Ok(None),
        }
    }
}

/// Versioned envelope around the serialized snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncData {
    pub version: u32,
    pub content: String,
}

impl SyncData {
    /// Wraps a snapshot at the current format version.
    pub fn from_snapshot(snapshot: &Snapshot) -> SyncResult<Self> {
        Ok(Self {
            version: SYNC_DATA_VERSION,
            content: snapshot.to_json()?,
        })
    }

    /// Parses an envelope, rejecting versions newer than this client.
    pub fn parse(raw: &str) -> SyncResult<Self> {
        let data: SyncData = serde_json::from_str(raw)?;
        if data.version > SYNC_DATA_VERSION {
            return Err(SyncError::IncompatibleRemoteContent {
                found: data.version,
                supported: SYNC_DATA_VERSION,
            });
        }
        Ok(data)
    }

    pub fn snapshot(&self) -> SyncResult<Snapshot> {
        Ok(Snapshot::from_json(&self.content)?)
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Condition a write must satisfy against the store's current ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Write regardless of the current ref.
    Unconditional,
    /// Write only if the current ref equals this one. `None` requires that
    /// the key has never been written.
    Expect(Option<RemoteRef>),
}

impl Precondition {
    /// Returns true if a store whose current ref is `current` accepts the write.
    #[must_use]
    pub fn admits(&self, current: Option<&RemoteRef>) -> bool {
        match self {
            Self::Unconditional => true,
            Self::Expect(expected) => expected.as_ref() == current,
        }
    }

    fn expected(&self) -> Option<RemoteRef> {
        match self {
            Self::Unconditional => None,
            Self::Expect(expected) => expected.clone(),
        }
    }
}

/// Remote blob store with optimistic concurrency.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads the record under `key`.
    ///
    /// When `known` carries the store's current ref, implementations may
    /// return `known` itself instead of transferring the content again.
    async fn read(&self, key: &str, known: Option<&RemoteRecord>) -> SyncResult<RemoteRecord>;

    /// Writes `content` under `key`, returning the new ref.
    ///
    /// Fails with [`SyncError::Conflict`] if `precondition` is not admitted.
    async fn write(
        &self,
        key: &str,
        content: &str,
        precondition: Precondition,
    ) -> SyncResult<RemoteRef>;
}

/// In-process [`RemoteStore`].
///
/// Issues UUID v7 refs and counts reads and writes.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    blobs: RwLock<HashMap<String, RemoteRecord>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current record under `key` without counting a read.
    pub async fn current(&self, key: &str) -> RemoteRecord {
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `read` calls served.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn read(&self, key: &str, known: Option<&RemoteRecord>) -> SyncResult<RemoteRecord> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let blobs = self.blobs.read().await;
        let current = blobs.get(key).cloned().unwrap_or_default();

        if let Some(known) = known {
            if known.remote_ref.is_some() && known.remote_ref == current.remote_ref {
                debug!("Remote ref for {} unchanged, reusing known record", key);
                return Ok(known.clone());
            }
        }
        Ok(current)
    }

    async fn write(
        &self,
        key: &str,
        content: &str,
        precondition: Precondition,
    ) -> SyncResult<RemoteRef> {
        let mut blobs = self.blobs.write().await;
        let current = blobs.get(key).cloned().unwrap_or_default();

        if !precondition.admits(current.remote_ref.as_ref()) {
            return Err(SyncError::Conflict {
                expected: precondition.expected(),
                current: Box::new(current),
            });
        }

        let new_ref = RemoteRef::generate();
        blobs.insert(key.to_string(), RemoteRecord::new(new_ref.clone(), content));
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!("Wrote {} bytes to remote {} (ref {})", content.len(), key, new_ref);
        Ok(new_ref)
    }
}
