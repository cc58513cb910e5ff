//! Three-way sync engine for installed extensions.
//!
//! Keeps the set of installed extensions (identity, version, enabled flag)
//! consistent across a user's machines through a shared remote blob.
//!
//! # Architecture
//!
//! Each machine reconciles three snapshots: what is installed locally, what
//! the remote declares, and what this machine last synchronized (the base).
//! Machines never talk to each other; the remote's opaque version token is
//! the only coordination.
//!
//! ## Components
//!
//! - **Remote**: blob store with optimistic concurrency ([`RemoteStore`])
//! - **Local**: installer, gallery and enablement collaborators
//! - **State**: last-sync checkpoint and skip list ([`LastSyncStore`])
//! - **Merge**: pure three-way merge ([`merge()`])
//! - **Applicator**: commits a merge locally, remotely, then to the checkpoint
//! - **Engine**: the `Idle`/`Syncing` orchestrator ([`SyncEngine`])
//!
//! ## Sync Process
//!
//! 1. **Read**: checkpoint, remote record and local snapshot
//! 2. **Merge**: compute local changes and the new remote snapshot
//! 3. **Apply local**: uninstall, install, enable; failures go to the skip list
//! 4. **Write remote**: conditional on the ref read in step 1
//! 5. **Checkpoint**: persist the remote record plus the skip list
//!
//! A rejected write in step 4 restarts the cycle from step 1.
//!
//! # Example
//!
//! ```
//! use extsync_sync::{merge, Snapshot};
//! use extsync_types::{ExtensionIdentifier, SyncExtension};
//!
//! let local: Snapshot = vec![SyncExtension::new(ExtensionIdentifier::new("pkg.foo"), "1.0", true)]
//!     .into();
//! let result = merge(&local, None, None, &[], &[]);
//! assert_eq!(result.remote, Some(local));
//! ```

pub mod applicator;
mod config;
mod engine;
mod error;
pub mod events;
pub mod local;
pub mod merge;
pub mod queue;
pub mod remote;
pub mod state;

pub use applicator::{ApplyPlan, ApplyReport, Applicator};
pub use config::{Configuration, MemoryConfiguration, SyncConfig};
pub use engine::{SyncEngine, SyncOutcome, SyncReport, SyncServices};
pub use error::{SyncError, SyncResult};
pub use events::{LocalChangeDebouncer, LocalExtensionEvent, SyncStatus};
pub use extsync_types::Snapshot;
pub use local::{
    ExtensionEnablement, ExtensionGallery, ExtensionKind, ExtensionManagement, GalleryExtension,
    InstalledExtension, LocalStateReader,
};
pub use merge::{merge, MergeResult};
pub use queue::SerialQueue;
pub use remote::{
    MemoryRemoteStore, Precondition, RemoteRecord, RemoteRef, RemoteStore, SyncData,
    SYNC_DATA_VERSION,
};
pub use state::{LastSyncRecord, LastSyncStore};
