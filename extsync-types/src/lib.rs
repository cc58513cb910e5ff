//! Core type definitions for extension sync.
//!
//! This crate defines the plugin-agnostic value types shared by the storage
//! and sync layers:
//! - Extension identifiers and the identity-equivalence rule
//! - The synchronizable per-extension record
//! - Snapshots (identity-unique, canonically ordered extension sets)
//!
//! Everything here is a plain value: no I/O, no async.

mod extension;
mod ids;

pub use extension::{Snapshot, SyncExtension};
pub use ids::{ExtensionIdentifier, ExtensionKey};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid extension identifier: {0:?}")]
    InvalidIdentifier(String),
}
