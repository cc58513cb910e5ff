//! Error types for the storage layer.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// File does not exist.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Path escapes the store root or is otherwise unusable.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl StorageError {
    /// Returns true for [`StorageError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
