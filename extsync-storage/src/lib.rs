//! Local durable storage for extension sync.
//!
//! Provides the small file capability the sync engine persists its
//! checkpoint through: read, write and delete a whole file by relative path.
//!
//! # Implementations
//!
//! - [`FileStore`]: files under a root directory, written atomically via a
//!   temporary sibling and rename
//! - [`MemoryStore`]: an in-process map, for embedders without a disk and
//!   for tests

mod error;
mod file_store;
mod memory_store;

pub use error::{StorageError, StorageResult};
pub use file_store::FileStore;
pub use memory_store::MemoryStore;

use async_trait::async_trait;
use std::path::Path;

/// Whole-file durable storage keyed by relative path.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Reads a file. Fails with [`StorageError::NotFound`] if it does not exist.
    async fn read_file(&self, path: &Path) -> StorageResult<Vec<u8>>;

    /// Creates or replaces a file.
    async fn write_file(&self, path: &Path, contents: &[u8]) -> StorageResult<()>;

    /// Deletes a file. Fails with [`StorageError::NotFound`] if it does not exist.
    async fn delete_file(&self, path: &Path) -> StorageResult<()>;

    /// Returns true if the file exists.
    async fn exists(&self, path: &Path) -> StorageResult<bool> {
        match self.read_file(path).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
