//! In-process store.

use crate::error::{StorageError, StorageResult};
use crate::DurableStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Keeps files in memory. Contents are lost when the store is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored files.
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    /// Returns true if no files are stored.
    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn read_file(&self, path: &Path) -> StorageResult<Vec<u8>> {
        self.files
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> StorageResult<()> {
        self.files
            .write()
            .await
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> StorageResult<()> {
        self.files
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))
    }
}
