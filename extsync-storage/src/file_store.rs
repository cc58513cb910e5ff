//! File-system backed store rooted at a directory.

use crate::error::{StorageError, StorageResult};
use crate::DurableStore;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Stores files under a root directory.
///
/// Paths are relative to the root and may not contain `..`. Writes go to a
/// temporary sibling first and are renamed into place, so a reader never
/// observes a half-written file.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> StorageResult<PathBuf> {
        let mut has_file = false;
        for component in path.components() {
            match component {
                Component::Normal(_) => has_file = true,
                Component::CurDir => {}
                _ => {
                    return Err(StorageError::InvalidPath(path.display().to_string()));
                }
            }
        }
        if !has_file {
            return Err(StorageError::InvalidPath(path.display().to_string()));
        }
        Ok(self.root.join(path))
    }
}

fn map_io(err: std::io::Error, path: &Path) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(path.to_path_buf())
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn read_file(&self, path: &Path) -> StorageResult<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).await.map_err(|e| map_io(e, path))
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> StorageResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp_name = full
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = full.with_file_name(tmp_name);

        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &full).await?;
        debug!("Wrote {} bytes to {:?}", contents.len(), full);
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> StorageResult<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full).await.map_err(|e| map_io(e, path))?;
        debug!("Deleted {:?}", full);
        Ok(())
    }
}
