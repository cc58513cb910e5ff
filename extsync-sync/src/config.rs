//! Engine configuration and live configuration lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

/// Static configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Logical name of the remote blob.
    pub remote_key: String,
    /// Path of the last-sync checkpoint within the durable store.
    pub last_sync_path: PathBuf,
    /// Full sync attempts before a conflict is surfaced.
    pub max_sync_attempts: usize,
    /// Quiet window before local install/uninstall bursts are reported.
    pub local_change_debounce_ms: u64,
    /// Configuration key for the feature flag.
    pub enable_key: String,
    /// Configuration key for the ignore list.
    pub ignored_key: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_key: "extensions".to_string(),
            last_sync_path: PathBuf::from("lastSync/extensions.json"),
            max_sync_attempts: 5,
            local_change_debounce_ms: 500,
            enable_key: "sync.enableExtensions".to_string(),
            ignored_key: "sync.ignoredExtensions".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn local_change_debounce(&self) -> Duration {
        Duration::from_millis(self.local_change_debounce_ms)
    }
}

/// Live configuration lookup. Values are read on every call.
pub trait Configuration: Send + Sync {
    /// Returns the boolean under `key`, or `None` if unset.
    fn get_bool(&self, key: &str) -> Option<bool>;

    /// Returns the string list under `key`, empty if unset.
    fn get_string_list(&self, key: &str) -> Vec<String>;
}

/// Lock-guarded in-process [`Configuration`].
#[derive(Debug, Default)]
pub struct MemoryConfiguration {
    bools: RwLock<HashMap<String, bool>>,
    lists: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bool(&self, key: impl Into<String>, value: bool) {
        self.bools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value);
    }

    pub fn set_string_list<I, S>(&self, key: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lists
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), values.into_iter().map(Into::into).collect());
    }
}

impl Configuration for MemoryConfiguration {
    fn get_bool(&self, key: &str) -> Option<bool> {
        self.bools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
    }

    fn get_string_list(&self, key: &str) -> Vec<String> {
        self.lists
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}
