//! Synchronizable extension records and snapshots.

use crate::ids::ExtensionIdentifier;
use crate::Result;
use serde::{Deserialize, Serialize};

/// One extension's synchronizable state.
///
/// Values are replaced wholesale on update, never field-mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncExtension {
    pub identifier: ExtensionIdentifier,
    /// Empty when the producer did not record a version.
    #[serde(default)]
    pub version: String,
    pub enabled: bool,
}

impl SyncExtension {
    /// Creates a new record.
    #[must_use]
    pub fn new(identifier: ExtensionIdentifier, version: impl Into<String>, enabled: bool) -> Self {
        Self {
            identifier,
            version: version.into(),
            enabled,
        }
    }

    /// Returns true if both records carry the same version and enablement.
    /// Identity is not compared.
    #[must_use]
    pub fn same_state(&self, other: &SyncExtension) -> bool {
        self.version == other.version && self.enabled == other.enabled
    }

    /// Returns a copy with a different identifier and the same state.
    #[must_use]
    pub fn with_identifier(&self, identifier: ExtensionIdentifier) -> Self {
        Self {
            identifier,
            version: self.version.clone(),
            enabled: self.enabled,
        }
    }
}

/// A de-duplicated, identity-keyed set of extension records.
///
/// No two entries denote the same extension. Construction keeps the first
/// occurrence of each identity and drops later duplicates. Insertion order is
/// preserved until [`Snapshot::sorted`] is called.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<SyncExtension>", into = "Vec<SyncExtension>")]
pub struct Snapshot {
    extensions: Vec<SyncExtension>,
}

impl Snapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot, dropping entries whose identity already appeared.
    pub fn from_extensions(extensions: impl IntoIterator<Item = SyncExtension>) -> Self {
        let mut snapshot = Self::new();
        for extension in extensions {
            if !snapshot.contains(&extension.identifier) {
                snapshot.extensions.push(extension);
            }
        }
        snapshot
    }

    /// Parses a snapshot from its JSON array form.
    pub fn from_json(json: &str) -> Result<Self> {
        let extensions: Vec<SyncExtension> = serde_json::from_str(json)?;
        Ok(Self::from_extensions(extensions))
    }

    /// Serializes the snapshot as a JSON array.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.extensions)?)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Returns true if the snapshot has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncExtension> {
        self.extensions.iter()
    }

    /// Looks up the entry denoting the same extension as `identifier`.
    #[must_use]
    pub fn get(&self, identifier: &ExtensionIdentifier) -> Option<&SyncExtension> {
        self.extensions
            .iter()
            .find(|e| e.identifier.is_same(identifier))
    }

    #[must_use]
    pub fn contains(&self, identifier: &ExtensionIdentifier) -> bool {
        self.get(identifier).is_some()
    }

    /// Inserts a record, replacing any entry for the same extension.
    /// Returns the replaced entry.
    pub fn upsert(&mut self, extension: SyncExtension) -> Option<SyncExtension> {
        match self
            .extensions
            .iter_mut()
            .find(|e| e.identifier.is_same(&extension.identifier))
        {
            Some(slot) => Some(std::mem::replace(slot, extension)),
            None => {
                self.extensions.push(extension);
                None
            }
        }
    }

    /// Removes every entry denoting the same extension as `identifier`.
    /// Returns how many entries were removed.
    pub fn remove(&mut self, identifier: &ExtensionIdentifier) -> usize {
        let before = self.extensions.len();
        self.extensions.retain(|e| !e.identifier.is_same(identifier));
        before - self.extensions.len()
    }

    /// Keeps only the entries for which `keep` returns true.
    pub fn retain(&mut self, keep: impl FnMut(&SyncExtension) -> bool) {
        self.extensions.retain(keep);
    }

    /// Returns the snapshot in canonical order (lowercased id, then uuid).
    #[must_use]
    pub fn sorted(mut self) -> Self {
        self.extensions
            .sort_by(|a, b| a.identifier.canonical_cmp(&b.identifier));
        self
    }

    /// Consumes the snapshot, returning its entries.
    #[must_use]
    pub fn into_vec(self) -> Vec<SyncExtension> {
        self.extensions
    }
}

impl From<Vec<SyncExtension>> for Snapshot {
    fn from(extensions: Vec<SyncExtension>) -> Self {
        Self::from_extensions(extensions)
    }
}

impl From<Snapshot> for Vec<SyncExtension> {
    fn from(snapshot: Snapshot) -> Self {
        snapshot.extensions
    }
}

impl FromIterator<SyncExtension> for Snapshot {
    fn from_iter<I: IntoIterator<Item = SyncExtension>>(iter: I) -> Self {
        Self::from_extensions(iter)
    }
}

impl IntoIterator for Snapshot {
    type Item = SyncExtension;
    type IntoIter = std::vec::IntoIter<SyncExtension>;

    fn into_iter(self) -> Self::IntoIter {
        self.extensions.into_iter()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a SyncExtension;
    type IntoIter = std::slice::Iter<'a, SyncExtension>;

    fn into_iter(self) -> Self::IntoIter {
        self.extensions.iter()
    }
}
