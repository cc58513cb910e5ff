//! Three-way merge of extension snapshots.
//!
//! [`merge`] reconciles the local snapshot, the remote snapshot and the base
//! (the snapshot last synchronized by this machine) into a [`MergeResult`]:
//! what to install, update and uninstall locally, and what, if anything, to
//! write back to the remote.
//!
//! Entries are compared by identity key. A uuid learned from any input is
//! used for every entry with the same id, so an entry that carries a uuid on
//! one side and only an id on the other still pairs up.
//!
//! Decision table, per key not on the ignore list:
//!
//! | base | local | remote | outcome |
//! |---|---|---|---|
//! | - | L | - | remote gets L |
//! | - | - | R | local adds R |
//! | - | L | R, differs | local updates to R |
//! | B | L = B | R ≠ B | local updates to R |
//! | B | L ≠ B | R = B | remote gets L |
//! | B | L ≠ B | R ≠ B, ≠ L | local updates to R |
//! | B | L = B | - | local removes |
//! | B | L ≠ B | - | remote gets L |
//! | B | - | R = B | remote removes, unless skipped |
//! | B | - | R ≠ B | local adds R |
//!
//! A skipped entry still declared by the base or remote stands in for the
//! local entry while the failure persists, and is retried as an update until
//! the local state matches.
//!
//! With no base every key present on both sides counts as added on both, so
//! remote wins on any disagreement and otherwise the two sides are unioned.
//! With no remote, the remote simply becomes the local snapshot.
//!
//! The merge is a pure function of its inputs and its output is in canonical
//! order.

use extsync_types::{ExtensionIdentifier, ExtensionKey, Snapshot, SyncExtension};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Outcome of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    /// Extensions to install locally.
    pub added: Vec<SyncExtension>,
    /// Extensions to uninstall locally.
    pub removed: Vec<ExtensionIdentifier>,
    /// Extensions to reinstall or re-enable locally at a new state.
    pub updated: Vec<SyncExtension>,
    /// New remote snapshot, or `None` when the remote already agrees.
    pub remote: Option<Snapshot>,
    /// Skip-list entries carried into the next cycle.
    pub skipped: Vec<SyncExtension>,
}

impl MergeResult {
    /// Returns true if anything must change on this machine.
    #[must_use]
    pub fn has_local_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.updated.is_empty()
    }

    /// Returns true if anything must change locally or remotely.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.has_local_changes() || self.remote.is_some()
    }
}

/// Merges `local`, `remote` and `base`.
///
/// `remote == None` means the remote was never written. `base == None` means
/// this machine has no sync history. `skipped` is the skip list from the last
/// cycle and `ignored` holds extension ids excluded from comparison.
pub fn merge(
    local: &Snapshot,
    remote: Option<&Snapshot>,
    base: Option<&Snapshot>,
    skipped: &[SyncExtension],
    ignored: &[String],
) -> MergeResult {
    let mut entries: Vec<&SyncExtension> = local.iter().collect();
    entries.extend(remote.iter().flat_map(|r| r.iter()));
    entries.extend(base.iter().flat_map(|b| b.iter()));
    entries.extend(skipped.iter());
    let resolver = KeyResolver::new(&entries, ignored);

    let local_map = resolver.keyed(local.iter());
    let skipped_map = resolver.keyed(skipped.iter());

    let Some(remote) = remote else {
        let proposed: Snapshot = local_map
            .iter()
            .filter(|(key, _)| !resolver.is_ignored(key))
            .map(|(key, e)| resolver.massage(key, e))
            .collect();
        let skipped = skipped_map
            .iter()
            .filter(|(key, _)| !resolver.is_ignored(key) && !local_map.contains_key(*key))
            .map(|(key, e)| resolver.massage(key, e))
            .collect();
        return MergeResult {
            remote: (!proposed.is_empty()).then(|| proposed.sorted()),
            skipped: canonical(skipped),
            ..MergeResult::default()
        };
    };

    let remote_map = resolver.keyed(remote.iter());
    let base_map = base.map(|b| resolver.keyed(b.iter()));

    // A skipped entry that the base or remote still declares was never applied
    // here, so the installed state behind it is not a local edit.
    let installed = local_map.clone();
    let mut local_map = local_map;
    for (key, skipped_ext) in &skipped_map {
        let Some(local_ext) = local_map.get_mut(key) else {
            continue;
        };
        let pending = base_map
            .as_ref()
            .and_then(|b| b.get(key))
            .into_iter()
            .chain(remote_map.get(key))
            .any(|e| e.same_state(skipped_ext));
        if pending && !local_ext.same_state(skipped_ext) {
            *local_ext = skipped_ext.clone();
        }
    }

    let local_to_remote = compare(Some(&local_map), &remote_map, &resolver);
    let base_to_local = compare(base_map.as_ref(), &local_map, &resolver);
    let base_to_remote = compare(base_map.as_ref(), &remote_map, &resolver);

    let mut added: BTreeMap<ExtensionKey, SyncExtension> = BTreeMap::new();
    let mut updated: BTreeMap<ExtensionKey, SyncExtension> = BTreeMap::new();
    let mut removed: BTreeMap<ExtensionKey, ExtensionIdentifier> = BTreeMap::new();
    let mut new_remote = remote_map.clone();

    if !local_to_remote.is_empty() {
        // Removed remotely.
        for key in &base_to_remote.removed {
            let Some(local_ext) = local_map.get(key) else {
                continue;
            };
            if base_to_local.updated.contains(key) {
                new_remote.insert(key.clone(), local_ext.clone());
            } else {
                removed.insert(key.clone(), resolver.massage(key, local_ext).identifier);
            }
        }

        // Added remotely.
        for key in &base_to_remote.added {
            let remote_ext = &remote_map[key];
            if base_to_local.added.contains(key) {
                if local_to_remote.updated.contains(key) {
                    updated.insert(key.clone(), resolver.massage(key, remote_ext));
                }
            } else {
                added.insert(key.clone(), resolver.massage(key, remote_ext));
            }
        }

        // Updated remotely.
        for key in &base_to_remote.updated {
            let remote_ext = &remote_map[key];
            if !local_map.contains_key(key) {
                added.insert(key.clone(), resolver.massage(key, remote_ext));
            } else if local_to_remote.updated.contains(key) {
                updated.insert(key.clone(), resolver.massage(key, remote_ext));
            }
        }

        // Added locally.
        for key in &base_to_local.added {
            if !base_to_remote.added.contains(key) {
                new_remote.insert(key.clone(), local_map[key].clone());
            }
        }

        // Updated locally. Remote removals were settled above.
        for key in &base_to_local.updated {
            if !base_to_remote.removed.contains(key) && !base_to_remote.updated.contains(key) {
                new_remote.insert(key.clone(), local_map[key].clone());
            }
        }

        // Removed locally. A skipped extension was never installed here, so its
        // absence is not a removal.
        for key in &base_to_local.removed {
            if !skipped_map.contains_key(key) && !base_to_remote.updated.contains(key) {
                new_remote.remove(key);
            }
        }
    }

    // Retry what the remote still declares and is not yet installed here;
    // everything else drops out.
    for key in skipped_map.keys() {
        if resolver.is_ignored(key) || added.contains_key(key) || updated.contains_key(key) {
            continue;
        }
        let Some(remote_ext) = new_remote.get(key) else {
            continue;
        };
        match installed.get(key) {
            None => {
                added.insert(key.clone(), resolver.massage(key, remote_ext));
            }
            Some(current) if !current.same_state(remote_ext) => {
                updated.insert(key.clone(), resolver.massage(key, remote_ext));
            }
            Some(_) => {}
        }
    }

    let remote_changes = compare(Some(&remote_map), &new_remote, &KeyResolver::default());
    let remote = (!remote_changes.is_empty()).then(|| {
        new_remote
            .iter()
            .map(|(key, e)| resolver.massage(key, e))
            .collect::<Snapshot>()
            .sorted()
    });

    MergeResult {
        added: canonical(added.into_values().collect()),
        removed: {
            let mut ids: Vec<_> = removed.into_values().collect();
            ids.sort_by(ExtensionIdentifier::canonical_cmp);
            ids
        },
        updated: canonical(updated.into_values().collect()),
        remote,
        skipped: Vec::new(),
    }
}

fn canonical(mut extensions: Vec<SyncExtension>) -> Vec<SyncExtension> {
    extensions.sort_by(|a, b| a.identifier.canonical_cmp(&b.identifier));
    extensions
}

/// Key sets describing how one snapshot differs from another.
#[derive(Debug, Default)]
struct Diff {
    added: BTreeSet<ExtensionKey>,
    removed: BTreeSet<ExtensionKey>,
    updated: BTreeSet<ExtensionKey>,
}

impl Diff {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Diffs `from` (absent = empty) against `to`, skipping ignored keys.
fn compare(
    from: Option<&BTreeMap<ExtensionKey, SyncExtension>>,
    to: &BTreeMap<ExtensionKey, SyncExtension>,
    resolver: &KeyResolver,
) -> Diff {
    let empty = BTreeMap::new();
    let from = from.unwrap_or(&empty);
    let mut diff = Diff::default();

    for (key, to_ext) in to {
        if resolver.is_ignored(key) {
            continue;
        }
        match from.get(key) {
            None => {
                diff.added.insert(key.clone());
            }
            Some(from_ext) if !from_ext.same_state(to_ext) => {
                diff.updated.insert(key.clone());
            }
            Some(_) => {}
        }
    }
    for key in from.keys() {
        if !resolver.is_ignored(key) && !to.contains_key(key) {
            diff.removed.insert(key.clone());
        }
    }
    diff
}

/// Maps identifiers to identity keys consistently across all merge inputs.
#[derive(Debug, Default)]
struct KeyResolver {
    /// Lowercased id to the uuid any input carried for it.
    uuids: HashMap<String, String>,
    ignored: HashSet<ExtensionKey>,
}

impl KeyResolver {
    fn new(entries: &[&SyncExtension], ignored: &[String]) -> Self {
        let mut uuids = HashMap::new();
        for entry in entries {
            if let Some(uuid) = &entry.identifier.uuid {
                uuids
                    .entry(entry.identifier.normalized_id())
                    .or_insert_with(|| uuid.clone());
            }
        }

        let mut resolver = Self {
            uuids,
            ignored: HashSet::new(),
        };

        let ignored_ids: Vec<String> = ignored.iter().map(|id| id.trim().to_lowercase()).collect();
        let mut ignored_keys = HashSet::new();
        for id in ignored_ids.iter().filter(|id| !id.is_empty()) {
            ignored_keys.insert(resolver.key(&ExtensionIdentifier::new(id.as_str())));
        }
        for entry in entries {
            if ignored_ids.contains(&entry.identifier.normalized_id()) {
                ignored_keys.insert(resolver.key(&entry.identifier));
            }
        }
        resolver.ignored = ignored_keys;
        resolver
    }

    fn key(&self, identifier: &ExtensionIdentifier) -> ExtensionKey {
        match &identifier.uuid {
            Some(uuid) => ExtensionKey::Uuid(uuid.clone()),
            None => {
                let id = identifier.normalized_id();
                match self.uuids.get(&id) {
                    Some(uuid) => ExtensionKey::Uuid(uuid.clone()),
                    None => ExtensionKey::Id(id),
                }
            }
        }
    }

    fn is_ignored(&self, key: &ExtensionKey) -> bool {
        self.ignored.contains(key)
    }

    /// Keys a sequence of entries. The first entry per key wins.
    fn keyed<'a>(
        &self,
        entries: impl Iterator<Item = &'a SyncExtension>,
    ) -> BTreeMap<ExtensionKey, SyncExtension> {
        let mut map = BTreeMap::new();
        for entry in entries {
            map.entry(self.key(&entry.identifier))
                .or_insert_with(|| entry.clone());
        }
        map
    }

    /// Copies `extension`, filling in the uuid learned for its key.
    fn massage(&self, key: &ExtensionKey, extension: &SyncExtension) -> SyncExtension {
        let uuid = key
            .uuid()
            .map(str::to_string)
            .or_else(|| extension.identifier.uuid.clone());
        extension.with_identifier(ExtensionIdentifier {
            id: extension.identifier.id.clone(),
            uuid,
        })
    }
}
