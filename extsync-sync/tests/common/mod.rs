//! Shared fakes and fixtures for sync tests.

#![allow(dead_code)]

use async_trait::async_trait;
use extsync_storage::{DurableStore, MemoryStore, StorageError, StorageResult};
use extsync_sync::{
    ExtensionEnablement, ExtensionGallery, ExtensionKind, ExtensionManagement, GalleryExtension,
    InstalledExtension, LastSyncRecord, LastSyncStore, LocalStateReader, MemoryConfiguration,
    MemoryRemoteStore, Precondition, RemoteRecord, RemoteRef, RemoteStore, SyncConfig, SyncData,
    SyncEngine, SyncError, SyncResult, SyncServices,
};
use extsync_types::{ExtensionIdentifier, Snapshot, SyncExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const REMOTE_KEY: &str = "extensions";

/// Installs a test subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn id(s: &str) -> ExtensionIdentifier {
    ExtensionIdentifier::new(s)
}

pub fn ext(s: &str, version: &str, enabled: bool) -> SyncExtension {
    SyncExtension::new(id(s), version, enabled)
}

pub fn snap(extensions: &[SyncExtension]) -> Snapshot {
    Snapshot::from_extensions(extensions.iter().cloned())
}

pub fn content_of(extensions: &[SyncExtension]) -> String {
    SyncData::from_snapshot(&snap(extensions))
        .unwrap()
        .to_json()
        .unwrap()
}

/// Writes `extensions` to `remote` as another machine would.
pub async fn seed_remote(remote: &MemoryRemoteStore, extensions: &[SyncExtension]) -> RemoteRef {
    let current = remote.current(REMOTE_KEY).await;
    remote
        .write(
            REMOTE_KEY,
            &content_of(extensions),
            Precondition::Expect(current.remote_ref),
        )
        .await
        .unwrap()
}

/// Decodes the snapshot currently held by `remote`.
pub async fn remote_snapshot(remote: &MemoryRemoteStore) -> Option<Snapshot> {
    remote.current(REMOTE_KEY).await.snapshot().unwrap()
}

// ── Extension management ─────────────────────────────────────────

#[derive(Default)]
pub struct FakeManagement {
    installed: Mutex<Vec<InstalledExtension>>,
    failing: Mutex<HashSet<String>>,
    stuck: Mutex<HashSet<String>>,
    installs: Mutex<Vec<String>>,
    uninstalls: Mutex<Vec<String>>,
}

impl FakeManagement {
    pub fn with(&self, extension: InstalledExtension) -> &Self {
        self.installed.lock().unwrap().push(extension);
        self
    }

    /// Makes every install of `id` fail.
    pub fn fail_install(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_lowercase());
    }

    /// Makes every uninstall of `id` fail.
    pub fn fail_uninstall(&self, id: &str) {
        self.stuck.lock().unwrap().insert(id.to_lowercase());
    }

    pub fn installed(&self) -> Vec<InstalledExtension> {
        self.installed.lock().unwrap().clone()
    }

    pub fn version_of(&self, s: &str) -> Option<String> {
        self.installed()
            .into_iter()
            .find(|e| e.identifier.is_same(&id(s)))
            .map(|e| e.version)
    }

    /// `id@version` for every install call, in call order.
    pub fn installs(&self) -> Vec<String> {
        self.installs.lock().unwrap().clone()
    }

    pub fn uninstalls(&self) -> Vec<String> {
        self.uninstalls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtensionManagement for FakeManagement {
    async fn list_installed(&self) -> SyncResult<Vec<InstalledExtension>> {
        Ok(self.installed())
    }

    async fn install(&self, extension: &GalleryExtension) -> SyncResult<()> {
        self.installs
            .lock()
            .unwrap()
            .push(format!("{}@{}", extension.identifier, extension.version));
        if self
            .failing
            .lock()
            .unwrap()
            .contains(&extension.identifier.normalized_id())
        {
            return Err(SyncError::Install {
                id: extension.identifier.to_string(),
                reason: "incompatible host".to_string(),
            });
        }

        let mut installed = self.installed.lock().unwrap();
        installed.retain(|e| !e.identifier.is_same(&extension.identifier));
        installed.push(InstalledExtension::user(
            extension.identifier.clone(),
            extension.version.clone(),
        ));
        Ok(())
    }

    async fn uninstall(&self, extension: &InstalledExtension) -> SyncResult<()> {
        self.uninstalls
            .lock()
            .unwrap()
            .push(extension.identifier.to_string());
        if self
            .stuck
            .lock()
            .unwrap()
            .contains(&extension.identifier.normalized_id())
        {
            return Err(SyncError::Uninstall {
                id: extension.identifier.to_string(),
                reason: "extension in use".to_string(),
            });
        }
        self.installed
            .lock()
            .unwrap()
            .retain(|e| !(e.identifier.is_same(&extension.identifier) && e.kind == ExtensionKind::User));
        Ok(())
    }
}

// ── Gallery ──────────────────────────────────────────────────────

pub struct FakeGallery {
    enabled: AtomicBool,
    missing: Mutex<HashSet<String>>,
    lookups: AtomicUsize,
}

impl Default for FakeGallery {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            missing: Mutex::new(HashSet::new()),
            lookups: AtomicUsize::new(0),
        }
    }
}

impl FakeGallery {
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Makes lookups of `id` come back empty.
    pub fn hide(&self, id: &str) {
        self.missing.lock().unwrap().insert(id.to_lowercase());
    }

    pub fn publish(&self, id: &str) {
        self.missing.lock().unwrap().remove(&id.to_lowercase());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtensionGallery for FakeGallery {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn resolve_compatible(
        &self,
        identifier: &ExtensionIdentifier,
        version: &str,
    ) -> SyncResult<Option<GalleryExtension>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self
            .missing
            .lock()
            .unwrap()
            .contains(&identifier.normalized_id())
        {
            return Ok(None);
        }
        Ok(Some(GalleryExtension {
            identifier: identifier.clone(),
            version: version.to_string(),
            display_name: None,
        }))
    }
}

// ── Enablement ───────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeEnablement {
    disabled: Mutex<Vec<ExtensionIdentifier>>,
    locked: Mutex<HashSet<String>>,
}

impl FakeEnablement {
    /// Makes every enable or disable of `id` fail.
    pub fn lock(&self, id: &str) {
        self.locked.lock().unwrap().insert(id.to_lowercase());
    }

    fn check(&self, identifier: &ExtensionIdentifier) -> SyncResult<()> {
        if self.locked.lock().unwrap().contains(&identifier.normalized_id()) {
            return Err(SyncError::Enablement(format!("{identifier} is locked by policy")));
        }
        Ok(())
    }

    pub fn is_disabled(&self, s: &str) -> bool {
        self.disabled
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.is_same(&id(s)))
    }
}

#[async_trait]
impl ExtensionEnablement for FakeEnablement {
    async fn list_disabled(&self) -> SyncResult<Vec<ExtensionIdentifier>> {
        Ok(self.disabled.lock().unwrap().clone())
    }

    async fn enable(&self, identifier: &ExtensionIdentifier) -> SyncResult<()> {
        self.check(identifier)?;
        self.disabled
            .lock()
            .unwrap()
            .retain(|d| !d.is_same(identifier));
        Ok(())
    }

    async fn disable(&self, identifier: &ExtensionIdentifier) -> SyncResult<()> {
        self.check(identifier)?;
        let mut disabled = self.disabled.lock().unwrap();
        if !disabled.iter().any(|d| d.is_same(identifier)) {
            disabled.push(identifier.clone());
        }
        Ok(())
    }
}

// ── Remote wrappers ──────────────────────────────────────────────

/// Lands a write from "another machine" just before each of the next
/// `interferences` writes, so those writes lose the race.
pub struct InterferingRemote {
    pub inner: Arc<MemoryRemoteStore>,
    interferences: AtomicUsize,
    injected: Vec<SyncExtension>,
}

impl InterferingRemote {
    pub fn new(inner: Arc<MemoryRemoteStore>, interferences: usize, injected: &[SyncExtension]) -> Self {
        Self {
            inner,
            interferences: AtomicUsize::new(interferences),
            injected: injected.to_vec(),
        }
    }
}

#[async_trait]
impl RemoteStore for InterferingRemote {
    async fn read(&self, key: &str, known: Option<&RemoteRecord>) -> SyncResult<RemoteRecord> {
        self.inner.read(key, known).await
    }

    async fn write(
        &self,
        key: &str,
        content: &str,
        precondition: Precondition,
    ) -> SyncResult<RemoteRef> {
        let pending = self.interferences.load(Ordering::SeqCst);
        if pending > 0 {
            self.interferences.store(pending - 1, Ordering::SeqCst);
            self.inner
                .write(key, &content_of(&self.injected), Precondition::Unconditional)
                .await?;
        }
        self.inner.write(key, content, precondition).await
    }
}

/// Holds every read until [`GatedRemote::release`] is called.
pub struct GatedRemote {
    pub inner: Arc<MemoryRemoteStore>,
    gate: Notify,
}

impl GatedRemote {
    pub fn new(inner: Arc<MemoryRemoteStore>) -> Self {
        Self {
            inner,
            gate: Notify::new(),
        }
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl RemoteStore for GatedRemote {
    async fn read(&self, key: &str, known: Option<&RemoteRecord>) -> SyncResult<RemoteRecord> {
        self.gate.notified().await;
        self.inner.read(key, known).await
    }

    async fn write(
        &self,
        key: &str,
        content: &str,
        precondition: Precondition,
    ) -> SyncResult<RemoteRef> {
        self.inner.write(key, content, precondition).await
    }
}

// ── Durable store ────────────────────────────────────────────────

/// A store whose writes always fail.
#[derive(Default)]
pub struct ReadOnlyStore;

#[async_trait]
impl DurableStore for ReadOnlyStore {
    async fn read_file(&self, path: &Path) -> StorageResult<Vec<u8>> {
        Err(StorageError::NotFound(path.to_path_buf()))
    }

    async fn write_file(&self, _path: &Path, _contents: &[u8]) -> StorageResult<()> {
        Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        )))
    }

    async fn delete_file(&self, path: &Path) -> StorageResult<()> {
        Err(StorageError::NotFound(path.to_path_buf()))
    }
}

// ── Machine ──────────────────────────────────────────────────────

/// One machine: fakes for every collaborator plus an engine wired to them.
pub struct Machine {
    pub management: Arc<FakeManagement>,
    pub gallery: Arc<FakeGallery>,
    pub enablement: Arc<FakeEnablement>,
    pub storage: Arc<dyn DurableStore>,
    pub configuration: Arc<MemoryConfiguration>,
    pub engine: SyncEngine,
}

impl Machine {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self::build(remote, Arc::new(MemoryStore::new()), SyncConfig::default())
    }

    pub fn with_config(remote: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        Self::build(remote, Arc::new(MemoryStore::new()), config)
    }

    pub fn with_storage(remote: Arc<dyn RemoteStore>, storage: Arc<dyn DurableStore>) -> Self {
        Self::build(remote, storage, SyncConfig::default())
    }

    fn build(remote: Arc<dyn RemoteStore>, storage: Arc<dyn DurableStore>, config: SyncConfig) -> Self {
        init_tracing();
        let management = Arc::new(FakeManagement::default());
        let gallery = Arc::new(FakeGallery::default());
        let enablement = Arc::new(FakeEnablement::default());
        let configuration = Arc::new(MemoryConfiguration::new());

        let engine = SyncEngine::new(
            SyncServices {
                management: management.clone(),
                gallery: gallery.clone(),
                enablement: enablement.clone(),
                remote,
                storage: storage.clone(),
                configuration: configuration.clone(),
            },
            config,
        );

        Self {
            management,
            gallery,
            enablement,
            storage,
            configuration,
            engine,
        }
    }

    /// Installs a user extension directly, bypassing sync.
    pub async fn install(&self, s: &str, version: &str, enabled: bool) {
        self.management
            .with(InstalledExtension::user(id(s), version));
        if !enabled {
            self.enablement.disable(&id(s)).await.unwrap();
        }
    }

    /// The local snapshot in canonical order.
    pub async fn local(&self) -> Snapshot {
        LocalStateReader::new(self.management.clone(), self.enablement.clone())
            .snapshot()
            .await
            .unwrap()
            .sorted()
    }

    pub async fn last_sync(&self) -> Option<LastSyncRecord> {
        self.last_sync_store().read().await.unwrap()
    }

    pub fn last_sync_store(&self) -> LastSyncStore {
        LastSyncStore::new(
            self.storage.clone(),
            self.engine.config().last_sync_path.clone(),
        )
    }
}
