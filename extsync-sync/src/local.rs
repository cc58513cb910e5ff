//! Local extension collaborators and the local state reader.
//!
//! The installer, gallery and enablement store are owned by the host. The
//! engine only sees the capability traits below.

use crate::error::SyncResult;
use async_trait::async_trait;
use extsync_types::{ExtensionIdentifier, Snapshot, SyncExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Where an installed extension came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtensionKind {
    /// Shipped with the host. Never installed or uninstalled by sync;
    /// only its enablement is synchronized.
    System,
    /// Installed by the user from the gallery.
    User,
}

/// An extension present on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledExtension {
    pub identifier: ExtensionIdentifier,
    pub version: String,
    pub kind: ExtensionKind,
}

impl InstalledExtension {
    pub fn user(identifier: ExtensionIdentifier, version: impl Into<String>) -> Self {
        Self {
            identifier,
            version: version.into(),
            kind: ExtensionKind::User,
        }
    }

    pub fn system(identifier: ExtensionIdentifier, version: impl Into<String>) -> Self {
        Self {
            identifier,
            version: version.into(),
            kind: ExtensionKind::System,
        }
    }
}

/// A gallery package resolved for installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryExtension {
    pub identifier: ExtensionIdentifier,
    pub version: String,
    pub display_name: Option<String>,
}

impl GalleryExtension {
    /// Name for log output.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.identifier.id)
    }
}

/// Installs, lists and removes local extensions.
#[async_trait]
pub trait ExtensionManagement: Send + Sync {
    async fn list_installed(&self) -> SyncResult<Vec<InstalledExtension>>;

    /// Installs or upgrades to the given package. Fails with
    /// [`crate::SyncError::Install`].
    async fn install(&self, extension: &GalleryExtension) -> SyncResult<()>;

    async fn uninstall(&self, extension: &InstalledExtension) -> SyncResult<()>;
}

/// Resolves installable packages.
#[async_trait]
pub trait ExtensionGallery: Send + Sync {
    /// Returns false when the gallery is not configured on this host.
    fn is_enabled(&self) -> bool;

    /// Finds a package for `identifier` at `version` compatible with this
    /// host. `Ok(None)` means not found.
    async fn resolve_compatible(
        &self,
        identifier: &ExtensionIdentifier,
        version: &str,
    ) -> SyncResult<Option<GalleryExtension>>;
}

/// Persists which extensions are disabled.
#[async_trait]
pub trait ExtensionEnablement: Send + Sync {
    async fn list_disabled(&self) -> SyncResult<Vec<ExtensionIdentifier>>;

    async fn enable(&self, identifier: &ExtensionIdentifier) -> SyncResult<()>;

    async fn disable(&self, identifier: &ExtensionIdentifier) -> SyncResult<()>;
}

/// Snapshots the locally installed extensions together with their
/// enablement into the comparison shape used by the merge engine.
#[derive(Clone)]
pub struct LocalStateReader {
    management: Arc<dyn ExtensionManagement>,
    enablement: Arc<dyn ExtensionEnablement>,
}

impl LocalStateReader {
    pub fn new(
        management: Arc<dyn ExtensionManagement>,
        enablement: Arc<dyn ExtensionEnablement>,
    ) -> Self {
        Self {
            management,
            enablement,
        }
    }

    /// Reads the current local snapshot.
    pub async fn snapshot(&self) -> SyncResult<Snapshot> {
        let installed = self.management.list_installed().await?;
        let disabled = self.enablement.list_disabled().await?;

        let snapshot: Snapshot = installed
            .into_iter()
            .map(|extension| {
                let enabled = !disabled.iter().any(|d| d.is_same(&extension.identifier));
                SyncExtension::new(extension.identifier, extension.version, enabled)
            })
            .collect();

        debug!("Read {} local extensions", snapshot.len());
        Ok(snapshot)
    }
}
