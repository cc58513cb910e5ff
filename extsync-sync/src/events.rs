//! Status and local-change notifications.
//!
//! Observers learn about the engine through two channels: a `watch` of the
//! current [`SyncStatus`], and a debounced `broadcast` that fires once a burst
//! of local install/uninstall events has been quiet for a fixed window.

use crate::config::SyncConfig;
use extsync_types::ExtensionIdentifier;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::debug;

/// Engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Idle,
    Syncing,
}

/// A local install or uninstall reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalExtensionEvent {
    Installed {
        identifier: ExtensionIdentifier,
        error: Option<String>,
    },
    Uninstalled {
        identifier: ExtensionIdentifier,
        error: Option<String>,
    },
}

impl LocalExtensionEvent {
    /// Failed operations leave local state unchanged and are ignored.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        match self {
            Self::Installed { error, .. } | Self::Uninstalled { error, .. } => error.is_none(),
        }
    }

    pub fn identifier(&self) -> &ExtensionIdentifier {
        match self {
            Self::Installed { identifier, .. } | Self::Uninstalled { identifier, .. } => identifier,
        }
    }
}

/// Coalesces bursts of [`LocalExtensionEvent`]s into single notifications.
///
/// Each successful event restarts the quiet window; the notification fires
/// when the window elapses with no further events. Must be created inside a
/// tokio runtime. The worker stops when the debouncer is dropped.
pub struct LocalChangeDebouncer {
    events: mpsc::UnboundedSender<LocalExtensionEvent>,
    changes: broadcast::Sender<()>,
    worker: JoinHandle<()>,
}

impl LocalChangeDebouncer {
    pub fn spawn(window: Duration) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let (changes, _) = broadcast::channel(16);
        let worker = tokio::spawn(debounce(rx, changes.clone(), window));
        Self {
            events,
            changes,
            worker,
        }
    }

    /// Spawns a debouncer with the quiet window from `config`.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::spawn(config.local_change_debounce())
    }

    /// Reports a local event.
    pub fn notify(&self, event: LocalExtensionEvent) {
        let _ = self.events.send(event);
    }

    /// Subscribes to debounced change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

impl Drop for LocalChangeDebouncer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn debounce(
    mut events: mpsc::UnboundedReceiver<LocalExtensionEvent>,
    changes: broadcast::Sender<()>,
    window: Duration,
) {
    loop {
        match events.recv().await {
            Some(event) if event.succeeded() => {
                debug!("Local change to {}, waiting for quiet", event.identifier());
            }
            Some(_) => continue,
            None => return,
        }

        let deadline = time::sleep(window);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) if event.succeeded() => {
                        deadline.as_mut().reset(Instant::now() + window);
                    }
                    Some(_) => {}
                    None => {
                        let _ = changes.send(());
                        return;
                    }
                },
                () = &mut deadline => {
                    let _ = changes.send(());
                    break;
                }
            }
        }
    }
}
