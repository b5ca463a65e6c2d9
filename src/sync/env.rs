//! Host capabilities: connectivity and background wake-ups

use async_trait::async_trait;
use tokio::sync::watch;

/// Tag under which background wake-ups are requested
pub const BACKGROUND_SYNC_TAG: &str = "haboard-sync";

/// Network reachability as seen by the host
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver notified on every online/offline transition
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity flag flipped by the host itself
#[derive(Debug)]
pub struct ManualConnectivity {
    online: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: watch::Sender::new(online),
        }
    }

    /// Only real transitions notify subscribers
    pub fn set_online(&self, online: bool) {
        self.online.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }
}

impl Connectivity for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

/// Optional wake-up scheduler for draining the outbox while the host is idle.
/// The host calls `SyncEngine::handle_background_sync` when the wake-up fires.
#[async_trait]
pub trait BackgroundSync: Send + Sync {
    async fn register(&self, tag: &str) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_connectivity_notifies_transitions_only() {
        let connectivity = ManualConnectivity::new(false);
        let mut rx = connectivity.subscribe();

        connectivity.set_online(false);
        assert!(!rx.has_changed().unwrap());

        connectivity.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(connectivity.is_online());
    }
}
