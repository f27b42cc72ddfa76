use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{dao::result_store::ResultStore, error::ServiceError};

/// Slot holding the durable result store, empty while the backend is unreachable.
///
/// The process starts in degraded mode until a store is installed.
pub struct DurableSlot {
    store: RwLock<Option<Arc<dyn ResultStore>>>,
    degraded: watch::Sender<bool>,
}

impl DurableSlot {
    /// Empty slot: the application starts degraded.
    pub fn new() -> Self {
        let (degraded, _rx) = watch::channel(true);
        Self {
            store: RwLock::new(None),
            degraded,
        }
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn get(&self) -> Option<Arc<dyn ResultStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require(&self) -> Result<Arc<dyn ResultStore>, ServiceError> {
        self.get().await.ok_or(ServiceError::Degraded)
    }

    /// Install a store implementation and leave degraded mode.
    pub async fn install(&self, store: Arc<dyn ResultStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// True while no result store is installed.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}

impl Default for DurableSlot {
    fn default() -> Self {
        Self::new()
    }
}
