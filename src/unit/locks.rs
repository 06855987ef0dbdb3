//! Per-unit-name async locks serializing start/stop/restart calls.
//!
//! The lifecycle controller and the recovery engine may decide to act on
//! the same unit in the same instant. Sharing one `UnitLocks` between them
//! makes those calls take turns instead of interleaving.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct UnitLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl UnitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive lifecycle access to the named unit
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn remove(&self, name: &str) {
        self.locks.remove(name);
    }
}
