use crate::AppId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-application serialization for lifecycle and backup/restore work.
///
/// Every operation that touches an instance's container or volume holds the
/// instance's guard for its whole duration, so two operations on the same
/// application never interleave. Different applications proceed in parallel.
#[derive(Debug, Default)]
pub struct InstanceLocks {
    locks: DashMap<AppId, Arc<Mutex<()>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Default::default()
    }

    pub async fn acquire(&self, app_id: AppId) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await.
        let lock = self.locks.entry(app_id).or_default().clone();
        lock.lock_owned().await
    }
}
