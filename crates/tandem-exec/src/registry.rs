//! Registry of pools that are currently executing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tandem_core::PoolId;
use tracing::{debug, info};

/// A running pool as seen by the registry.
pub(crate) trait ActivePool: Send + Sync {
    fn id(&self) -> PoolId;
    fn cancel(&self);
}

/// Tracks active pools so they can be cancelled together.
///
/// A pool registers when it starts executing and deregisters itself when it
/// delivers or is cancelled.
#[derive(Default)]
pub struct Registry {
    pools: Mutex<HashMap<PoolId, Arc<dyn ActivePool>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, pool: Arc<dyn ActivePool>) {
        let id = pool.id();
        let mut pools = self.pools.lock();
        pools.insert(id, pool);
        debug!(pool_id = %id, active = pools.len(), "Registered pool");
    }

    /// Remove a pool. Returns `false` if it was not registered.
    pub(crate) fn deregister(&self, id: PoolId) -> bool {
        let mut pools = self.pools.lock();
        let removed = pools.remove(&id).is_some();
        if removed {
            debug!(pool_id = %id, active = pools.len(), "Deregistered pool");
        }
        removed
    }

    /// Cancel every registered pool and return how many there were.
    ///
    /// Pools are cancelled outside the registry lock, since each one
    /// deregisters itself while cancelling.
    pub fn cancel_all(&self) -> usize {
        let snapshot: Vec<Arc<dyn ActivePool>> = {
            let mut pools = self.pools.lock();
            pools.drain().map(|(_, pool)| pool).collect()
        };
        if !snapshot.is_empty() {
            info!(pools = snapshot.len(), "Cancelling all active pools");
        }
        for pool in &snapshot {
            pool.cancel();
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<PoolId> {
        self.pools.lock().keys().copied().collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("active", &self.len())
            .finish()
    }
}
