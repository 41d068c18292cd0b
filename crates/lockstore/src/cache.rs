use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::StorageEntry;
use crate::lock::{ReentrantLock, StorageLock};
use crate::manager::StorageManager;
use crate::memoized::KeyedSlots;
use crate::slot::Slot;

const CACHE_WITH_COMPUTATION: &str = "in a cache with computation";

/// A cache whose callers supply the computation along with the key.
///
/// Entries are identified by the key alone. The first computation supplied for a key is the one
/// that runs; every later call for that key gets its result and never runs its own computation.
pub struct CacheWithComputation<K, V, L: StorageLock = ReentrantLock> {
    slots: KeyedSlots<K, V, L>,
}

/// A cache whose computations may produce nothing.
pub type CacheWithNullableValues<K, V, L = ReentrantLock> = CacheWithComputation<K, Option<V>, L>;

/// A cache whose computations always produce a value.
pub type CacheWithNotNullValues<K, V, L = ReentrantLock> = CacheWithComputation<K, V, L>;

impl<K, V, L> CacheWithComputation<K, V, L>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    L: StorageLock,
{
    pub(crate) fn new(manager: StorageManager<L>) -> Self {
        let map = Box::new(DashMap::<K, Arc<Slot<V>>>::new());
        Self {
            slots: KeyedSlots::new(manager, map, None, CACHE_WITH_COMPUTATION),
        }
    }
}

impl<K, V, L> CacheWithComputation<K, V, L>
where
    K: fmt::Debug,
    V: Clone,
    L: StorageLock,
{
    /// Returns the stored result for `key`, running `computation` if there is none yet.
    pub fn compute_if_absent<F>(&self, key: &K, computation: F) -> StorageEntry<V>
    where
        F: Fn() -> StorageEntry<V>,
    {
        self.slots.invoke_with(key, &computation, None)
    }

    /// Whether the value or failure for `key` is stored.
    pub fn is_computed(&self, key: &K) -> bool {
        self.slots.is_computed(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, L: StorageLock> fmt::Debug for CacheWithComputation<K, V, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheWithComputation")
            .field("manager", self.slots.manager())
            .field("len", &self.slots.len())
            .finish()
    }
}
