//! Memoized functions of one argument.
//!
//! Every key gets its own [`Slot`], stored in a [`BackingMap`]. The map only hands out slots;
//! its internal locks are never held while a computation runs.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::StorageEntry;
use crate::lock::{ReentrantLock, StorageLock};
use crate::manager::StorageManager;
use crate::slot::{Access, RecursionPolicy, Slot};

const MEMOIZED_FUNCTION: &str = "in a memoized function";

type Computation<K, V> = Box<dyn Fn(&K) -> StorageEntry<V> + Send + Sync>;
type KeyedPostCompute<K, V> = Box<dyn Fn(&K, &V) -> StorageEntry + Send + Sync>;

/// A concurrent map from keys to the slots of a memoized function.
pub trait BackingMap<K, V>: Send + Sync {
    /// The slot of `key`, if there is one.
    fn get(&self, key: &K) -> Option<Arc<Slot<V>>>;

    /// The slot of `key`, inserting an empty one if there is none.
    ///
    /// Concurrent calls for the same key must return the same slot.
    fn get_or_insert(&self, key: &K) -> Arc<Slot<V>>;

    /// The number of keys in the map.
    fn len(&self) -> usize;
}

impl<K, V> BackingMap<K, V> for DashMap<K, Arc<Slot<V>>>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    fn get(&self, key: &K) -> Option<Arc<Slot<V>>> {
        DashMap::get(self, key).map(|entry| Arc::clone(entry.value()))
    }

    fn get_or_insert(&self, key: &K) -> Arc<Slot<V>> {
        if let Some(slot) = BackingMap::get(self, key) {
            return slot;
        }
        Arc::clone(self.entry(key.clone()).or_default().value())
    }

    fn len(&self) -> usize {
        DashMap::len(self)
    }
}

/// A bounded map. Evicted keys are computed again on their next access.
impl<K, V> BackingMap<K, V> for moka::sync::Cache<K, Arc<Slot<V>>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<Arc<Slot<V>>> {
        moka::sync::Cache::get(self, key)
    }

    fn get_or_insert(&self, key: &K) -> Arc<Slot<V>> {
        self.get_with(key.clone(), Default::default)
    }

    /// Approximate, as moka applies pending writes lazily.
    fn len(&self) -> usize {
        self.entry_count() as usize
    }
}

/// The slots of a memoized function or cache, keyed by its input.
pub(crate) struct KeyedSlots<K, V, L: StorageLock> {
    manager: StorageManager<L>,
    map: Box<dyn BackingMap<K, V>>,
    recursion: Option<RecursionPolicy<K, V>>,
    kind: &'static str,
}

impl<K, V, L> KeyedSlots<K, V, L>
where
    K: fmt::Debug,
    V: Clone,
    L: StorageLock,
{
    pub fn new(
        manager: StorageManager<L>,
        map: Box<dyn BackingMap<K, V>>,
        recursion: Option<RecursionPolicy<K, V>>,
        kind: &'static str,
    ) -> Self {
        Self {
            manager,
            map,
            recursion,
            kind,
        }
    }

    pub fn invoke_with(
        &self,
        key: &K,
        compute: &dyn Fn() -> StorageEntry<V>,
        post_compute: Option<&dyn Fn(&V) -> StorageEntry>,
    ) -> StorageEntry<V> {
        let slot = self.map.get_or_insert(key);
        let access = Access {
            manager: &self.manager,
            kind: self.kind,
            input: key,
            keyed: true,
            recursion: self.recursion.as_ref(),
            post_compute,
        };
        slot.enter(&access, compute)
    }
}

impl<K, V, L: StorageLock> KeyedSlots<K, V, L> {
    pub fn is_computed(&self, key: &K) -> bool {
        self.map.get(key).is_some_and(|slot| slot.is_computed())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn manager(&self) -> &StorageManager<L> {
        &self.manager
    }
}

/// A memoized function of one argument.
///
/// Each key is computed at most once, under the lock of the manager that created the function,
/// and its value or failure is returned for every later call with that key.
pub struct MemoizedFunction<K, V, L: StorageLock = ReentrantLock> {
    slots: KeyedSlots<K, V, L>,
    compute: Computation<K, V>,
    post_compute: Option<KeyedPostCompute<K, V>>,
}

/// A memoized function that may compute to nothing.
pub type MemoizedFunctionToNullable<K, V, L = ReentrantLock> = MemoizedFunction<K, Option<V>, L>;

impl<K, V, L> MemoizedFunction<K, V, L>
where
    K: fmt::Debug,
    V: Clone,
    L: StorageLock,
{
    /// Returns the value for `key`, computing it first if needed.
    pub fn invoke(&self, key: &K) -> StorageEntry<V> {
        let compute = || (self.compute)(key);
        match &self.post_compute {
            Some(post_compute) => {
                let post_compute: &dyn Fn(&V) -> StorageEntry = &|value| post_compute(key, value);
                self.slots.invoke_with(key, &compute, Some(post_compute))
            }
            None => self.slots.invoke_with(key, &compute, None),
        }
    }

    /// Whether the value or failure for `key` is stored.
    pub fn is_computed(&self, key: &K) -> bool {
        self.slots.is_computed(key)
    }

    /// The number of keys that have been accessed.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn manager(&self) -> &StorageManager<L> {
        self.slots.manager()
    }
}

impl<K, V, L: StorageLock> fmt::Debug for MemoizedFunction<K, V, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedFunction")
            .field("manager", &self.slots.manager)
            .field("len", &self.slots.map.len())
            .finish()
    }
}

/// Configures a [`MemoizedFunction`], see [`StorageManager::memoized_function`].
pub struct MemoizedFunctionBuilder<K, V, L: StorageLock = ReentrantLock> {
    manager: StorageManager<L>,
    compute: Computation<K, V>,
    map: Option<Box<dyn BackingMap<K, V>>>,
    recursion: Option<RecursionPolicy<K, V>>,
    post_compute: Option<KeyedPostCompute<K, V>>,
}

impl<K, V, L> MemoizedFunctionBuilder<K, V, L>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    L: StorageLock,
{
    pub(crate) fn new(manager: StorageManager<L>, compute: Computation<K, V>) -> Self {
        Self {
            manager,
            compute,
            map: None,
            recursion: None,
            post_compute: None,
        }
    }

    /// Recursive calls return the result of `on_recursive_call`.
    ///
    /// It receives the key and `true` for the first recursive call of a computation.
    pub fn on_recursion<R>(mut self, on_recursive_call: R) -> Self
    where
        R: Fn(&K, bool) -> V + Send + Sync + 'static,
    {
        self.recursion = Some(RecursionPolicy::callback(on_recursive_call));
        self
    }

    /// Recursive calls return `fallback`.
    pub fn recursion_fallback(mut self, fallback: V) -> Self {
        self.recursion = Some(RecursionPolicy::Fallback(fallback));
        self
    }

    /// Recursive calls run the computation again.
    pub fn fall_through_on_recursion(mut self) -> Self {
        self.recursion = Some(RecursionPolicy::FallThrough);
        self
    }

    /// Recursive calls fail, even on a manager without locks.
    pub fn fail_on_recursion(mut self) -> Self {
        self.recursion = Some(RecursionPolicy::Fail);
        self
    }

    /// Runs `post_compute` on every computed value before it is stored.
    pub fn post_compute<P>(mut self, post_compute: P) -> Self
    where
        P: Fn(&K, &V) -> StorageEntry + Send + Sync + 'static,
    {
        self.post_compute = Some(Box::new(post_compute));
        self
    }

    /// Stores the slots in `map` instead of an unbounded [`DashMap`].
    pub fn backing_map<M>(mut self, map: M) -> Self
    where
        M: BackingMap<K, V> + 'static,
    {
        self.map = Some(Box::new(map));
        self
    }

    /// Keeps at most about `max_capacity` keys, evicting the least recently used ones.
    ///
    /// An evicted key is computed again on its next access.
    pub fn bounded(self, max_capacity: u64) -> Self {
        self.backing_map(moka::sync::Cache::<K, Arc<Slot<V>>>::new(max_capacity))
    }

    pub fn build(self) -> MemoizedFunction<K, V, L> {
        let map = self
            .map
            .unwrap_or_else(|| Box::new(DashMap::<K, Arc<Slot<V>>>::new()));
        MemoizedFunction {
            slots: KeyedSlots::new(self.manager, map, self.recursion, MEMOIZED_FUNCTION),
            compute: self.compute,
            post_compute: self.post_compute,
        }
    }
}
