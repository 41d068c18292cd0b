use std::any::type_name;
use std::fmt;

use parking_lot::RwLock;

use crate::error::StorageEntry;
use crate::lock::{ReentrantLock, StorageLock};
use crate::manager::StorageManager;
use crate::single_thread::SingleThreadValue;
use crate::slot::{Access, PostCompute, RecursionPolicy, Slot};
use crate::utils::defer::defer;

const LAZY_VALUE: &str = "in a lazy value";

type Computation<T> = Box<dyn Fn() -> StorageEntry<T> + Send + Sync>;

/// A memoized computation without arguments.
///
/// The computation runs at most once, on the first call to [`get`](Self::get), under the lock
/// of the manager that created the value. Its value or failure is returned from every later call.
/// Only a cancelled computation runs again.
pub struct LazyValue<T, L: StorageLock = ReentrantLock> {
    manager: StorageManager<L>,
    slot: Slot<T>,
    compute: Computation<T>,
    recursion: Option<RecursionPolicy<(), T>>,
    post_compute: Option<PostCompute<T>>,
    /// The value while the post-compute hook runs, visible to the computing thread only.
    published: RwLock<Option<SingleThreadValue<T>>>,
    name: &'static str,
}

/// A lazy value that may compute to nothing.
pub type NullableLazyValue<T, L = ReentrantLock> = LazyValue<Option<T>, L>;

impl<T: Clone, L: StorageLock> LazyValue<T, L> {
    /// Returns the value, computing it first if needed.
    pub fn get(&self) -> StorageEntry<T> {
        if self.post_compute.is_some()
            && let Some(value) = self.published_value()
        {
            return Ok(value);
        }

        let post_compute = |value: &T| self.run_post_compute(value);
        let access = Access {
            manager: &self.manager,
            kind: LAZY_VALUE,
            input: &(),
            keyed: false,
            recursion: self.recursion.as_ref(),
            post_compute: match self.post_compute {
                Some(_) => Some(&post_compute as &dyn Fn(&T) -> StorageEntry),
                None => None,
            },
        };
        self.slot.enter(&access, &*self.compute)
    }

    fn published_value(&self) -> Option<T> {
        let published = self.published.read();
        published.as_ref().and_then(|value| value.get().cloned())
    }

    fn run_post_compute(&self, value: &T) -> StorageEntry {
        let Some(post_compute) = &self.post_compute else {
            return Ok(());
        };
        *self.published.write() = Some(SingleThreadValue::new(value.clone()));
        let _unpublish = defer(|| *self.published.write() = None);
        post_compute(value)
    }
}

impl<T, L: StorageLock> LazyValue<T, L> {
    /// Whether the value or failure is stored.
    pub fn is_computed(&self) -> bool {
        self.slot.is_computed()
    }

    /// Whether the computation is running.
    pub fn is_computing(&self) -> bool {
        self.slot.is_computing()
    }

    pub fn manager(&self) -> &StorageManager<L> {
        &self.manager
    }

    pub fn render_debug_information(&self) -> String {
        format!("{}, storageManager={}", self.name, self.manager)
    }
}

impl<T, L: StorageLock> fmt::Debug for LazyValue<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyValue")
            .field("name", &self.name)
            .field("state", &self.slot.state_name())
            .field("manager", &self.manager)
            .finish()
    }
}

/// Configures a [`LazyValue`], see [`StorageManager::lazy_value`].
pub struct LazyValueBuilder<T, L: StorageLock = ReentrantLock> {
    manager: StorageManager<L>,
    compute: Computation<T>,
    recursion: Option<RecursionPolicy<(), T>>,
    post_compute: Option<PostCompute<T>>,
    name: Option<&'static str>,
}

impl<T: Clone, L: StorageLock> LazyValueBuilder<T, L> {
    pub(crate) fn new(manager: StorageManager<L>, compute: Computation<T>) -> Self {
        Self {
            manager,
            compute,
            recursion: None,
            post_compute: None,
            name: None,
        }
    }

    /// Recursive calls return the result of `on_recursive_call`.
    ///
    /// It receives `true` for the first recursive call of a computation.
    pub fn on_recursion<R>(mut self, on_recursive_call: R) -> Self
    where
        R: Fn(bool) -> T + Send + Sync + 'static,
    {
        self.recursion = Some(RecursionPolicy::callback(move |_: &(), first_time| {
            on_recursive_call(first_time)
        }));
        self
    }

    /// Recursive calls return `fallback`.
    pub fn recursion_fallback(mut self, fallback: T) -> Self {
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

    /// Runs `post_compute` on a computed value before it is stored.
    ///
    /// While the hook runs, the value is already returned to the computing thread, so the hook
    /// may call back into the lazy value. Other threads wait until the value is stored.
    pub fn post_compute<P>(mut self, post_compute: P) -> Self
    where
        P: Fn(&T) -> StorageEntry + Send + Sync + 'static,
    {
        self.post_compute = Some(Box::new(post_compute));
        self
    }

    /// Names the value in [`LazyValue::render_debug_information`].
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn build(self) -> LazyValue<T, L> {
        LazyValue {
            manager: self.manager,
            slot: Slot::new(),
            compute: self.compute,
            recursion: self.recursion,
            post_compute: self.post_compute,
            published: RwLock::new(None),
            name: self.name.unwrap_or_else(type_name::<LazyValue<T, L>>),
        }
    }
}
