//! The single entry point for creating lazy values, memoized functions and caches.
//!
//! A [`StorageManager`] owns one lock and one [`ExceptionHandlingStrategy`]. Everything it creates
//! serializes its computations on that lock, so two computations of the same manager never run
//! concurrently, and fails through that strategy.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::cache::{CacheWithComputation, CacheWithNotNullValues, CacheWithNullableValues};
use crate::config::ManagerConfig;
use crate::error::{StorageEntry, StorageError};
use crate::lazy::{LazyValue, LazyValueBuilder, NullableLazyValue};
use crate::lock::{
    CancellationCheck, DEFAULT_CHECK_CANCELLED_INTERVAL, NoLock, ReentrantLock, StorageLock,
};
use crate::memoized::{
    BackingMap, MemoizedFunction, MemoizedFunctionBuilder, MemoizedFunctionToNullable,
};
use crate::strategy::{ExceptionHandlingStrategy, LogAndThrow, StrategyKind, Throw};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

struct ManagerInner<L> {
    id: u64,
    debug_text: String,
    lock: Arc<L>,
    strategy: Arc<dyn ExceptionHandlingStrategy>,
}

/// Creates caches that share one lock and one failure policy.
///
/// This is a cheap handle; clones refer to the same manager.
pub struct StorageManager<L: StorageLock = ReentrantLock> {
    inner: Arc<ManagerInner<L>>,
}

impl<L: StorageLock> Clone for StorageManager<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl StorageManager<ReentrantLock> {
    /// Creates a manager with a plain re-entrant lock that rethrows failures.
    pub fn new(debug_text: impl Into<String>) -> Self {
        Self::builder(debug_text).build()
    }

    pub fn builder(debug_text: impl Into<String>) -> StorageManagerBuilder {
        StorageManagerBuilder::new(debug_text)
    }

    pub fn from_config(config: &ManagerConfig) -> Self {
        StorageManagerBuilder::from_config(config).build()
    }
}

impl StorageManager<NoLock> {
    /// Creates a manager without any locking, for caches used from one thread only.
    ///
    /// The manager and everything created by it is neither `Send` nor `Sync`. Recursive calls
    /// compute again unless a cache is configured otherwise. The innermost result is stored and
    /// the enclosing call then fails with [`StorageError::RaceCondition`].
    pub fn no_locks(debug_text: impl Into<String>) -> Self {
        Self::with_lock(debug_text, NoLock::new(), Arc::new(Throw))
    }
}

impl<L: StorageLock> StorageManager<L> {
    pub fn with_lock(
        debug_text: impl Into<String>,
        lock: L,
        strategy: Arc<dyn ExceptionHandlingStrategy>,
    ) -> Self {
        Self::from_parts(debug_text.into(), Arc::new(lock), strategy)
    }

    fn from_parts(
        debug_text: String,
        lock: Arc<L>,
        strategy: Arc<dyn ExceptionHandlingStrategy>,
    ) -> Self {
        let id = NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(ManagerInner {
                id,
                debug_text,
                lock,
                strategy,
            }),
        }
    }

    /// Creates a manager sharing this manager's lock, with a different failure policy.
    pub fn replace_exception_handling(
        &self,
        debug_text: impl Into<String>,
        strategy: Arc<dyn ExceptionHandlingStrategy>,
    ) -> Self {
        Self::from_parts(debug_text.into(), Arc::clone(&self.inner.lock), strategy)
    }

    /// A process-unique number identifying this manager.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn debug_text(&self) -> &str {
        &self.inner.debug_text
    }

    pub fn exception_strategy(&self) -> &dyn ExceptionHandlingStrategy {
        &*self.inner.strategy
    }

    /// Whether both handles serialize on the same lock.
    pub fn shares_lock_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner.lock, &other.inner.lock)
    }

    pub(crate) fn lock(&self) -> StorageEntry<L::Guard<'_>> {
        self.inner.lock.lock()
    }

    pub(crate) fn falls_through_on_recursion(&self) -> bool {
        self.inner.lock.falls_through_on_recursion()
    }

    pub(crate) fn handle_exception(&self, error: StorageError) -> StorageError {
        self.inner.strategy.handle_exception(error)
    }

    /// Runs `f` under this manager's lock.
    ///
    /// Nothing is cached. Failures other than cancellations go through the exception strategy.
    pub fn compute<T, F>(&self, f: F) -> StorageEntry<T>
    where
        F: FnOnce() -> StorageEntry<T>,
    {
        let _guard = self.lock()?;
        f().map_err(|error| {
            if error.is_cancellation() {
                error
            } else {
                self.handle_exception(error)
            }
        })
    }

    /// Starts building a lazy value with additional options.
    pub fn lazy_value<T, F>(&self, compute: F) -> LazyValueBuilder<T, L>
    where
        T: Clone,
        F: Fn() -> StorageEntry<T> + Send + Sync + 'static,
    {
        LazyValueBuilder::new(self.clone(), Box::new(compute))
    }

    pub fn create_lazy_value<T, F>(&self, compute: F) -> LazyValue<T, L>
    where
        T: Clone,
        F: Fn() -> StorageEntry<T> + Send + Sync + 'static,
    {
        self.lazy_value(compute).build()
    }

    /// Creates a lazy value whose recursive calls return the result of `on_recursive_call`.
    ///
    /// `on_recursive_call` receives `true` for the first recursive call of a computation.
    pub fn create_lazy_value_with_recursion<T, F, R>(
        &self,
        compute: F,
        on_recursive_call: R,
    ) -> LazyValue<T, L>
    where
        T: Clone,
        F: Fn() -> StorageEntry<T> + Send + Sync + 'static,
        R: Fn(bool) -> T + Send + Sync + 'static,
    {
        self.lazy_value(compute).on_recursion(on_recursive_call).build()
    }

    /// Creates a lazy value whose recursive calls return `fallback`.
    pub fn create_recursion_tolerant_lazy_value<T, F>(
        &self,
        compute: F,
        fallback: T,
    ) -> LazyValue<T, L>
    where
        T: Clone,
        F: Fn() -> StorageEntry<T> + Send + Sync + 'static,
    {
        self.lazy_value(compute).recursion_fallback(fallback).build()
    }

    /// Creates a lazy value that runs `post_compute` on its value before storing it.
    pub fn create_lazy_value_with_post_compute<T, F, P>(
        &self,
        compute: F,
        post_compute: P,
    ) -> LazyValue<T, L>
    where
        T: Clone,
        F: Fn() -> StorageEntry<T> + Send + Sync + 'static,
        P: Fn(&T) -> StorageEntry + Send + Sync + 'static,
    {
        self.lazy_value(compute).post_compute(post_compute).build()
    }

    pub fn create_nullable_lazy_value<T, F>(&self, compute: F) -> NullableLazyValue<T, L>
    where
        T: Clone,
        F: Fn() -> StorageEntry<Option<T>> + Send + Sync + 'static,
    {
        self.create_lazy_value(compute)
    }

    pub fn create_recursion_tolerant_nullable_lazy_value<T, F>(
        &self,
        compute: F,
        fallback: Option<T>,
    ) -> NullableLazyValue<T, L>
    where
        T: Clone,
        F: Fn() -> StorageEntry<Option<T>> + Send + Sync + 'static,
    {
        self.create_recursion_tolerant_lazy_value(compute, fallback)
    }

    pub fn create_nullable_lazy_value_with_post_compute<T, F, P>(
        &self,
        compute: F,
        post_compute: P,
    ) -> NullableLazyValue<T, L>
    where
        T: Clone,
        F: Fn() -> StorageEntry<Option<T>> + Send + Sync + 'static,
        P: Fn(&Option<T>) -> StorageEntry + Send + Sync + 'static,
    {
        self.create_lazy_value_with_post_compute(compute, post_compute)
    }

    /// Starts building a memoized function with additional options.
    pub fn memoized_function<K, V, F>(&self, compute: F) -> MemoizedFunctionBuilder<K, V, L>
    where
        K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: Fn(&K) -> StorageEntry<V> + Send + Sync + 'static,
    {
        MemoizedFunctionBuilder::new(self.clone(), Box::new(compute))
    }

    pub fn create_memoized_function<K, V, F>(&self, compute: F) -> MemoizedFunction<K, V, L>
    where
        K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: Fn(&K) -> StorageEntry<V> + Send + Sync + 'static,
    {
        self.memoized_function(compute).build()
    }

    /// Creates a memoized function whose recursive calls return the result of `on_recursive_call`.
    pub fn create_memoized_function_with_recursion<K, V, F, R>(
        &self,
        compute: F,
        on_recursive_call: R,
    ) -> MemoizedFunction<K, V, L>
    where
        K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: Fn(&K) -> StorageEntry<V> + Send + Sync + 'static,
        R: Fn(&K, bool) -> V + Send + Sync + 'static,
    {
        self.memoized_function(compute)
            .on_recursion(on_recursive_call)
            .build()
    }

    /// Creates a memoized function storing its slots in `map`.
    pub fn create_memoized_function_with_map<K, V, F, M>(
        &self,
        compute: F,
        map: M,
    ) -> MemoizedFunction<K, V, L>
    where
        K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: Fn(&K) -> StorageEntry<V> + Send + Sync + 'static,
        M: BackingMap<K, V> + 'static,
    {
        self.memoized_function(compute).backing_map(map).build()
    }

    pub fn create_memoized_function_with_nullable_values<K, V, F>(
        &self,
        compute: F,
    ) -> MemoizedFunctionToNullable<K, V, L>
    where
        K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: Fn(&K) -> StorageEntry<Option<V>> + Send + Sync + 'static,
    {
        self.create_memoized_function(compute)
    }

    pub fn create_cache_with_nullable_values<K, V>(&self) -> CacheWithNullableValues<K, V, L>
    where
        K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        CacheWithComputation::new(self.clone())
    }

    pub fn create_cache_with_not_null_values<K, V>(&self) -> CacheWithNotNullValues<K, V, L>
    where
        K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        CacheWithComputation::new(self.clone())
    }
}

impl<L: StorageLock> fmt::Display for StorageManager<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageManager#{} ({})", self.inner.id, self.inner.debug_text)
    }
}

impl<L: StorageLock> fmt::Debug for StorageManager<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageManager")
            .field("id", &self.inner.id)
            .field("debug_text", &self.inner.debug_text)
            .field("lock", &self.inner.lock.name())
            .field("strategy", &self.inner.strategy)
            .finish()
    }
}

/// Configures a [`StorageManager`] with a re-entrant lock.
pub struct StorageManagerBuilder {
    debug_text: String,
    strategy: Arc<dyn ExceptionHandlingStrategy>,
    check_cancelled: Option<CancellationCheck>,
    check_cancelled_interval: Duration,
}

impl fmt::Debug for StorageManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageManagerBuilder")
            .field("debug_text", &self.debug_text)
            .field("strategy", &self.strategy)
            .field("cancellable", &self.check_cancelled.is_some())
            .field("check_cancelled_interval", &self.check_cancelled_interval)
            .finish()
    }
}

impl StorageManagerBuilder {
    fn new(debug_text: impl Into<String>) -> Self {
        Self {
            debug_text: debug_text.into(),
            strategy: Arc::new(Throw),
            check_cancelled: None,
            check_cancelled_interval: DEFAULT_CHECK_CANCELLED_INTERVAL,
        }
    }

    /// Starts from a configuration file section.
    ///
    /// A cancellation check cannot be configured in a file; add one with
    /// [`check_cancelled`](Self::check_cancelled).
    pub fn from_config(config: &ManagerConfig) -> Self {
        let mut builder = Self::new(config.debug_text.clone());
        builder.strategy = match config.exception_strategy {
            StrategyKind::Throw => Arc::new(Throw),
            StrategyKind::Log => Arc::new(LogAndThrow::new(config.debug_text.clone())),
        };
        if let Some(interval) = config.check_cancelled_interval {
            builder.check_cancelled_interval = interval;
        }
        builder
    }

    pub fn exception_strategy<S>(mut self, strategy: S) -> Self
    where
        S: ExceptionHandlingStrategy + 'static,
    {
        self.strategy = Arc::new(strategy);
        self
    }

    /// Makes waiting for the lock cancellable.
    ///
    /// While another thread holds the lock, `check_cancelled` is called every
    /// [`check_cancelled_interval`](Self::check_cancelled_interval). If it fails, the wait is
    /// abandoned with its error.
    pub fn check_cancelled<F>(mut self, check_cancelled: F) -> Self
    where
        F: Fn() -> StorageEntry + Send + Sync + 'static,
    {
        self.check_cancelled = Some(Arc::new(check_cancelled));
        self
    }

    pub fn check_cancelled_interval(mut self, interval: Duration) -> Self {
        self.check_cancelled_interval = interval;
        self
    }

    pub fn build(self) -> StorageManager {
        let lock = match self.check_cancelled {
            Some(check_cancelled) => {
                ReentrantLock::cancellable(check_cancelled, self.check_cancelled_interval)
            }
            None => ReentrantLock::new(),
        };
        StorageManager::with_lock(self.debug_text, lock, self.strategy)
    }
}
