//! The mutual exclusion a [`StorageManager`](crate::StorageManager) serializes its slots on.
//!
//! Every slot created by one manager performs its state transitions while holding the manager's
//! lock. The lock is re-entrant, so a computation that queries its own unfinished slot on the same
//! thread is detected as recursion instead of deadlocking.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::error::{StorageEntry, StorageError};

/// Default time a cancellable lock waits before checking for cancellation again.
pub const DEFAULT_CHECK_CANCELLED_INTERVAL: Duration = Duration::from_millis(50);

/// Called by a cancellable lock between attempts to acquire it.
///
/// Returning an error abandons the wait. The lock reports any error as
/// [`StorageError::Cancelled`].
pub type CancellationCheck = Arc<dyn Fn() -> StorageEntry + Send + Sync>;

/// A lock that guards all state transitions of one manager's slots.
pub trait StorageLock: 'static {
    /// Held for as long as the lock is.
    type Guard<'a>
    where
        Self: 'a;

    /// Acquires the lock, blocking the current thread.
    ///
    /// The lock must be re-entrant. It may only fail with a cancellation.
    fn lock(&self) -> StorageEntry<Self::Guard<'_>>;

    /// Whether recursive calls compute again instead of failing, unless a cache says otherwise.
    fn falls_through_on_recursion(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

/// A re-entrant mutex, optionally giving up the wait when a cancellation is signalled.
pub struct ReentrantLock {
    mutex: ReentrantMutex<()>,
    check_cancelled: Option<CancellationCheck>,
    interval: Duration,
}

impl ReentrantLock {
    pub fn new() -> Self {
        Self {
            mutex: ReentrantMutex::new(()),
            check_cancelled: None,
            interval: DEFAULT_CHECK_CANCELLED_INTERVAL,
        }
    }

    /// Creates a lock that calls `check_cancelled` every `interval` while waiting.
    pub fn cancellable(check_cancelled: CancellationCheck, interval: Duration) -> Self {
        Self {
            mutex: ReentrantMutex::new(()),
            check_cancelled: Some(check_cancelled),
            interval,
        }
    }

    pub fn is_cancellable(&self) -> bool {
        self.check_cancelled.is_some()
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageLock for ReentrantLock {
    type Guard<'a> = ReentrantMutexGuard<'a, ()>;

    fn lock(&self) -> StorageEntry<Self::Guard<'_>> {
        let Some(check_cancelled) = &self.check_cancelled else {
            return Ok(self.mutex.lock());
        };

        loop {
            if let Some(guard) = self.mutex.try_lock_for(self.interval) {
                return Ok(guard);
            }
            if let Err(error) = check_cancelled() {
                if !error.is_cancellation() {
                    tracing::warn!(error = %error, "cancellation check failed");
                }
                return Err(StorageError::Cancelled);
            }
        }
    }

    fn name(&self) -> &'static str {
        if self.is_cancellable() {
            "cancellable"
        } else {
            "reentrant"
        }
    }
}

impl fmt::Debug for ReentrantLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("cancellable", &self.is_cancellable())
            .field("interval", &self.interval)
            .finish()
    }
}

/// No locking at all, for caches that are only ever used from one thread.
///
/// `NoLock` is neither `Send` nor `Sync`, so a manager using it (and everything that manager
/// creates) cannot leave the thread that created it. Recursion is still detected on that thread;
/// by default a recursive call simply computes again.
#[derive(Debug, Default)]
pub struct NoLock {
    _not_send: PhantomData<*const ()>,
}

impl NoLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageLock for NoLock {
    type Guard<'a> = ();

    fn lock(&self) -> StorageEntry<Self::Guard<'_>> {
        Ok(())
    }

    fn falls_through_on_recursion(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
