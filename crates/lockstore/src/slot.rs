//! The life cycle of one memoized computation.
//!
//! A [`Slot`] starts out [`NotComputed`](SlotState::NotComputed), is [`Computing`](SlotState::Computing)
//! while its computation runs, may observe [`RecursionDetected`](SlotState::RecursionDetected) when
//! that computation queries the slot again, and ends up [`Done`](SlotState::Done) or
//! [`Failed`](SlotState::Failed). Terminal states are sticky. A cancelled computation is the only
//! way back to `NotComputed`.
//!
//! All transitions happen while the owning manager's lock is held. Terminal states are read
//! without taking that lock.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use parking_lot::RwLock;

use crate::error::{StorageEntry, StorageError};
use crate::lock::StorageLock;
use crate::manager::StorageManager;
use crate::utils::defer::defer;

/// The state of a [`Slot`].
#[derive(Clone, Debug, Default)]
pub enum SlotState<T> {
    #[default]
    NotComputed,
    Computing,
    /// The running computation has queried its own result at least once.
    RecursionDetected,
    Done(T),
    Failed(StorageError),
}

impl<T> SlotState<T> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotComputed => "NotComputed",
            Self::Computing => "Computing",
            Self::RecursionDetected => "RecursionDetected",
            Self::Done(_) => "Done",
            Self::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }

    fn is_computing(&self) -> bool {
        matches!(self, Self::Computing | Self::RecursionDetected)
    }
}

/// What a computation observes when it queries its own unfinished result.
pub enum RecursionPolicy<K, T> {
    /// Fail the recursive call with [`StorageError::RecursionDetected`].
    Fail,
    /// Run the computation again, nested inside the first one.
    ///
    /// The innermost computation stores its result. The enclosing computations of the same slot
    /// then find it settled and fail with [`StorageError::RaceCondition`].
    FallThrough,
    /// Return this value to the recursive call.
    Fallback(T),
    /// Return the result of this callback to the recursive call.
    ///
    /// The flag is `true` for the first recursive call of a computation.
    Callback(Box<dyn Fn(&K, bool) -> T + Send + Sync>),
}

impl<K, T> RecursionPolicy<K, T> {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&K, bool) -> T + Send + Sync + 'static,
    {
        Self::Callback(Box::new(f))
    }
}

impl<K, T: fmt::Debug> fmt::Debug for RecursionPolicy<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail => f.write_str("Fail"),
            Self::FallThrough => f.write_str("FallThrough"),
            Self::Fallback(value) => f.debug_tuple("Fallback").field(value).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// A hook run on every successfully computed value before it is stored.
///
/// The hook runs under the manager lock. If it fails, the slot fails with its error.
pub type PostCompute<T> = Box<dyn Fn(&T) -> StorageEntry + Send + Sync>;

/// Everything a slot needs to know about the cache it belongs to.
pub(crate) struct Access<'a, K, T, L: StorageLock> {
    pub manager: &'a StorageManager<L>,
    /// Describes the cache in diagnostics, e.g. "in a lazy value".
    pub kind: &'static str,
    pub input: &'a K,
    /// Whether `input` identifies the slot and should appear in diagnostics.
    pub keyed: bool,
    /// `None` uses the default of the manager's lock.
    pub recursion: Option<&'a RecursionPolicy<K, T>>,
    pub post_compute: Option<&'a dyn Fn(&T) -> StorageEntry>,
}

impl<K: fmt::Debug, T, L: StorageLock> Access<'_, K, T, L> {
    fn debug_input(&self) -> Option<&dyn fmt::Debug> {
        self.keyed.then_some(self.input as &dyn fmt::Debug)
    }
}

/// Storage for the result of one memoized computation.
pub struct Slot<T> {
    state: RwLock<SlotState<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SlotState::NotComputed),
        }
    }

    /// Whether the slot holds a value or a failure.
    pub fn is_computed(&self) -> bool {
        self.state.read().is_terminal()
    }

    /// Whether a computation of this slot is running.
    pub fn is_computing(&self) -> bool {
        self.state.read().is_computing()
    }

    pub fn state_name(&self) -> &'static str {
        self.state.read().name()
    }
}

impl<T: Clone> Slot<T> {
    /// A snapshot of the current state.
    pub fn state(&self) -> SlotState<T> {
        self.state.read().clone()
    }

    /// The stored payload, if the slot is in a terminal state.
    fn peek(&self) -> Option<StorageEntry<T>> {
        match &*self.state.read() {
            SlotState::Done(value) => Some(Ok(value.clone())),
            SlotState::Failed(error) => Some(Err(error.clone())),
            _ => None,
        }
    }

    /// Returns the stored result, computing it first if needed.
    pub(crate) fn enter<K, L>(
        &self,
        access: &Access<'_, K, T, L>,
        compute: &dyn Fn() -> StorageEntry<T>,
    ) -> StorageEntry<T>
    where
        K: fmt::Debug,
        L: StorageLock,
    {
        let manager = access.manager;
        metric!(counter("storage.access") += 1, "manager" => manager.debug_text());

        if let Some(stored) = self.peek() {
            return stored.map_err(|error| manager.handle_exception(error));
        }

        let _guard = manager.lock()?;

        let recursive = {
            let mut state = self.state.write();
            match &*state {
                SlotState::Done(value) => return Ok(value.clone()),
                SlotState::Failed(error) => return Err(manager.handle_exception(error.clone())),
                SlotState::NotComputed => {
                    *state = SlotState::Computing;
                    None
                }
                SlotState::Computing => {
                    *state = SlotState::RecursionDetected;
                    Some(true)
                }
                SlotState::RecursionDetected => Some(false),
            }
        };

        if let Some(first_time) = recursive {
            if let Some(result) = self.on_recursion(access, first_time) {
                return result;
            }
        }

        self.compute(access, compute)
    }

    /// Applies the recursion policy, `None` means the computation runs again.
    fn on_recursion<K, L>(
        &self,
        access: &Access<'_, K, T, L>,
        first_time: bool,
    ) -> Option<StorageEntry<T>>
    where
        K: fmt::Debug,
        L: StorageLock,
    {
        let manager = access.manager;
        if first_time {
            metric!(counter("storage.recursion") += 1, "manager" => manager.debug_text());
        }
        tracing::debug!(
            manager = %manager,
            kind = access.kind,
            input = ?access.debug_input(),
            first_time,
            "recursion detected",
        );

        let fail = || {
            let error = StorageError::recursion(access.kind, access.debug_input(), manager);
            Some(Err(manager.handle_exception(error)))
        };

        match access.recursion {
            Some(RecursionPolicy::Fail) => fail(),
            Some(RecursionPolicy::FallThrough) => None,
            Some(RecursionPolicy::Fallback(value)) => Some(Ok(value.clone())),
            Some(RecursionPolicy::Callback(callback)) => {
                Some(Ok(callback(access.input, first_time)))
            }
            None if manager.falls_through_on_recursion() => None,
            None => fail(),
        }
    }

    /// Runs the computation and commits its outcome. Must be called with the manager lock held.
    fn compute<K, L>(
        &self,
        access: &Access<'_, K, T, L>,
        compute: &dyn Fn() -> StorageEntry<T>,
    ) -> StorageEntry<T>
    where
        K: fmt::Debug,
        L: StorageLock,
    {
        let manager = access.manager;

        // Only reached when the computation unwinds without being caught.
        let unwind_guard = defer(|| {
            let mut state = self.state.write();
            if state.is_computing() {
                *state = SlotState::NotComputed;
            }
        });

        tracing::trace!(
            manager = %manager,
            kind = access.kind,
            input = ?access.debug_input(),
            "computing",
        );
        metric!(counter("storage.computation") += 1, "manager" => manager.debug_text());

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let value = compute()?;
            // Skipped when a nested computation settled the slot, the commit then reports a race.
            if let Some(post_compute) = access.post_compute {
                if self.state.read().is_computing() {
                    post_compute(&value)?;
                }
            }
            Ok(value)
        }))
        .unwrap_or_else(|payload| Err(StorageError::from_panic(payload)));

        let result = self.commit(access, outcome);
        unwind_guard.cancel();
        result
    }

    fn commit<K, L>(
        &self,
        access: &Access<'_, K, T, L>,
        outcome: StorageEntry<T>,
    ) -> StorageEntry<T>
    where
        K: fmt::Debug,
        L: StorageLock,
    {
        let manager = access.manager;
        let mut state = self.state.write();

        if let Err(error) = &outcome {
            if error.is_cancellation() {
                if state.is_computing() {
                    *state = SlotState::NotComputed;
                }
                drop(state);
                tracing::debug!(
                    manager = %manager,
                    input = ?access.debug_input(),
                    "computation cancelled",
                );
                metric!(counter("storage.cancelled") += 1, "manager" => manager.debug_text());
                return outcome;
            }
        }

        if !state.is_computing() {
            let found = state.name();
            drop(state);
            tracing::error!(
                manager = %manager,
                input = ?access.debug_input(),
                found,
                "race condition detected",
            );
            metric!(counter("storage.race") += 1, "manager" => manager.debug_text());
            let error = StorageError::race(access.debug_input(), found, manager);
            return Err(manager.handle_exception(error));
        }

        match outcome {
            Ok(value) => {
                *state = SlotState::Done(value.clone());
                Ok(value)
            }
            Err(error) => {
                *state = SlotState::Failed(error.clone());
                drop(state);
                Err(manager.handle_exception(error))
            }
        }
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("state", &self.state_name())
            .finish()
    }
}
