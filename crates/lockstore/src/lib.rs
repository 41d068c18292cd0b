//! Thread-safe memoization for expensive, possibly self-recursive computations.
//!
//! A [`StorageManager`] creates [`LazyValue`]s, [`MemoizedFunction`]s and
//! [`CacheWithComputation`]s. Each of them computes every value at most once, serialized on the
//! manager's re-entrant lock, and replays the stored value or failure on every later access.
//! A computation that queries its own unfinished result is detected as recursion and handled by
//! a configurable [`RecursionPolicy`].
//!
//! ```
//! use lockstore::StorageManager;
//!
//! let manager = StorageManager::new("example");
//! let four = manager.create_lazy_value(|| Ok(2 + 2));
//! assert_eq!(four.get().unwrap(), 4);
//! assert!(four.is_computed());
//! ```

#[macro_use]
pub mod metrics;

pub mod cache;
pub mod config;
pub mod error;
pub mod lazy;
pub mod lock;
pub mod logging;
pub mod manager;
pub mod memoized;
pub mod single_thread;
pub mod slot;
pub mod strategy;
pub mod trace;
pub mod utils;

pub use cache::{CacheWithComputation, CacheWithNotNullValues, CacheWithNullableValues};
pub use error::{StorageEntry, StorageError};
pub use lazy::{LazyValue, LazyValueBuilder, NullableLazyValue};
pub use lock::{NoLock, ReentrantLock, StorageLock};
pub use manager::{StorageManager, StorageManagerBuilder};
pub use memoized::{
    BackingMap, MemoizedFunction, MemoizedFunctionBuilder, MemoizedFunctionToNullable,
};
pub use slot::{RecursionPolicy, Slot, SlotState};
pub use strategy::{ExceptionHandlingStrategy, LogAndThrow, Throw};
