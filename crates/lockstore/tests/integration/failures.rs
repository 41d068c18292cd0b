use std::sync::Arc;

use lockstore::{ExceptionHandlingStrategy, StorageError, StorageManager};

use crate::{CallCounter, setup_manager};

/// Counts every failure that is handed to a caller.
#[derive(Debug, Default)]
struct Counting(CallCounter);

impl ExceptionHandlingStrategy for Counting {
    fn handle_exception(&self, error: StorageError) -> StorageError {
        self.0.hit();
        error
    }
}

fn counting_manager(debug_text: &str) -> (StorageManager, CallCounter) {
    lockstore_test::setup();
    let strategy = Counting::default();
    let handled = strategy.0.clone();
    let manager = StorageManager::builder(debug_text)
        .exception_strategy(strategy)
        .build();
    (manager, handled)
}

#[test]
fn fresh_and_replayed_failures_go_through_the_strategy() {
    let (manager, handled) = counting_manager("strategy");
    let value = manager.create_lazy_value(|| -> Result<(), StorageError> {
        Err(StorageError::computation("broken"))
    });

    value.get().unwrap_err();
    assert_eq!(handled.count(), 1);
    value.get().unwrap_err();
    assert_eq!(handled.count(), 2);
}

#[test]
fn cancellations_bypass_the_strategy() {
    let (manager, handled) = counting_manager("strategy");
    let function = manager.create_memoized_function(|_: &u8| -> Result<u8, StorageError> {
        Err(StorageError::Cancelled)
    });

    assert!(function.invoke(&1).unwrap_err().is_cancellation());
    assert!(
        manager
            .compute(|| -> Result<(), StorageError> { Err(StorageError::Cancelled) })
            .unwrap_err()
            .is_cancellation()
    );
    assert_eq!(handled.count(), 0);
}

#[test]
fn compute_runs_under_the_lock_without_caching() {
    let manager = setup_manager("compute");
    let counter = CallCounter::new();
    let run = || {
        manager.compute(|| {
            counter.hit();
            Ok(counter.count())
        })
    };

    assert_eq!(run().unwrap(), 1);
    assert_eq!(run().unwrap(), 2);
}

#[test]
fn replaced_strategy_applies_to_new_values_only() {
    let manager = setup_manager("original");
    let strategy = Counting::default();
    let handled = strategy.0.clone();
    let counting = manager.replace_exception_handling("counting", Arc::new(strategy));

    let failing = || -> Result<(), StorageError> { Err(StorageError::computation("broken")) };
    manager.create_lazy_value(failing).get().unwrap_err();
    assert_eq!(handled.count(), 0);

    counting.create_lazy_value(failing).get().unwrap_err();
    assert_eq!(handled.count(), 1);
    assert_eq!(counting.debug_text(), "counting");
    assert_ne!(counting.id(), manager.id());
}

#[test]
fn log_and_throw_passes_failures_on() {
    let manager = setup_manager("logged");
    let logged = manager.replace_exception_handling(
        "logged",
        Arc::new(lockstore::LogAndThrow::new("logged")),
    );
    let value = logged.create_nullable_lazy_value(|| -> Result<Option<u8>, StorageError> {
        Err(StorageError::computation("unresolved"))
    });

    let err = value.get().unwrap_err();
    assert_eq!(err.to_string(), "unresolved");
    assert!(value.get().unwrap_err().is_same_failure(&err));
}
