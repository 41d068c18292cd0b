use std::sync::Arc;

use lockstore::{LazyValue, StorageError};

use crate::{CallCounter, setup_manager};

#[test]
fn two_plus_two() {
    let manager = setup_manager("arithmetic");
    let four = manager.create_lazy_value(|| Ok(2 + 2));

    assert!(!four.is_computed());
    assert_eq!(four.get().unwrap(), 4);
    assert!(four.is_computed());
    assert!(!four.is_computing());
}

#[test]
fn failure_is_replayed_without_recomputing() {
    let manager = setup_manager("failures");
    let counter = CallCounter::new();
    let value = manager.create_lazy_value({
        let counter = counter.clone();
        move || -> Result<u32, StorageError> {
            counter.hit();
            Err(anyhow::anyhow!("unresolved supertype").into())
        }
    });

    let first = value.get().unwrap_err();
    let second = value.get().unwrap_err();

    assert_eq!(first.to_string(), "unresolved supertype");
    assert!(first.is_same_failure(&second));
    assert!(value.is_computed());
    assert_eq!(counter.count(), 1);
}

#[test]
fn panic_is_stored() {
    let manager = setup_manager("panics");
    let counter = CallCounter::new();
    let value = manager.create_lazy_value({
        let counter = counter.clone();
        move || -> Result<u32, StorageError> {
            counter.hit();
            panic!("descriptor is broken")
        }
    });

    let err = value.get().unwrap_err();
    assert!(matches!(&err, StorageError::Panicked(message) if message == "descriptor is broken"));
    assert!(value.get().unwrap_err().is_same_failure(&err));
    assert_eq!(counter.count(), 1);
}

#[test]
fn cancelled_computation_runs_again() {
    let manager = setup_manager("cancellation");
    let counter = CallCounter::new();
    let value = manager.create_lazy_value({
        let counter = counter.clone();
        move || match counter.hit() {
            0 => Err(StorageError::Cancelled),
            _ => Ok("resolved"),
        }
    });

    assert!(value.get().unwrap_err().is_cancellation());
    assert!(!value.is_computed());
    assert_eq!(value.get().unwrap(), "resolved");
    assert_eq!(value.get().unwrap(), "resolved");
    assert_eq!(counter.count(), 2);
}

#[test]
fn post_compute_publishes_to_its_own_thread_only() {
    let manager = setup_manager("post-compute");
    let seen_from_other_thread = CallCounter::new();
    let value: Arc<LazyValue<Vec<&str>>> = Arc::new_cyclic(|this: &std::sync::Weak<LazyValue<Vec<&str>>>| {
        let this = this.clone();
        let seen_from_other_thread = seen_from_other_thread.clone();
        manager
            .lazy_value(|| Ok(vec!["Foo"]))
            .post_compute(move |members| {
                let this = this.upgrade().ok_or(StorageError::Cancelled)?;
                // The computing thread sees the value before it is stored.
                assert_eq!(&this.get()?, members);

                let other = Arc::clone(&this);
                let seen = seen_from_other_thread.clone();
                std::thread::spawn(move || {
                    if !other.is_computed() {
                        seen.hit();
                    }
                })
                .join()
                .map_err(|_| StorageError::Cancelled)?;
                Ok(())
            })
            .build()
    });

    assert_eq!(value.get().unwrap(), ["Foo"]);
    assert_eq!(seen_from_other_thread.count(), 1);
}

#[test]
fn failing_post_compute_stores_the_failure() {
    let manager = setup_manager("post-compute");
    let value = manager.create_lazy_value_with_post_compute(
        || Ok(1),
        |_| Err(StorageError::computation("inconsistent supertypes")),
    );

    let err = value.get().unwrap_err();
    assert_eq!(err.to_string(), "inconsistent supertypes");
    assert!(value.is_computed());
    assert!(value.get().unwrap_err().is_same_failure(&err));
}
