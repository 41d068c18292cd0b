use std::sync::{Arc, OnceLock};

use lockstore::{LazyValue, MemoizedFunction, StorageError};
use parking_lot::Mutex;

use crate::{CallCounter, setup_manager};

#[test]
fn self_recursion_returns_the_fallback() {
    let manager = setup_manager("supertypes");
    let observed = Arc::new(Mutex::new(None));
    let value: Arc<LazyValue<i32>> = Arc::new_cyclic(|this: &std::sync::Weak<LazyValue<i32>>| {
        let this = this.clone();
        let observed = Arc::clone(&observed);
        manager.create_recursion_tolerant_lazy_value(
            move || {
                let this = this.upgrade().ok_or(StorageError::Cancelled)?;
                let inner = this.get()?;
                *observed.lock() = Some(inner);
                Ok(inner * 10)
            },
            -1,
        )
    });

    assert_eq!(value.get().unwrap(), -10);
    assert_eq!(*observed.lock(), Some(-1));
    // The fallback is not stored, the outer computation is.
    assert_eq!(value.get().unwrap(), -10);
}

#[test]
fn self_recursion_fails_by_default() {
    let manager = setup_manager("supertypes");
    let counter = CallCounter::new();
    let value: Arc<LazyValue<i32>> = Arc::new_cyclic(|this: &std::sync::Weak<LazyValue<i32>>| {
        let this = this.clone();
        let counter = counter.clone();
        manager.create_lazy_value(move || {
            counter.hit();
            let this = this.upgrade().ok_or(StorageError::Cancelled)?;
            this.get()
        })
    });

    let err = value.get().unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("recursion detected in a lazy value under {manager}")
    );
    // A recursion failure that escapes the computation is stored like any other failure.
    assert!(value.is_computed());
    assert_eq!(value.get().unwrap_err().to_string(), err.to_string());
    assert_eq!(counter.count(), 1);
}

#[test]
fn recursion_through_another_function_names_the_key() {
    let manager = setup_manager("resolution");
    let resolve_b: Arc<OnceLock<MemoizedFunction<u32, u32>>> = Arc::new(OnceLock::new());

    let resolve_a: Arc<MemoizedFunction<u32, u32>> = Arc::new_cyclic(|this: &std::sync::Weak<MemoizedFunction<u32, u32>>| {
        let resolve_b = Arc::clone(&resolve_b);
        let this = this.clone();
        resolve_b
            .set(manager.create_memoized_function(move |key: &u32| {
                let resolve_a = this.upgrade().ok_or(StorageError::Cancelled)?;
                resolve_a.invoke(key)
            }))
            .ok();
        manager.create_memoized_function(move |key: &u32| {
            let resolve_b = resolve_b.get().ok_or(StorageError::Cancelled)?;
            Ok(resolve_b.invoke(key)? + 1)
        })
    });

    let err = resolve_a.invoke(&7).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("recursion detected in a memoized function on input: 7 under {manager}")
    );
    assert!(err.trace().is_some());
    assert!(resolve_a.is_computed(&7));
    assert!(resolve_b.get().unwrap().is_computed(&7));
}

#[test]
fn recursion_callback_breaks_cycles_per_key() {
    let manager = setup_manager("cycles");
    let cycles = CallCounter::new();
    let function: Arc<MemoizedFunction<u32, String>> = Arc::new_cyclic(|this: &std::sync::Weak<MemoizedFunction<u32, String>>| {
        let this = this.clone();
        let cycles = cycles.clone();
        manager
            .memoized_function(move |key: &u32| {
                let this = this.upgrade().ok_or(StorageError::Cancelled)?;
                let next = (key + 1) % 3;
                Ok(format!("{key} -> {}", this.invoke(&next)?))
            })
            .on_recursion(move |key, first_time| {
                assert!(first_time);
                cycles.hit();
                format!("cycle at {key}")
            })
            .build()
    });

    assert_eq!(function.invoke(&0).unwrap(), "0 -> 1 -> 2 -> cycle at 0");
    assert_eq!(cycles.count(), 1);
    assert_eq!(function.invoke(&1).unwrap(), "1 -> 2 -> cycle at 0");
    assert_eq!(function.len(), 3);
}

#[test]
fn no_locks_manager_falls_through() {
    use std::cell::OnceCell;

    use lockstore::NoLock;

    thread_local! {
        static DEPTH: OnceCell<MemoizedFunction<u32, u32, NoLock>> = const { OnceCell::new() };
    }

    let manager = crate::setup_single_threaded_manager("single");
    let counter = CallCounter::new();
    let function = manager.create_memoized_function({
        let counter = counter.clone();
        move |key: &u32| {
            if counter.hit() == 0 {
                let nested = DEPTH.with(|cell| cell.get().map(|function| function.invoke(key)));
                return Ok(nested.ok_or(StorageError::Cancelled)?? + 100);
            }
            Ok(*key)
        }
    });

    DEPTH.with(|cell| {
        let function = cell.get_or_init(|| function);
        // The nested call stores its value, the enclosing one finds the key settled.
        let err = function.invoke(&5).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("race condition detected on input: 5. Old value is Done under {manager}")
        );
        assert_eq!(function.invoke(&5).unwrap(), 5);
    });
    assert_eq!(counter.count(), 2);
}
