use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use dashmap::DashMap;
use lockstore::{LogAndThrow, StorageError, StorageManager};

use crate::{CallCounter, OverlapDetector, race, setup_manager};

#[test]
fn lazy_value_computes_at_most_once() {
    let manager = setup_manager("contended");
    let counter = CallCounter::new();
    let value = manager.create_lazy_value({
        let counter = counter.clone();
        move || {
            let call = counter.hit();
            thread::sleep(Duration::from_millis(10));
            Ok(call + 100)
        }
    });

    let results = race(16, |_| value.get().unwrap());

    assert!(results.iter().all(|result| *result == 100));
    assert_eq!(counter.count(), 1);
}

#[test]
fn computed_lazy_value_with_post_compute_is_read_concurrently() {
    let manager = setup_manager("post-compute");
    let hooked = CallCounter::new();
    let value = manager.create_lazy_value_with_post_compute(|| Ok(vec!["Foo", "Bar"]), {
        let hooked = hooked.clone();
        move |_| {
            hooked.hit();
            Ok(())
        }
    });
    assert_eq!(value.get().unwrap(), ["Foo", "Bar"]);

    let results = race(16, |_| (0..100).map(|_| value.get().unwrap()).last());

    assert!(results.iter().all(|result| result.as_deref() == Some(&["Foo", "Bar"][..])));
    assert_eq!(hooked.count(), 1);
}

#[test]
fn every_key_is_computed_once() {
    let manager = setup_manager("keys");
    let computations = Arc::new(DashMap::<u32, usize>::new());
    let function = manager.create_memoized_function({
        let computations = Arc::clone(&computations);
        move |key: &u32| {
            *computations.entry(*key).or_default() += 1;
            Ok(key * 2)
        }
    });

    let results = race(8, |_| {
        (0..100)
            .map(|key| function.invoke(&key).unwrap())
            .sum::<u32>()
    });

    assert!(results.iter().all(|sum| *sum == 9900));
    assert_eq!(function.len(), 100);
    assert_eq!(computations.len(), 100);
    assert!(computations.iter().all(|entry| *entry.value() == 1));
}

#[test]
fn computations_of_different_keys_do_not_overlap() {
    let manager = setup_manager("serialized");
    let detector = OverlapDetector::new();
    let function = manager.create_memoized_function({
        let detector = detector.clone();
        move |key: &&str| {
            let _running = detector.enter();
            thread::sleep(Duration::from_millis(20));
            Ok(key.len())
        }
    });

    let results = race(2, |index| {
        let key = ["first", "second"][index];
        function.invoke(&key).unwrap()
    });

    assert_eq!(results, [5, 6]);
    assert_eq!(detector.max_running(), 1);
}

#[test]
fn managers_sharing_a_lock_serialize_each_other() {
    let manager = setup_manager("shared");
    let logging =
        manager.replace_exception_handling("logging", Arc::new(LogAndThrow::new("logging")));
    assert!(manager.shares_lock_with(&logging));

    let detector = OverlapDetector::new();
    let computation = |detector: OverlapDetector| {
        move || -> Result<(), StorageError> {
            let _running = detector.enter();
            thread::sleep(Duration::from_millis(20));
            Ok(())
        }
    };
    let a = manager.create_lazy_value(computation(detector.clone()));
    let b = logging.create_lazy_value(computation(detector.clone()));

    race(2, |index| match index {
        0 => a.get().unwrap(),
        _ => b.get().unwrap(),
    });

    assert_eq!(detector.max_running(), 1);
}

#[test]
fn waiting_for_the_lock_can_be_cancelled() {
    lockstore_test::setup();
    let cancelled = Arc::new(AtomicBool::new(false));
    let manager = StorageManager::builder("cancellable")
        .check_cancelled({
            let cancelled = Arc::clone(&cancelled);
            move || {
                if cancelled.load(Ordering::SeqCst) {
                    return Err(StorageError::Cancelled);
                }
                Ok(())
            }
        })
        .check_cancelled_interval(Duration::from_millis(5))
        .build();

    let started = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let blocking = manager.create_lazy_value({
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        move || {
            started.wait();
            release.wait();
            Ok("blocking")
        }
    });
    let waiting = manager.create_lazy_value(|| Ok("waiting"));

    thread::scope(|scope| {
        let holder = scope.spawn(|| blocking.get());
        started.wait();

        cancelled.store(true, Ordering::SeqCst);
        assert!(waiting.get().unwrap_err().is_cancellation());
        assert!(!waiting.is_computed());

        cancelled.store(false, Ordering::SeqCst);
        release.wait();
        assert_eq!(holder.join().unwrap().unwrap(), "blocking");
    });

    assert_eq!(waiting.get().unwrap(), "waiting");
}
