use std::sync::Arc;

use lockstore::{CacheWithNotNullValues, CacheWithNullableValues, Slot, StorageError};

use crate::{CallCounter, race, setup_manager};

#[test]
fn entries_are_identified_by_key_only() {
    let manager = setup_manager("descriptors");
    let cache: CacheWithNotNullValues<String, usize> = manager.create_cache_with_not_null_values();
    let computations = CallCounter::new();

    let results = race(8, |index| {
        cache
            .compute_if_absent(&"Foo".to_owned(), || {
                computations.hit();
                Ok(index)
            })
            .unwrap()
    });

    assert!(results.iter().all(|result| *result == results[0]));
    assert_eq!(computations.count(), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn absent_values_are_cached() {
    let manager = setup_manager("descriptors");
    let cache: CacheWithNullableValues<&str, u32> = manager.create_cache_with_nullable_values();
    let computations = CallCounter::new();
    let lookup = || {
        computations.hit();
        Ok(None)
    };

    assert_eq!(cache.compute_if_absent(&"Bar", lookup).unwrap(), None);
    assert_eq!(cache.compute_if_absent(&"Bar", lookup).unwrap(), None);
    assert_eq!(computations.count(), 1);
    assert!(cache.is_computed(&"Bar"));
    assert!(!cache.is_computed(&"Baz"));
}

#[test]
fn failures_are_cached_per_key() {
    let manager = setup_manager("descriptors");
    let cache: CacheWithNotNullValues<u8, u8> = manager.create_cache_with_not_null_values();

    let err = cache
        .compute_if_absent(&1, || Err(StorageError::computation("missing class")))
        .unwrap_err();
    assert!(
        cache
            .compute_if_absent(&1, || Ok(1))
            .unwrap_err()
            .is_same_failure(&err)
    );
    assert_eq!(cache.compute_if_absent(&2, || Ok(2)).unwrap(), 2);
}

#[test]
fn bounded_function_recomputes_evicted_keys() {
    let manager = setup_manager("bounded");
    let map = moka::sync::Cache::<u32, Arc<Slot<u32>>>::new(16);
    let computations = CallCounter::new();
    let function = manager.create_memoized_function_with_map(
        {
            let computations = computations.clone();
            move |key: &u32| {
                computations.hit();
                Ok(key + 1)
            }
        },
        map.clone(),
    );

    race(4, |_| {
        for key in 0..8 {
            assert_eq!(function.invoke(&key).unwrap(), key + 1);
        }
    });
    assert_eq!(computations.count(), 8);

    map.invalidate(&3);
    assert!(!function.is_computed(&3));
    assert_eq!(function.invoke(&3).unwrap(), 4);
    assert_eq!(computations.count(), 9);
}
