use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, ensure};
use lockstore::{
    CacheWithNotNullValues, LazyValue, MemoizedFunction, StorageEntry, StorageError,
    StorageManager,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    pub kind: Kind,
    /// The number of distinct keys the workers spread their calls over.
    pub keys: usize,
    /// How long every computation takes.
    #[serde(with = "humantime_serde")]
    pub work: Duration,
    /// Every key divisible by this fails.
    #[serde(default)]
    pub fails_every: Option<usize>,
    /// The first computation of every key divisible by this is cancelled.
    #[serde(default)]
    pub cancels_every: Option<usize>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Lazy,
    Memoized,
    Cache,
}

/// The computation shared by all keys of a workload, recording how often each key ran.
#[derive(Debug)]
pub struct Work {
    duration: Duration,
    fails_every: Option<usize>,
    cancels_every: Option<usize>,
    computations: Vec<AtomicUsize>,
    cancellations: Vec<AtomicUsize>,
}

impl Work {
    fn new(workload: &Workload) -> Self {
        Self {
            duration: workload.work,
            fails_every: workload.fails_every,
            cancels_every: workload.cancels_every,
            computations: (0..workload.keys).map(|_| AtomicUsize::new(0)).collect(),
            cancellations: (0..workload.keys).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    fn run(&self, key: usize) -> StorageEntry<usize> {
        self.computations[key].fetch_add(1, Ordering::Relaxed);
        thread::sleep(self.duration);

        let divides = |every: Option<usize>| every.is_some_and(|every| key % every.max(1) == 0);
        if divides(self.cancels_every)
            && self.cancellations[key]
                .compare_exchange(0, 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            return Err(StorageError::Cancelled);
        }
        if divides(self.fails_every) {
            return Err(StorageError::computation(format!("key {key} is broken")));
        }
        Ok(key * 2)
    }

    /// Keys that were computed more often than their cancellations allow.
    pub fn violations(&self) -> usize {
        self.computations
            .iter()
            .zip(&self.cancellations)
            .filter(|(computations, cancellations)| {
                computations.load(Ordering::Relaxed) > 1 + cancellations.load(Ordering::Relaxed)
            })
            .count()
    }

    /// The total number of computations that ran.
    pub fn computations(&self) -> usize {
        self.computations
            .iter()
            .map(|computations| computations.load(Ordering::Relaxed))
            .sum()
    }
}

enum Target {
    Lazy(Vec<LazyValue<usize>>),
    Memoized(MemoizedFunction<usize, usize>),
    Cache(CacheWithNotNullValues<usize, usize>),
}

/// A workload with its storage set up, ready to be hammered by workers.
pub struct PreparedWorkload {
    pub concurrency: usize,
    pub keys: usize,
    pub work: Arc<Work>,
    target: Target,
}

pub fn prepare_workload(manager: &StorageManager, workload: &Workload) -> Result<PreparedWorkload> {
    ensure!(workload.keys > 0, "a workload needs at least one key");
    ensure!(workload.concurrency > 0, "a workload needs at least one worker");
    let work = Arc::new(Work::new(workload));

    let target = match workload.kind {
        Kind::Lazy => Target::Lazy(
            (0..workload.keys)
                .map(|key| {
                    let work = Arc::clone(&work);
                    manager.create_lazy_value(move || work.run(key))
                })
                .collect(),
        ),
        Kind::Memoized => {
            let work = Arc::clone(&work);
            Target::Memoized(manager.create_memoized_function(move |key: &usize| work.run(*key)))
        }
        Kind::Cache => Target::Cache(manager.create_cache_with_not_null_values()),
    };

    Ok(PreparedWorkload {
        concurrency: workload.concurrency,
        keys: workload.keys,
        work,
        target,
    })
}

impl PreparedWorkload {
    pub fn process_key(&self, key: usize) -> StorageEntry<usize> {
        match &self.target {
            Target::Lazy(values) => values[key].get(),
            Target::Memoized(function) => function.invoke(&key),
            Target::Cache(cache) => cache.compute_if_absent(&key, || self.work.run(key)),
        }
    }
}
