//! Helpers for testing memoized computations.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Computations are usually `'static` closures. Count their invocations with a
//!    [`CallCounter`], which can be cloned into the closure.
//!
//!  - To hit a cache from many threads at the same moment, use [`race`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use insta::{assert_debug_snapshot, assert_snapshot};
pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `lockstore` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("lockstore=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Counts how often a computation ran.
#[derive(Clone, Debug, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call and returns the number of calls before it.
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tracks how many computations are running at the same time.
#[derive(Clone, Debug, Default)]
pub struct OverlapDetector {
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl OverlapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a computation as running until the returned guard is dropped.
    pub fn enter(&self) -> OverlapGuard<'_> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        OverlapGuard(self)
    }

    /// The largest number of computations that were running at once.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct OverlapGuard<'a>(&'a OverlapDetector);

impl Drop for OverlapGuard<'_> {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs `f` on `threads` threads that all start at the same moment.
///
/// `f` receives the index of its thread. The results are returned in thread order.
pub fn race<T, F>(threads: usize, f: F) -> Vec<T>
where
    F: Fn(usize) -> T + Sync,
    T: Send,
{
    let barrier = Barrier::new(threads);
    thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|index| {
                let barrier = &barrier;
                let f = &f;
                scope.spawn(move || {
                    barrier.wait();
                    f(index)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    })
}
