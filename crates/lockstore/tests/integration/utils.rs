use lockstore::{NoLock, StorageManager};
use lockstore_test as test;

pub use test::{CallCounter, OverlapDetector, race};

/// Sets up logging and creates a manager with a re-entrant lock.
pub fn setup_manager(debug_text: &str) -> StorageManager {
    test::setup();
    StorageManager::new(debug_text)
}

/// Sets up logging and creates a manager without locks.
pub fn setup_single_threaded_manager(debug_text: &str) -> StorageManager<NoLock> {
    test::setup();
    StorageManager::no_locks(debug_text)
}
