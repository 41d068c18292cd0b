use std::thread::{self, ThreadId};

/// A value that is only visible to the thread that created it.
///
/// Lazy values with a post-compute hook use this to hand their freshly computed value to the
/// computing thread while the hook is still running. Other threads keep waiting on the manager
/// lock until the value is stored.
#[derive(Debug, Clone)]
pub struct SingleThreadValue<T> {
    value: T,
    thread: ThreadId,
}

impl<T> SingleThreadValue<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            thread: thread::current().id(),
        }
    }

    /// Whether the value is visible to the current thread.
    pub fn has_value(&self) -> bool {
        self.thread == thread::current().id()
    }

    /// The value, if called from the owning thread.
    pub fn get(&self) -> Option<&T> {
        self.has_value().then_some(&self.value)
    }
}
