/// Runs its closure once, when it goes out of scope.
///
/// The closure also runs while unwinding, which makes this useful for restoring state that a
/// panicking computation would otherwise leave behind.
#[must_use = "the closure runs immediately if the guard is not bound"]
pub struct DeferGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> DeferGuard<F> {
    /// Disarms the guard without running the closure.
    pub fn cancel(mut self) {
        self.0 = None;
    }
}

impl<F: FnOnce()> Drop for DeferGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// Defers `f` until the returned guard is dropped.
pub fn defer<F: FnOnce()>(f: F) -> DeferGuard<F> {
    DeferGuard(Some(f))
}
