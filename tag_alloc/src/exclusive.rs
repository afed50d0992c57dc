//! A spin lock around a whole heap, for sharing it between threads.

use crate::TagAlloc;
use spin::Mutex;

/// A value behind a single spin lock.
///
/// `TagAlloc` itself is single threaded. To share one heap between threads,
/// put it in an `Exclusive` and do all work inside `with_exclusive_access`.
pub struct Exclusive<T> {
    inner: Mutex<T>,
}

/// A `TagAlloc` heap that can be shared between threads.
pub type SharedTagAlloc = Exclusive<TagAlloc>;

impl<T> Exclusive<T> {
    /// Wrap `value`.
    pub const fn new(value: T) -> Exclusive<T> {
        Exclusive {
            inner: Mutex::new(value),
        }
    }

    /// Get exclusive, mutable access to the inner value.
    ///
    /// `f` must not re-enter this method for the same `Exclusive`: the lock is
    /// not re-entrant and doing so spins forever.
    #[inline]
    pub fn with_exclusive_access<F, U>(&self, f: F) -> U
    where
        for<'x> F: FnOnce(&'x mut T) -> U,
    {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Unwrap the inner value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
