use crate::const_init::ConstInit;
#[cfg(feature = "extra_assertions")]
use core::cell::Cell;
use core::cell::UnsafeCell;

/// Exclusive access to a `T` for hosts that drive everything from one
/// sequential control flow, and never call into the allocator from an
/// interrupt handler.
pub(crate) struct Exclusive<T> {
    inner: UnsafeCell<T>,

    #[cfg(feature = "extra_assertions")]
    in_use: Cell<bool>,
}

// Every entry point that reaches this is `unsafe` without the "locking"
// feature, and its callers promise there is only ever one caller at a time.
unsafe impl<T: Send> Sync for Exclusive<T> {}

impl<T: ConstInit> ConstInit for Exclusive<T> {
    const INIT: Self = Exclusive::new(T::INIT);
}

impl<T> Exclusive<T> {
    pub(crate) const fn new(value: T) -> Self {
        Exclusive {
            inner: UnsafeCell::new(value),

            #[cfg(feature = "extra_assertions")]
            in_use: Cell::new(false),
        }
    }

    #[cfg(feature = "extra_assertions")]
    fn enter(&self) {
        assert!(!self.in_use.replace(true), "`Exclusive<T>` is not re-entrant");
    }

    #[cfg(not(feature = "extra_assertions"))]
    #[inline(always)]
    fn enter(&self) {}

    #[cfg(feature = "extra_assertions")]
    fn leave(&self) {
        self.in_use.set(false);
    }

    #[cfg(not(feature = "extra_assertions"))]
    #[inline(always)]
    fn leave(&self) {}

    /// Get access to the inner value.
    ///
    /// # Safety
    ///
    /// It is the callers' responsibility to ensure that `f` does not re-enter
    /// this method for this `Exclusive` instance, and that no other control
    /// flow calls it concurrently.
    #[inline]
    pub(crate) unsafe fn with_exclusive_access<F, U>(&self, f: F) -> U
    where
        F: FnOnce(&T) -> U,
    {
        self.enter();
        let result = f(&*self.inner.get());
        self.leave();
        result
    }
}
