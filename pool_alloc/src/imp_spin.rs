use crate::const_init::ConstInit;
use core::cell::UnsafeCell;
use spin::Mutex;

/// Exclusive access to a `T` for hosts where more than one thread or
/// interrupt handler may call into the allocator.
//
// The lock guards `()` rather than the value: a guard over the value would
// hand out a `&mut T` on every call, and that invalidates the payload
// pointers derived from earlier calls.
pub(crate) struct Exclusive<T> {
    lock: Mutex<()>,
    inner: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Exclusive<T> {}

impl<T: ConstInit> ConstInit for Exclusive<T> {
    const INIT: Self = Exclusive::new(T::INIT);
}

impl<T> Exclusive<T> {
    pub(crate) const fn new(value: T) -> Self {
        Exclusive {
            lock: Mutex::new(()),
            inner: UnsafeCell::new(value),
        }
    }

    /// Get access to the inner value while holding the lock.
    ///
    /// # Safety
    ///
    /// It is the callers' responsibility to ensure that `f` does not re-enter
    /// this method for this `Exclusive` instance. With a spin lock, that
    /// spins forever.
    #[inline]
    pub(crate) unsafe fn with_exclusive_access<F, U>(&self, f: F) -> U
    where
        F: FnOnce(&T) -> U,
    {
        let _guard = self.lock.lock();
        f(&*self.inner.get())
    }
}
