//! An example of what a freestanding kernel built on `pool_alloc` looks like:
//! one `static` pool behind the two entry points the rest of the system
//! calls, and a line-command console that allocates out of a `Heap` of its
//! own.

// We aren't using the standard library.
#![cfg_attr(not(test), no_std)]

mod console;

pub use console::{Console, Key, Terminal, MAX_COMMAND_LENGTH, SLOTS};

use core::ptr;
use pool_alloc::{DefaultPoolAlloc, ReleaseError};

// The kernel heap.
static HEAP: DefaultPoolAlloc = DefaultPoolAlloc::INIT;

/// Allocate `size` bytes from the kernel heap, or return null if it cannot
/// satisfy the request.
#[no_mangle]
pub extern "C" fn pool_allocate(size: usize) -> *mut u8 {
    match HEAP.allocate(size) {
        Ok(ptr) => ptr.as_ptr(),
        Err(_) => ptr::null_mut(),
    }
}

/// Give memory from `pool_allocate` back to the kernel heap. Null is
/// accepted and ignored.
///
/// Returns zero on success, or a negative code saying why `ptr` was refused.
///
/// # Safety
///
/// `ptr` must not be used after it is released.
#[no_mangle]
pub unsafe extern "C" fn pool_release(ptr: *mut u8) -> i32 {
    match HEAP.release(ptr) {
        Ok(()) => 0,
        Err(ReleaseError::ForeignPointer) => -1,
        Err(ReleaseError::Misaligned) => -2,
        Err(ReleaseError::DoubleRelease) => -3,
        Err(ReleaseError::CorruptHeader) => -4,
    }
}
