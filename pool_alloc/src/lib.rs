/*!

`pool_alloc`: a first-fit, free-list allocator over one fixed pool.

`pool_alloc` hands out variable-sized blocks of memory from a single pool of
`N` bytes that is reserved up front. It never asks an operating system for
more memory and never gives any back, which makes it usable from the very
first instructions of a freestanding kernel or firmware image, before anything
like paging exists.

- **Small and predictable:** every block carries one two word header. The
  free list lives inside the free blocks themselves, so there is no metadata
  outside the pool.

- **Freestanding:** `#![no_std]`, no dependency on an operating system.

- **Checked release:** every header carries a tag, and a pointer handed back
  to [`Heap::release`] is validated before anything is modified. Releasing a
  pointer twice, or one that never came from the heap, is reported instead of
  silently corrupting the free list.

`pool_alloc` is geared towards hosts that make a moderate number of
allocations from a pool whose size is known at build time. Allocation and
release both walk the free list, so they are *O(free blocks)*; it is a poor
choice when allocation is a performance bottleneck.

- [Using a `Heap` directly](#using-a-heap-directly)
- [Using `pool_alloc` as the Global Allocator](#using-pool_alloc-as-the-global-allocator)
- [`cargo` Features](#cargo-features)
- [Configuration](#configuration)
- [Implementation Notes and Constraints](#implementation-notes-and-constraints)
- [License](#license)

## Using a `Heap` directly

```
use pool_alloc::{Heap, MergePolicy};

let heap = Heap::<4096>::with_merge_policy(MergePolicy::AddressOrder);

let buffer = heap.allocate(100).expect("a fresh 4 KiB heap has room for 100 bytes");
unsafe {
    buffer.as_ptr().write_bytes(0xAB, 100);
    heap.release(buffer.as_ptr()).expect("released exactly once");
}

let stats = heap.stats();
assert_eq!(stats.free_blocks, 1);
assert_eq!(stats.free_bytes, heap.capacity());
```

## Using `pool_alloc` as the Global Allocator

```no_run
use pool_alloc::DefaultPoolAlloc;

// Use `pool_alloc` as the global allocator.
#[global_allocator]
static ALLOC: DefaultPoolAlloc = DefaultPoolAlloc::INIT;
# fn main() {}
```

A `PoolAlloc` refuses layouts aligned to more than [`ALIGNMENT`] by returning
null, and `alloc` reports exhaustion the same way.

## `cargo` Features

- **locking**: On by default. Guard [`PoolAlloc`] with a spin lock, so that it
  may be shared between threads, or between a main loop and interrupt
  handlers that never interrupt each other mid-allocation. Without it,
  `PoolAlloc::allocate`, `PoolAlloc::stats` and `PoolAlloc::check_integrity`
  become `unsafe fn`s, and the caller must guarantee that only one control
  flow ever calls into the allocator. Installing such a `PoolAlloc` as the
  `#[global_allocator]` of a program that runs more than one thread is
  undefined behavior.

- **extra_assertions**: Enable various extra, expensive integrity assertions
  and defensive mechanisms, such as poisoning freed memory with `0x57` and
  checking that the poison is intact when a block is handed out again. The
  whole heap structure is verified after every operation. This incurs a large
  runtime overhead. It is useful when debugging a use-after-free or
  `pool_alloc` itself.

- **log**: Report initialization, exhaustion, grants, releases and merges
  through the [`log`](https://docs.rs/log) facade. Make sure the installed
  logger does not allocate from the heap it is logging about.

## Configuration

The pool size of [`DefaultPoolAlloc`] is read from the
`POOL_ALLOC_DEFAULT_POOL_BYTES` environment variable at build time, and
defaults to 32 KiB. A [`Heap`] or [`PoolAlloc`] of any other size can be
created by naming its size explicitly.

## Implementation Notes and Constraints

- Every block, free or allocated, starts with a [`HEADER_SIZE`] header
  holding the block's total size and a tag saying whether it is free.

- No block is smaller than [`MIN_BLOCK_SIZE`]. Requests are rounded up to a
  multiple of [`ALIGNMENT`] after adding the header, so zero sized requests
  get a minimum sized block.

- The maximum alignment supported is [`ALIGNMENT`].

- The blocks always tile the pool exactly: their sizes add up to `N`.

- Free blocks sit on a doubly linked free list whose links are stored in the
  free blocks' payloads. Allocation takes the *first* block on the list that
  is large enough, and splits off the remainder if it can form a block of its
  own. How released blocks are merged with their neighbors depends on the
  heap's [`MergePolicy`].

```text
+------------------------------------------------------------------------------+
| Pool (N bytes, aligned to ALIGNMENT)                                         |
|                                                                              |
| +-----------+-----------+---------------------+-----------+---------------+  |
| | allocated |   free    |      allocated      |   free    |   allocated   |  |
| +-----------+-----------+---------------------+-----------+---------------+  |
|                   ^                                ^                         |
|                   |                                |                         |
|       Head -------+        +-----------------------+                         |
|                   |        |                                                 |
|                   +--next--+                                                 |
+------------------------------------------------------------------------------+
```

## License

Licensed under the [Mozilla Public License 2.0](https://www.mozilla.org/en-US/MPL/2.0/).

 */

#![deny(missing_docs)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate cfg_if;

#[macro_use]
mod extra_assert;

#[macro_use]
mod log_shim;

mod block;
mod const_init;
mod heap;

cfg_if! {
    if #[cfg(feature = "locking")] {
        mod imp_spin;
        use imp_spin as imp;
    } else {
        mod imp_unsync;
        use imp_unsync as imp;
    }
}

pub use block::{BlockInfo, ALIGNMENT, HEADER_SIZE, MIN_BLOCK_SIZE};
pub use heap::{Blocks, FreeBlocks, Heap, HeapStats, MergePolicy};
pub use memory_units::Bytes;

use const_init::ConstInit;
use core::alloc::{GlobalAlloc, Layout};
use core::fmt;
use core::ptr::{self, NonNull};

/// The pool size of [`DefaultPoolAlloc`], in bytes.
///
/// Set at build time through the `POOL_ALLOC_DEFAULT_POOL_BYTES` environment
/// variable; 32 KiB when unset.
pub const DEFAULT_POOL_BYTES: usize =
    include!(concat!(env!("OUT_DIR"), "/pool_alloc_default_pool_bytes.txt"));

/// No free block is large enough for the request, or the request is too large
/// to ever be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocErr;

impl fmt::Display for AllocErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("memory allocation failed: the pool has no free block large enough")
    }
}

/// Why a pointer could not be released.
///
/// Whenever one of these is returned, the heap was left exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// The pointer does not point into the heap's pool, or the heap has never
    /// handed out anything.
    ForeignPointer,
    /// The header in front of the pointer is not where a block could start.
    Misaligned,
    /// The block is already free.
    DoubleRelease,
    /// The header in front of the pointer is not a valid allocated block
    /// header.
    CorruptHeader,
}

impl fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let reason = match *self {
            ReleaseError::ForeignPointer => "pointer was not allocated from this heap",
            ReleaseError::Misaligned => "pointer is not at the start of a block payload",
            ReleaseError::DoubleRelease => "block was already released",
            ReleaseError::CorruptHeader => "block header is corrupt",
        };
        write!(f, "cannot release: {}", reason)
    }
}

/// A structural problem found by [`Heap::check_integrity`].
///
/// Offsets are relative to the start of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityError {
    /// A block does not start on an [`ALIGNMENT`] boundary.
    Misaligned {
        /// Where the block starts.
        offset: usize,
    },
    /// A block runs past the end of the pool.
    OutOfBounds {
        /// Where the block starts.
        offset: usize,
    },
    /// A block header carries neither the free nor the allocated tag.
    BadTag {
        /// Where the block starts.
        offset: usize,
    },
    /// A block is smaller than [`MIN_BLOCK_SIZE`].
    Undersized {
        /// Where the block starts.
        offset: usize,
        /// The size recorded in its header.
        size: usize,
    },
    /// The free list links to something that is not the start of a block.
    StrayLink {
        /// The linked offset.
        offset: usize,
    },
    /// An allocated block is on the free list.
    AllocatedInFreeList {
        /// Where the block starts.
        offset: usize,
    },
    /// A free list node's `prev` link does not point back at its predecessor.
    BrokenLink {
        /// Where the node starts.
        offset: usize,
    },
    /// The free list is not sorted by address under
    /// [`MergePolicy::AddressOrder`].
    OutOfOrder {
        /// Where the first node out of order starts.
        offset: usize,
    },
    /// The free list never ends.
    FreeListCycle,
    /// A free block is missing from the free list.
    UnlistedFreeBlock,
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            IntegrityError::Misaligned { offset } => {
                write!(f, "block at offset {} is misaligned", offset)
            }
            IntegrityError::OutOfBounds { offset } => {
                write!(f, "block at offset {} runs past the end of the pool", offset)
            }
            IntegrityError::BadTag { offset } => {
                write!(f, "block at offset {} has an invalid tag", offset)
            }
            IntegrityError::Undersized { offset, size } => write!(
                f,
                "block at offset {} is {} bytes, less than the minimum block size",
                offset, size
            ),
            IntegrityError::StrayLink { offset } => {
                write!(f, "free list links to offset {}, which is not a block", offset)
            }
            IntegrityError::AllocatedInFreeList { offset } => {
                write!(f, "allocated block at offset {} is on the free list", offset)
            }
            IntegrityError::BrokenLink { offset } => {
                write!(f, "free list node at offset {} has a broken back link", offset)
            }
            IntegrityError::OutOfOrder { offset } => {
                write!(f, "free list node at offset {} is out of address order", offset)
            }
            IntegrityError::FreeListCycle => f.write_str("the free list is cyclic"),
            IntegrityError::UnlistedFreeBlock => {
                f.write_str("a free block is missing from the free list")
            }
        }
    }
}

/// A [`Heap`] that can be shared, and installed as the `#[global_allocator]`.
///
/// # Safety
///
/// The pool is part of the `PoolAlloc`, so it cannot move in memory while any
/// allocation is live. That is not an issue when it is a `static`.
pub struct PoolAlloc<const N: usize> {
    heap: imp::Exclusive<Heap<N>>,
}

impl<const N: usize> ConstInit for PoolAlloc<N> {
    const INIT: Self = PoolAlloc {
        heap: imp::Exclusive::INIT,
    };
}

impl<const N: usize> PoolAlloc<N> {
    /// An initial `const` default construction of a `PoolAlloc` allocator,
    /// using [`MergePolicy::ListOrder`].
    ///
    /// This is usable for initializing `static`s that get set as the global
    /// allocator.
    pub const INIT: Self = <Self as ConstInit>::INIT;

    /// Same as [`PoolAlloc::INIT`].
    pub const fn new() -> Self {
        Self::with_merge_policy(MergePolicy::ListOrder)
    }

    /// Create a `PoolAlloc` whose heap merges free blocks according to
    /// `policy`.
    pub const fn with_merge_policy(policy: MergePolicy) -> Self {
        PoolAlloc {
            heap: imp::Exclusive::new(Heap::with_merge_policy(policy)),
        }
    }

    /// See [`Heap::release`].
    ///
    /// # Safety
    ///
    /// Same as [`Heap::release`]. Without the `locking` feature, also the
    /// same as [`PoolAlloc::allocate`].
    pub unsafe fn release(&self, ptr: *mut u8) -> Result<(), ReleaseError> {
        self.heap.with_exclusive_access(|heap| heap.release(ptr))
    }
}

cfg_if! {
    if #[cfg(feature = "locking")] {
        impl<const N: usize> PoolAlloc<N> {
            /// See [`Heap::allocate`].
            pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocErr> {
                unsafe { self.heap.with_exclusive_access(|heap| heap.allocate(size)) }
            }

            /// See [`Heap::stats`].
            pub fn stats(&self) -> HeapStats {
                unsafe { self.heap.with_exclusive_access(|heap| heap.stats()) }
            }

            /// See [`Heap::check_integrity`].
            pub fn check_integrity(&self) -> Result<(), IntegrityError> {
                unsafe { self.heap.with_exclusive_access(|heap| heap.check_integrity()) }
            }
        }
    } else {
        impl<const N: usize> PoolAlloc<N> {
            /// See [`Heap::allocate`].
            ///
            /// # Safety
            ///
            /// Nothing serializes calls without the `locking` feature. No other
            /// thread or interrupt handler may be inside any method of this
            /// `PoolAlloc` while this runs.
            pub unsafe fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocErr> {
                self.heap.with_exclusive_access(|heap| heap.allocate(size))
            }

            /// See [`Heap::stats`].
            ///
            /// # Safety
            ///
            /// Same as [`PoolAlloc::allocate`].
            pub unsafe fn stats(&self) -> HeapStats {
                self.heap.with_exclusive_access(|heap| heap.stats())
            }

            /// See [`Heap::check_integrity`].
            ///
            /// # Safety
            ///
            /// Same as [`PoolAlloc::allocate`].
            pub unsafe fn check_integrity(&self) -> Result<(), IntegrityError> {
                self.heap.with_exclusive_access(|heap| heap.check_integrity())
            }
        }
    }
}

impl<const N: usize> Default for PoolAlloc<N> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const N: usize> GlobalAlloc for PoolAlloc<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT.0 {
            return ptr::null_mut();
        }

        match self.allocate(layout.size()) {
            Ok(ptr) => ptr.as_ptr(),
            Err(AllocErr) => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let result = self.release(ptr);
        extra_assert_eq!(result, Ok(()), "dealloc of {:p} failed", ptr);
    }
}

/// A [`PoolAlloc`] over a pool of [`DEFAULT_POOL_BYTES`].
pub type DefaultPoolAlloc = PoolAlloc<DEFAULT_POOL_BYTES>;
