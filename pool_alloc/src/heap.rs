//! A first-fit, free-list heap carved out of one fixed-size pool.

use crate::block::{
    block_size_for, decode_link, encode_link, should_split, BlockHeader, BlockInfo, FreeBlock,
    ALIGNMENT, ALLOCATED_TAG, FREE_BLOCK_SIZE, FREE_TAG, HEADER_SIZE, MIN_BLOCK_SIZE,
};
#[cfg(feature = "extra_assertions")]
use crate::block::FREE_PATTERN;
use crate::const_init::ConstInit;
use crate::{AllocErr, IntegrityError, ReleaseError};
use core::cell::{Cell, UnsafeCell};
use core::cmp;
use core::fmt;
use core::ptr::{self, NonNull};
use memory_units::Bytes;

/// How a released block finds the free neighbors it merges with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Released blocks are pushed onto the head of the free list, and a free
    /// block is only merged with its *list* successor, when that successor
    /// starts exactly where the block ends.
    ///
    /// Two free blocks that are adjacent in memory but far apart in the free
    /// list stay separate until the list order happens to line them up, so
    /// this can report more fragmentation than there physically is.
    ListOrder,

    /// The free list is kept sorted by address, so every pair of adjacent
    /// free blocks is merged as soon as the second one is released. Release
    /// pays an *O(free blocks)* walk to find the insertion point.
    AddressOrder,
}

// The backing bytes. Payload pointers handed to callers are derived from the
// `UnsafeCell`, so the allocator and its callers may both write through them.
// Nothing ever takes a `&mut` to the pool while it is in use, since that would
// invalidate the pointers already handed out.
#[repr(C, align(8))]
struct Pool<const N: usize> {
    bytes: UnsafeCell<[u8; N]>,
}

/// A heap over a fixed pool of `N` bytes.
///
/// The pool is part of the `Heap` itself. It is set up lazily: the first call
/// to [`Heap::allocate`] (or an explicit [`Heap::init`]) turns it into a single
/// free block spanning all `N` bytes. From then on blocks are only ever split
/// and merged, so their sizes always add up to exactly `N`.
///
/// Allocation walks the free list and takes the first block that is large
/// enough, splitting off the remainder when it can form a block of its own.
/// Both allocation and release are *O(free blocks)*.
///
/// # Moving
///
/// Pointers handed out by a `Heap` point into the `Heap` itself. Do not move
/// it while any of them is live: use it through a `static`, or keep it behind
/// a shared borrow for as long as the allocations are in use. After a move,
/// [`Heap::release`] normally rejects the stale pointers as foreign.
///
/// All operations take `&self`. Taking `&mut Heap` while allocations are live
/// (other than to drop it) invalidates their pointers.
pub struct Heap<const N: usize> {
    pool: Pool<N>,
    head: Cell<Option<usize>>,
    initialized: Cell<bool>,
    policy: MergePolicy,
}

impl<const N: usize> ConstInit for Heap<N> {
    const INIT: Self = Heap::with_merge_policy(MergePolicy::ListOrder);
}

impl<const N: usize> Default for Heap<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for Heap<N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Heap")
            .field("capacity", &N)
            .field("initialized", &self.initialized.get())
            .field("head", &self.head.get())
            .field("policy", &self.policy)
            .finish()
    }
}

impl<const N: usize> Heap<N> {
    const CAPACITY_CHECK: () = assert!(
        N >= MIN_BLOCK_SIZE.0,
        "the pool must be able to hold at least one block"
    );

    /// An uninitialized heap using [`MergePolicy::ListOrder`].
    ///
    /// This is usable for initializing `static`s.
    pub const INIT: Self = <Self as ConstInit>::INIT;

    /// Create an uninitialized heap using [`MergePolicy::ListOrder`].
    pub const fn new() -> Self {
        Self::with_merge_policy(MergePolicy::ListOrder)
    }

    /// Create an uninitialized heap that merges free blocks according to
    /// `policy`.
    pub const fn with_merge_policy(policy: MergePolicy) -> Self {
        Heap {
            pool: Pool {
                bytes: UnsafeCell::new([0; N]),
            },
            head: Cell::new(None),
            initialized: Cell::new(false),
            policy,
        }
    }

    /// Install the single, pool-spanning free block.
    ///
    /// Only the first call does anything; [`Heap::allocate`] calls this
    /// itself, so calling it explicitly is never required.
    pub fn init(&self) {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_CHECK;

        if self.initialized.get() {
            return;
        }

        self.write_free_block(0, N, None, None);
        poison(self.free_tail(0), N - FREE_BLOCK_SIZE);
        self.head.set(Some(0));
        self.initialized.set(true);

        heap_debug!("initialized a {} byte pool", N);
        self.assert_integrity();
    }

    /// Has the pool been set up yet?
    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    /// The pool size.
    pub fn capacity(&self) -> Bytes {
        Bytes(N)
    }

    /// The merge policy this heap was created with.
    pub fn merge_policy(&self) -> MergePolicy {
        self.policy
    }

    /// Allocate at least `size` bytes, aligned to [`ALIGNMENT`](crate::ALIGNMENT).
    ///
    /// Zero sized requests are valid and get a minimum sized block. Fails
    /// without touching the heap if no free block is large enough, or if
    /// `size` is so large that padding it overflows.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocErr> {
        self.init();

        let needed = match block_size_for(size) {
            Some(needed) if needed.0 <= N => needed,
            _ => {
                heap_debug!("cannot ever satisfy a request for {} bytes", size);
                return Err(AllocErr);
            }
        };

        let at = match self.first_fit(needed) {
            Some(at) => at,
            None => {
                heap_debug!(
                    "out of memory: no free block of {} bytes for a {} byte request",
                    needed.0,
                    size
                );
                return Err(AllocErr);
            }
        };

        if should_split(Bytes(self.size(at)), needed) {
            self.split(at, needed);
        } else {
            self.unlink(at);
        }
        self.set_tag(at, ALLOCATED_TAG);

        let block_size = self.size(at);
        assert_poisoned(self.free_tail(at), block_size - FREE_BLOCK_SIZE);
        self.assert_integrity();

        heap_trace!(
            "allocated {} bytes as the {} byte block at offset {}",
            size,
            block_size,
            at
        );
        NonNull::new(self.payload(at)).ok_or(AllocErr)
    }

    /// Release a block previously returned by [`Heap::allocate`].
    ///
    /// A null `ptr` is ignored. The block header is recovered from `ptr` and
    /// validated before anything is modified: pointers outside the pool,
    /// misaligned pointers, headers without the allocated tag and blocks that
    /// were already released are reported as errors, and the heap is left
    /// untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be null, or a pointer returned by `allocate` on this heap
    /// that has not been released since. The header validation catches the
    /// common ways to get this wrong, but a forged header that passes it can
    /// still corrupt the heap. Nothing may access the block's memory after it
    /// is released.
    pub unsafe fn release(&self, ptr: *mut u8) -> Result<(), ReleaseError> {
        if ptr.is_null() {
            return Ok(());
        }

        let at = self.recover_header(ptr)?;
        let size = self.size(at);

        self.set_tag(at, FREE_TAG);
        poison(self.free_tail(at), size - FREE_BLOCK_SIZE);

        match self.policy {
            MergePolicy::ListOrder => self.link_between(at, None, self.head.get()),
            MergePolicy::AddressOrder => self.insert_by_address(at),
        }
        heap_trace!("released the {} byte block at offset {}", size, at);

        self.coalesce();
        self.assert_integrity();
        Ok(())
    }

    /// Does `ptr` point into this heap's pool, somewhere a payload could
    /// start?
    pub fn contains(&self, ptr: *const u8) -> bool {
        let offset = (ptr as usize).wrapping_sub(self.base() as usize);
        offset >= HEADER_SIZE.0 && offset < N
    }

    /// Every block in the pool, in address order.
    ///
    /// Before initialization the pool is reported as the one free block it is
    /// about to become.
    pub fn blocks(&self) -> Blocks<'_, N> {
        Blocks {
            heap: self,
            cursor: 0,
        }
    }

    /// The free list, in list order.
    pub fn free_blocks(&self) -> FreeBlocks<'_, N> {
        FreeBlocks {
            heap: self,
            cursor: if self.initialized.get() {
                self.head.get()
            } else {
                Some(0)
            },
        }
    }

    /// Summarize how the pool is currently used.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            capacity: Bytes(N),
            free_bytes: Bytes(0),
            free_blocks: 0,
            largest_free_block: Bytes(0),
            allocated_bytes: Bytes(0),
            allocated_blocks: 0,
        };

        for block in self.blocks() {
            if block.allocated {
                stats.allocated_bytes = stats.allocated_bytes + block.size;
                stats.allocated_blocks += 1;
            } else {
                stats.free_bytes = stats.free_bytes + block.size;
                stats.free_blocks += 1;
                stats.largest_free_block = cmp::max(stats.largest_free_block, block.size);
            }
        }

        stats
    }

    /// Verify the heap's structure.
    ///
    /// Walking from the start of the pool by each block's size must land
    /// exactly on the end of the pool, every block must be aligned, at least
    /// [`MIN_BLOCK_SIZE`](crate::MIN_BLOCK_SIZE) and correctly tagged, and the
    /// free list must be a well-formed doubly linked list of exactly the free
    /// blocks (sorted by address under [`MergePolicy::AddressOrder`]).
    pub fn check_integrity(&self) -> Result<(), IntegrityError> {
        if !self.initialized.get() {
            return Ok(());
        }

        let mut free = 0;
        let mut at = 0;
        while at < N {
            if at % ALIGNMENT.0 != 0 {
                return Err(IntegrityError::Misaligned { offset: at });
            }
            if N - at < MIN_BLOCK_SIZE.0 {
                return Err(IntegrityError::OutOfBounds { offset: at });
            }
            match self.tag(at) {
                ALLOCATED_TAG => {}
                FREE_TAG => free += 1,
                _ => return Err(IntegrityError::BadTag { offset: at }),
            }
            let size = self.size(at);
            if size < MIN_BLOCK_SIZE.0 {
                return Err(IntegrityError::Undersized { offset: at, size });
            }
            if size > N - at {
                return Err(IntegrityError::OutOfBounds { offset: at });
            }
            at += size;
        }

        // Links into the middle of a block only show up through the back
        // links or the count below.
        let mut listed = 0;
        let mut prev = None;
        let mut cursor = self.head.get();
        while let Some(node) = cursor {
            if !is_block_start::<N>(node) {
                return Err(IntegrityError::StrayLink { offset: node });
            }
            let size = self.size(node);
            if size < MIN_BLOCK_SIZE.0 || size > N - node {
                return Err(IntegrityError::StrayLink { offset: node });
            }
            if self.tag(node) != FREE_TAG {
                return Err(IntegrityError::AllocatedInFreeList { offset: node });
            }
            if self.prev(node) != prev {
                return Err(IntegrityError::BrokenLink { offset: node });
            }
            if self.policy == MergePolicy::AddressOrder && prev.map_or(false, |p| p > node) {
                return Err(IntegrityError::OutOfOrder { offset: node });
            }

            listed += 1;
            if listed > free {
                return Err(IntegrityError::FreeListCycle);
            }

            prev = Some(node);
            cursor = self.next(node);
        }

        if listed != free {
            return Err(IntegrityError::UnlistedFreeBlock);
        }
        Ok(())
    }

    fn first_fit(&self, needed: Bytes) -> Option<usize> {
        self.free_blocks()
            .find(|block| block.size >= needed)
            .map(|block| block.offset)
    }

    // Carve the low `needed` bytes off the free block at `at`. The remainder
    // becomes a free block that takes over `at`'s place in the free list, and
    // `at` is left outside of it.
    fn split(&self, at: usize, needed: Bytes) {
        let size = self.size(at);
        let rest = at + needed.0;
        let prev = self.prev(at);
        let next = self.next(at);

        self.write_free_block(rest, size - needed.0, prev, next);
        self.link_forward(prev, Some(rest));
        self.link_backward(next, Some(rest));
        self.set_size(at, needed.0);
    }

    fn unlink(&self, at: usize) {
        let prev = self.prev(at);
        let next = self.next(at);
        self.link_forward(prev, next);
        self.link_backward(next, prev);
    }

    fn link_between(&self, at: usize, prev: Option<usize>, next: Option<usize>) {
        self.set_prev(at, prev);
        self.set_next(at, next);
        self.link_forward(prev, Some(at));
        self.link_backward(next, Some(at));
    }

    fn insert_by_address(&self, at: usize) {
        let mut prev = None;
        let mut cursor = self.head.get();
        while let Some(node) = cursor {
            if node > at {
                break;
            }
            prev = Some(node);
            cursor = self.next(node);
        }
        self.link_between(at, prev, cursor);
    }

    // One sweep over the free list, merging each block with its list
    // successor for as long as the successor starts where the block ends.
    fn coalesce(&self) {
        let mut cursor = self.head.get();
        while let Some(at) = cursor {
            let next = match self.next(at) {
                Some(next) => next,
                None => break,
            };

            if at + self.size(at) == next {
                self.absorb(at, next);
            } else {
                cursor = Some(next);
            }
        }
    }

    fn absorb(&self, at: usize, next: usize) {
        let merged = self.size(at) + self.size(next);
        let after = self.next(next);

        self.set_next(at, after);
        self.link_backward(after, Some(at));
        self.set_size(at, merged);

        // The absorbed header is ordinary free space now.
        poison(self.raw(next), FREE_BLOCK_SIZE);
        heap_trace!("merged offsets {} and {} into a {} byte block", at, next, merged);
    }

    fn recover_header(&self, ptr: *const u8) -> Result<usize, ReleaseError> {
        if !self.initialized.get() || !self.contains(ptr) {
            return Err(ReleaseError::ForeignPointer);
        }

        let at = (ptr as usize) - (self.base() as usize) - HEADER_SIZE.0;
        if at % ALIGNMENT.0 != 0 {
            return Err(ReleaseError::Misaligned);
        }
        if N - at < MIN_BLOCK_SIZE.0 {
            return Err(ReleaseError::ForeignPointer);
        }

        match self.tag(at) {
            ALLOCATED_TAG => {}
            FREE_TAG => return Err(ReleaseError::DoubleRelease),
            _ => return Err(ReleaseError::CorruptHeader),
        }

        let size = self.size(at);
        if size < MIN_BLOCK_SIZE.0 || size > N - at {
            return Err(ReleaseError::CorruptHeader);
        }
        Ok(at)
    }

    fn info(&self, at: usize) -> BlockInfo {
        if !self.initialized.get() {
            return BlockInfo {
                offset: 0,
                size: Bytes(N),
                allocated: false,
            };
        }

        BlockInfo {
            offset: at,
            size: Bytes(self.size(at)),
            allocated: self.tag(at) == ALLOCATED_TAG,
        }
    }

    #[inline]
    fn assert_integrity(&self) {
        extra_assert_eq!(self.check_integrity(), Ok(()));
    }
}

/// Raw access to the headers inside the pool.
///
/// Every offset passed in here is the start of a block: it is aligned and at
/// least `MIN_BLOCK_SIZE` bytes away from the end of the pool.
impl<const N: usize> Heap<N> {
    #[inline]
    fn base(&self) -> *mut u8 {
        self.pool.bytes.get() as *mut u8
    }

    #[inline]
    fn raw(&self, offset: usize) -> *mut u8 {
        extra_assert!(offset <= N);
        unsafe { self.base().add(offset) }
    }

    #[inline]
    fn payload(&self, at: usize) -> *mut u8 {
        self.raw(at + HEADER_SIZE.0)
    }

    #[inline]
    fn free_tail(&self, at: usize) -> *mut u8 {
        self.raw(at + FREE_BLOCK_SIZE)
    }

    #[inline]
    fn block(&self, at: usize) -> *mut FreeBlock {
        extra_assert_eq!(at % ALIGNMENT.0, 0, "block at offset {} is misaligned", at);
        extra_assert!(
            N - at >= MIN_BLOCK_SIZE.0,
            "block at offset {} runs off the end of the pool",
            at
        );
        self.raw(at) as *mut FreeBlock
    }

    fn size(&self, at: usize) -> usize {
        unsafe { (*self.block(at)).header.size }
    }

    fn set_size(&self, at: usize, size: usize) {
        unsafe { (*self.block(at)).header.size = size }
    }

    fn tag(&self, at: usize) -> usize {
        unsafe { (*self.block(at)).header.tag }
    }

    fn set_tag(&self, at: usize, tag: usize) {
        unsafe { (*self.block(at)).header.tag = tag }
    }

    fn next(&self, at: usize) -> Option<usize> {
        decode_link(unsafe { (*self.block(at)).next })
    }

    fn set_next(&self, at: usize, next: Option<usize>) {
        unsafe { (*self.block(at)).next = encode_link(next) }
    }

    fn prev(&self, at: usize) -> Option<usize> {
        decode_link(unsafe { (*self.block(at)).prev })
    }

    fn set_prev(&self, at: usize, prev: Option<usize>) {
        unsafe { (*self.block(at)).prev = encode_link(prev) }
    }

    // `from.next = to`, where no `from` means the list head.
    fn link_forward(&self, from: Option<usize>, to: Option<usize>) {
        match from {
            Some(from) => self.set_next(from, to),
            None => self.head.set(to),
        }
    }

    // `from.prev = to`, if there is a `from`.
    fn link_backward(&self, from: Option<usize>, to: Option<usize>) {
        if let Some(from) = from {
            self.set_prev(from, to);
        }
    }

    fn write_free_block(&self, at: usize, size: usize, prev: Option<usize>, next: Option<usize>) {
        let block = FreeBlock {
            header: BlockHeader { size, tag: FREE_TAG },
            next: encode_link(next),
            prev: encode_link(prev),
        };
        unsafe { ptr::write(self.block(at), block) }
    }
}

// Could a block header sit at `offset`?
#[inline]
fn is_block_start<const N: usize>(offset: usize) -> bool {
    offset % ALIGNMENT.0 == 0 && offset < N && N - offset >= MIN_BLOCK_SIZE.0
}

extra_only! {
    fn poison(data: *mut u8, len: usize) {
        unsafe {
            ptr::write_bytes(data, FREE_PATTERN, len);
        }
    }
}

extra_only! {
    fn assert_poisoned(data: *mut u8, len: usize) {
        let bytes = unsafe { core::slice::from_raw_parts(data as *const u8, len) };
        assert!(
            bytes.iter().all(|byte| *byte == FREE_PATTERN),
            "free memory at {:p} was written to after it was released",
            data
        );
    }
}

/// Iterator over the blocks of a [`Heap`], in address order.
///
/// Created by [`Heap::blocks`].
#[derive(Debug)]
pub struct Blocks<'a, const N: usize> {
    heap: &'a Heap<N>,
    cursor: usize,
}

impl<'a, const N: usize> Iterator for Blocks<'a, N> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if !is_block_start::<N>(self.cursor) {
            return None;
        }

        let block = self.heap.info(self.cursor);
        self.cursor = self
            .cursor
            .saturating_add(cmp::max(block.size.0, MIN_BLOCK_SIZE.0));
        Some(block)
    }
}

/// Iterator over the free list of a [`Heap`], in list order.
///
/// Created by [`Heap::free_blocks`].
#[derive(Debug)]
pub struct FreeBlocks<'a, const N: usize> {
    heap: &'a Heap<N>,
    cursor: Option<usize>,
}

impl<'a, const N: usize> Iterator for FreeBlocks<'a, N> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let at = self.cursor?;
        // The heap may have changed since the last step.
        if !is_block_start::<N>(at) {
            self.cursor = None;
            return None;
        }
        let block = self.heap.info(at);
        self.cursor = if self.heap.initialized.get() {
            self.heap.next(at)
        } else {
            None
        };
        Some(block)
    }
}

/// A summary of how a [`Heap`]'s pool is used.
///
/// Byte counts are whole block sizes, headers included, so `free_bytes` and
/// `allocated_bytes` always add up to `capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// The pool size.
    pub capacity: Bytes,
    /// Bytes in free blocks.
    pub free_bytes: Bytes,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// The largest free block; no allocation needing more can succeed.
    pub largest_free_block: Bytes,
    /// Bytes in allocated blocks.
    pub allocated_bytes: Bytes,
    /// Number of allocated blocks.
    pub allocated_blocks: usize,
}
