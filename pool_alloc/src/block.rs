//! Block headers and the size arithmetic around them.
//!
//! Every block in the pool, free or allocated, starts with a `BlockHeader`.
//! A free block additionally keeps its free list links in the first two words
//! of its payload, which is what `FreeBlock` overlays:
//!
//! ```text
//!   allocated:  | size | tag=ALLOCATED | payload ...................... |
//!   free:       | size | tag=FREE      | next | prev | unused .......... |
//!               ^                      ^
//!               block offset           block offset + HEADER_SIZE
//! ```
//!
//! Links are pool-relative offsets rather than addresses, with `NIL` standing
//! in for "no neighbor".

use core::cmp;
use core::mem;
use memory_units::Bytes;

/// The alignment of every block, and therefore of every payload handed out.
pub const ALIGNMENT: Bytes = Bytes(8);

/// The bytes of bookkeeping in front of every payload.
pub const HEADER_SIZE: Bytes = Bytes(mem::size_of::<BlockHeader>());

/// No block is ever smaller than this, header included. A free block of this
/// size still has room for its free list links.
pub const MIN_BLOCK_SIZE: Bytes = Bytes(32);

pub(crate) const NIL: usize = usize::MAX;

// Header tags. Every block header carries exactly one of these; anything else
// means the header was not written by us, or was overwritten.
pub(crate) const ALLOCATED_TAG: usize = 0xA110_C8ED_u32 as usize;
pub(crate) const FREE_TAG: usize = 0xF4EE_B10C_u32 as usize;

// Written over the unused part of free blocks when "extra_assertions" is
// enabled. Unexpected `0x57575757` values in your data mean a use-after-free.
#[cfg(feature = "extra_assertions")]
pub(crate) const FREE_PATTERN: u8 = 0x57;

pub(crate) const FREE_BLOCK_SIZE: usize = mem::size_of::<FreeBlock>();

#[repr(C)]
pub(crate) struct BlockHeader {
    pub(crate) size: usize,
    pub(crate) tag: usize,
}

#[repr(C)]
pub(crate) struct FreeBlock {
    pub(crate) header: BlockHeader,
    pub(crate) next: usize,
    pub(crate) prev: usize,
}

const _: () = assert!(HEADER_SIZE.0 % ALIGNMENT.0 == 0);
const _: () = assert!(MIN_BLOCK_SIZE.0 % ALIGNMENT.0 == 0);
const _: () = assert!(FREE_BLOCK_SIZE <= MIN_BLOCK_SIZE.0);
const _: () = assert!(mem::align_of::<FreeBlock>() <= ALIGNMENT.0);

/// The total block size needed to hand out `size` payload bytes, or `None` if
/// computing it overflows.
pub(crate) fn block_size_for(size: usize) -> Option<Bytes> {
    let padded = size
        .checked_add(HEADER_SIZE.0)?
        .checked_add(ALIGNMENT.0 - 1)?;
    let aligned = padded & !(ALIGNMENT.0 - 1);
    Some(Bytes(cmp::max(aligned, MIN_BLOCK_SIZE.0)))
}

/// Whether a free block of `block_size` bytes leaves a viable free remainder
/// after carving `needed` bytes off it.
pub(crate) fn should_split(block_size: Bytes, needed: Bytes) -> bool {
    extra_assert!(block_size >= needed);
    block_size - needed >= MIN_BLOCK_SIZE
}

#[inline]
pub(crate) fn encode_link(link: Option<usize>) -> usize {
    link.unwrap_or(NIL)
}

#[inline]
pub(crate) fn decode_link(raw: usize) -> Option<usize> {
    if raw == NIL {
        None
    } else {
        Some(raw)
    }
}

/// A snapshot of one block in a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Where the block's header starts, relative to the start of the pool.
    pub offset: usize,
    /// The block's total size, header included.
    pub size: Bytes,
    /// Whether the block is currently handed out.
    pub allocated: bool,
}

impl BlockInfo {
    /// The usable bytes behind the header.
    pub fn payload_size(&self) -> Bytes {
        self.size - HEADER_SIZE
    }

    /// The pool-relative offset of the block's payload.
    pub fn payload_offset(&self) -> usize {
        self.offset + HEADER_SIZE.0
    }
}
