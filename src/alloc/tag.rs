//! The owner tag at the end of every block.
//!
//! ```plaintext
//! +----------------------------+ <- block start (what the caller gets)
//! | payload                    | usable_size - TAG_SIZE bytes
//! +----------------------------+
//! | owner id (u32, unaligned)  | TAG_SIZE bytes
//! +----------------------------+ <- block start + usable_size
//! ```
//!
//! The tag is placed using the allocator's *usable* size, not the requested
//! size, since that is all we can recover again at `free()` time.

use std::mem;

use crate::owner::OwnerId;

pub const TAG_SIZE: usize = mem::size_of::<u32>();

/// How many bytes of a block with `usable` bytes are attributed to its owner
#[inline]
pub const fn payload_size(usable: usize) -> usize {
    usable - TAG_SIZE
}

/// # Safety
///
/// `block` must be valid for writes of `usable` bytes, `usable >= TAG_SIZE`
#[inline]
pub unsafe fn write_tag(block: *mut u8, usable: usize, owner: OwnerId) {
    debug_assert!(usable >= TAG_SIZE);
    block
        .add(payload_size(usable))
        .cast::<u32>()
        .write_unaligned(owner.0)
}

/// # Safety
///
/// `block` must be valid for reads of `usable` bytes, `usable >= TAG_SIZE`
#[inline]
pub unsafe fn read_tag(block: *const u8, usable: usize) -> OwnerId {
    debug_assert!(usable >= TAG_SIZE);
    OwnerId(
        block
            .add(payload_size(usable))
            .cast::<u32>()
            .read_unaligned(),
    )
}
