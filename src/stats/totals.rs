use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use bytemuck::Zeroable;
use crossbeam::utils::CachePadded;

/// Global totals, updated on every allocate and free whether or not the
/// owner's slot could be claimed. These are exact: every alloc/free pair
/// contributes exactly once.
///
/// Both counters are written by every thread on every allocation, so each
/// gets its own cache line.
pub struct Totals {
    used_memory: CachePadded<AtomicUsize>,
    memory_block: CachePadded<AtomicUsize>,
}

// SAFETY: `CachePadded<T>` is `T` plus padding, and the all-zero
// `AtomicUsize` is a valid zero counter.
unsafe impl Zeroable for Totals {}

impl Totals {
    pub const fn new() -> Self {
        Self {
            used_memory: CachePadded::new(AtomicUsize::new(0)),
            memory_block: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub(crate) fn add(&self, bytes: usize) {
        self.used_memory.fetch_add(bytes, Ordering::Relaxed);
        self.memory_block.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn sub(&self, bytes: usize) {
        self.used_memory.fetch_sub(bytes, Ordering::Relaxed);
        self.memory_block.fetch_sub(1, Ordering::Relaxed);
    }

    /// Bytes currently allocated, tag overhead excluded
    pub fn used_memory(&self) -> usize {
        self.used_memory.load(Ordering::Relaxed)
    }

    /// Blocks currently allocated
    pub fn memory_block(&self) -> usize {
        self.memory_block.load(Ordering::Relaxed)
    }

    pub(crate) fn clear(&self) {
        self.used_memory.store(0, Ordering::Relaxed);
        self.memory_block.store(0, Ordering::Relaxed);
    }
}

impl Default for Totals {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Totals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Totals")
            .field("used_memory", &self.used_memory())
            .field("memory_block", &self.memory_block())
            .finish()
    }
}
