use std::sync::atomic::{AtomicIsize, AtomicU32, Ordering};

use bytemuck::Zeroable;
use serde::{Deserialize, Serialize};

use crate::owner::OwnerId;

/// One entry of the statistics table. The counters are signed: a free can be
/// observed before the slot claim of its matching allocation, which drives
/// them negative for a while. A negative balance is a reclaim signal, it is
/// clamped the next time the slot is claimed.
#[repr(C)]
pub struct OwnerSlot {
    pub(super) owner: AtomicU32,
    pub(super) allocated: AtomicIsize,
    pub(super) blocks: AtomicIsize,
}

// SAFETY: all three fields are atomics of plain integers, for which the
// all-zero bit pattern is a valid (and unclaimed) value.
unsafe impl Zeroable for OwnerSlot {}

impl OwnerSlot {
    pub const fn new() -> Self {
        Self {
            owner: AtomicU32::new(0),
            allocated: AtomicIsize::new(0),
            blocks: AtomicIsize::new(0),
        }
    }

    /// The owner currently occupying this slot. This may change the moment
    /// after you read it.
    pub fn owner(&self) -> OwnerId {
        OwnerId(self.owner.load(Ordering::Acquire))
    }

    pub fn allocated_bytes(&self) -> isize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn block_count(&self) -> isize {
        self.blocks.load(Ordering::Relaxed)
    }

    /// Read every field. Each load is individually atomic, there is no
    /// snapshot isolation across the three.
    pub fn usage(&self) -> SlotUsage {
        SlotUsage {
            owner: self.owner(),
            allocated_bytes: self.allocated_bytes(),
            block_count: self.block_count(),
        }
    }

    pub(super) fn add(&self, bytes: isize) {
        self.allocated.fetch_add(bytes, Ordering::Relaxed);
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn sub(&self, bytes: isize) {
        self.allocated.fetch_sub(bytes, Ordering::Relaxed);
        self.blocks.fetch_sub(1, Ordering::Relaxed);
    }

    pub(super) fn clear(&self) {
        self.owner.store(0, Ordering::Release);
        self.allocated.store(0, Ordering::Relaxed);
        self.blocks.store(0, Ordering::Relaxed);
    }
}

impl Default for OwnerSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// What a reporter sees for one slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotUsage {
    pub owner: OwnerId,
    pub allocated_bytes: isize,
    pub block_count: isize,
}
