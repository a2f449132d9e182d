use std::{fmt, sync::atomic::Ordering};

use bytemuck::Zeroable;

use crate::{owner::OwnerId, util::num::to_signed};

use super::{OwnerSlot, SlotUsage, Totals};

/// Number of slots in the process-wide table
pub const DEFAULT_CAPACITY: usize = 0x10000;

/// A fixed-size, direct-mapped table of per-owner counters, plus the global
/// [`Totals`].
///
/// An owner lives in slot `owner & (N - 1)`. There is no chaining, so two
/// owners with equal low bits alias into the same slot. Only one of them
/// can hold it at a time, and the other one's figures are silently dropped
/// (the totals stay exact). That is the price of every update being a
/// handful of atomic ops, with no locking and no allocation. The table is
/// called from inside the allocator, so it can afford neither.
///
/// ```plaintext
///        owner & (N-1)
/// 0x10003 ----+
///             v
/// +-----+-----+-----+-----+     +-------------+
/// |  0  |  1  |  2  |  3  | ... | totals      |
/// +-----+-----+-----+-----+     +-------------+
///          ^
/// 0x00003 -+  (aliases with 0x10003 for N = 0x10000)
/// ```
#[repr(C)]
pub struct Accounting<const N: usize = DEFAULT_CAPACITY> {
    slots: [OwnerSlot; N],
    totals: Totals,
}

// SAFETY: an array of `Zeroable` slots and a `Zeroable` `Totals`
unsafe impl<const N: usize> Zeroable for Accounting<N> {}

impl<const N: usize> Accounting<N> {
    pub const CAPACITY: usize = N;

    const MASK: usize = {
        assert!(N.is_power_of_two(), "capacity must be a power of two");
        N - 1
    };

    /// A zeroed table, usable in a `static`
    pub const fn new() -> Self {
        let _ = Self::MASK;
        Self {
            slots: [const { OwnerSlot::new() }; N],
            totals: Totals::new(),
        }
    }

    /// A zeroed table on the heap. Use this for big tables outside of a
    /// `static`, they will not fit on a thread's stack.
    pub fn boxed() -> Box<Self> {
        let _ = Self::MASK;
        bytemuck::allocation::zeroed_box()
    }

    /// The slot an owner maps to
    #[inline]
    pub const fn slot_index(owner: OwnerId) -> usize {
        owner.0 as usize & Self::MASK
    }

    /// The slot `owner` maps to, whoever holds it right now
    pub fn slot_for(&self, owner: OwnerId) -> &OwnerSlot {
        &self.slots[Self::slot_index(owner)]
    }

    /// Get the slot for `owner`, claiming it if it is unclaimed or if its
    /// occupant has released everything (balance `<= 0`). Returns `None` if
    /// another owner holds it.
    ///
    /// Claiming is a CAS on the owner field from whatever we observed. A
    /// negative balance left behind by the previous occupant is reset to `0`
    /// afterwards, but only on a best-effort basis: if a concurrent update
    /// moved the counter in the meantime, the reset is skipped. Since
    /// another owner may steal the slot right after the CAS, ownership is
    /// always re-read before handing the slot out.
    pub fn claim_or_get(&self, owner: OwnerId) -> Option<&OwnerSlot> {
        let slot = self.slot_for(owner);
        let old_owner = slot.owner.load(Ordering::Acquire);
        let old_allocated = slot.allocated.load(Ordering::Relaxed);
        let old_blocks = slot.blocks.load(Ordering::Relaxed);

        if old_owner == 0 || old_allocated <= 0 {
            let claimed = slot
                .owner
                .compare_exchange(old_owner, owner.0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if claimed {
                if old_allocated < 0 {
                    _ = slot.allocated.compare_exchange(
                        old_allocated,
                        0,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    );
                }
                if old_blocks < 0 {
                    _ = slot.blocks.compare_exchange(
                        old_blocks,
                        0,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    );
                }
            }
        }

        if slot.owner.load(Ordering::Acquire) == owner.0 {
            Some(slot)
        } else {
            None
        }
    }

    /// Record a new block of `bytes` for `owner`
    #[inline]
    pub fn alloc_update(&self, owner: OwnerId, bytes: usize) {
        self.totals.add(bytes);
        if let Some(slot) = self.claim_or_get(owner) {
            slot.add(to_signed(bytes));
        }
    }

    /// Record the release of a block of `bytes` that was tagged with `owner`
    #[inline]
    pub fn free_update(&self, owner: OwnerId, bytes: usize) {
        self.totals.sub(bytes);
        if let Some(slot) = self.claim_or_get(owner) {
            slot.sub(to_signed(bytes));
        }
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn total_used_bytes(&self) -> usize {
        self.totals.used_memory()
    }

    pub fn total_block_count(&self) -> usize {
        self.totals.memory_block()
    }

    /// Every slot that has an owner and a non-zero byte balance
    pub fn owner_slots(&self) -> impl Iterator<Item = SlotUsage> + '_ {
        self.slots.iter().filter_map(|slot| {
            if slot.owner.load(Ordering::Acquire) == 0 {
                return None;
            }
            let usage = slot.usage();
            (!usage.owner.is_none() && usage.allocated_bytes != 0).then_some(usage)
        })
    }

    /// Visit every slot that has an owner and a non-zero byte balance
    pub fn for_each_owner_slot<F>(&self, mut visitor: F)
    where
        F: FnMut(OwnerId, isize, isize),
    {
        for usage in self.owner_slots() {
            visitor(usage.owner, usage.allocated_bytes, usage.block_count);
        }
    }

    /// Look at `owner`'s slot without claiming it. `None` if the slot is
    /// currently held by somebody else.
    pub fn slot_usage(&self, owner: OwnerId) -> Option<SlotUsage> {
        let usage = self.slot_for(owner).usage();
        (usage.owner == owner).then_some(usage)
    }

    /// Zero everything.
    ///
    /// This does not race well with concurrent updates, and is meant for
    /// reusing a table between runs, when nothing tracked is live.
    pub fn reset(&self) {
        for slot in self.slots.iter() {
            slot.clear();
        }
        self.totals.clear();
    }
}

impl<const N: usize> Default for Accounting<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for Accounting<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accounting")
            .field("capacity", &N)
            .field("active_slots", &self.owner_slots().count())
            .field("totals", &self.totals)
            .finish()
    }
}
