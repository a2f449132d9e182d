use std::{
    alloc::{GlobalAlloc, Layout},
    cmp,
    ptr::{self, NonNull},
};

use crate::owner::current_owner;

use super::{interpose::Tracker, raw::RawAlloc};

// SAFETY: every block comes from `allocate_aligned_for()` or
// `allocate_zeroed_for()`, which honour `layout.align()` (the zeroed path is
// only taken when the backend's minimum alignment already covers it), and
// every block is given back to the same tracker.
unsafe impl<'a, A, const N: usize> GlobalAlloc for Tracker<'a, A, N>
where
    A: RawAlloc + Sync,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocate_aligned_for(current_owner(), layout.size(), layout.align())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= A::MIN_ALIGN {
            return self
                .allocate_zeroed_for(current_owner(), layout.size(), 1)
                .map_or(ptr::null_mut(), NonNull::as_ptr);
        }
        let data = self.alloc(layout);
        if !data.is_null() {
            data.write_bytes(0, layout.size());
        }
        data
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _: Layout) {
        // SAFETY: the caller passes a block from `alloc()`
        self.free(ptr)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= A::MIN_ALIGN {
            return self
                .reallocate(ptr, new_size)
                .map_or(ptr::null_mut(), NonNull::as_ptr);
        }
        // The underlying `realloc()` knows nothing about big alignments
        let new_layout = Layout::from_size_align_unchecked(new_size, layout.align());
        let new_ptr = self.alloc(new_layout);
        if !new_ptr.is_null() {
            ptr::copy_nonoverlapping(ptr, new_ptr, cmp::min(layout.size(), new_size));
            self.free(ptr);
        }
        new_ptr
    }
}

#[cfg(test)]
mod tests {
    use std::alloc::{GlobalAlloc, Layout};

    use crate::{
        alloc::{DlHeap, Tracker},
        owner::{self, OwnerId},
        stats::Accounting,
    };

    #[test]
    fn layouts_round_trip_through_global_alloc() {
        let acc = Accounting::<64>::new();
        let tracker = Tracker::new(DlHeap, &acc);
        let _scope = owner::scope(OwnerId(0x31));

        unsafe {
            let small = Layout::from_size_align(24, 8).unwrap();
            let big = Layout::from_size_align(100, 4096).unwrap();

            let a = tracker.alloc(small);
            let b = tracker.alloc_zeroed(big);
            assert_eq!(b as usize % 4096, 0);
            assert!(std::slice::from_raw_parts(b, 100).iter().all(|b| *b == 0));
            assert_eq!(acc.total_used_bytes(), 124);

            let a = tracker.realloc(a, small, 240);
            let b = tracker.realloc(b, big, 10);
            assert_eq!(b as usize % 4096, 0);
            assert_eq!(acc.total_used_bytes(), 250);
            assert_eq!(acc.slot_usage(OwnerId(0x31)).unwrap().block_count, 2);

            tracker.dealloc(a, Layout::from_size_align(240, 8).unwrap());
            tracker.dealloc(b, Layout::from_size_align(10, 4096).unwrap());
        }
        assert_eq!(acc.total_used_bytes(), 0);
        assert_eq!(acc.total_block_count(), 0);
    }

    #[test]
    fn zeroed_small_layout_is_zeroed() {
        let acc = Accounting::<64>::new();
        let tracker = Tracker::new(DlHeap, &acc);
        unsafe {
            let layout = Layout::from_size_align(33, 1).unwrap();
            let data = tracker.alloc_zeroed(layout);
            assert!(std::slice::from_raw_parts(data, 33).iter().all(|b| *b == 0));
            tracker.dealloc(data, layout);
        }
        assert_eq!(acc.total_block_count(), 0);
    }
}
