use std::ptr::{self, NonNull};

use crate::{
    owner::{current_owner, OwnerId},
    stats::{Accounting, DEFAULT_CAPACITY},
    util::num::div_ceil,
};

use super::{
    oom::{self, AllocError, AtomicOomPolicy, OomPolicy},
    raw::RawAlloc,
    tag::{self, TAG_SIZE},
};

/// Wraps a [`RawAlloc`] so that every block it hands out carries the id of
/// the owner it was allocated for, and every allocation and free is booked
/// against that owner in an [`Accounting`] table.
///
/// Each block costs [`TAG_SIZE`] extra bytes. The size booked for a block is
/// its usable size minus the tag, so the tag never shows up in any figure.
/// On top of a [`DlHeap`](super::DlHeap) that is exactly the requested size,
/// except for zeroed blocks, which book their padded element count (see
/// [`Tracker::allocate_zeroed_for()`]). Allocators that round up (like
/// [`Libc`](super::Libc)) book the rounded size.
///
/// The plain operations attribute to [`current_owner()`], the `*_for()`
/// variants take the owner explicitly. `free()` always books against the
/// owner recorded in the block, whoever happens to be freeing it.
pub struct Tracker<'a, A, const N: usize = DEFAULT_CAPACITY>
where
    A: RawAlloc,
{
    raw: A,
    accounting: &'a Accounting<N>,
    oom: AtomicOomPolicy,
}

impl<'a, A, const N: usize> Tracker<'a, A, N>
where
    A: RawAlloc,
{
    /// A tracker that aborts when `raw` runs out of memory
    pub const fn new(raw: A, accounting: &'a Accounting<N>) -> Self {
        Self::with_policy(raw, accounting, OomPolicy::Abort)
    }

    pub const fn with_policy(raw: A, accounting: &'a Accounting<N>, policy: OomPolicy) -> Self {
        Self {
            raw,
            accounting,
            oom: AtomicOomPolicy::new(policy),
        }
    }

    /// Return the underlying allocator
    pub const fn raw(&self) -> &A {
        &self.raw
    }

    pub const fn accounting(&self) -> &'a Accounting<N> {
        self.accounting
    }

    pub fn oom_policy(&self) -> OomPolicy {
        self.oom.load()
    }

    pub fn set_oom_policy(&self, policy: OomPolicy) {
        self.oom.store(policy)
    }

    #[inline]
    fn oom(&self, size: usize) -> AllocError {
        oom::handle(self.oom.load(), size)
    }

    /// Tag a fresh block with `owner` and book it
    ///
    /// # Safety
    ///
    /// `block` must be a live block from `self.raw` of at least `TAG_SIZE`
    /// bytes
    unsafe fn fill_tag(&self, block: NonNull<u8>, owner: OwnerId) -> NonNull<u8> {
        let usable = self.raw.usable_size(block.as_ptr());
        tag::write_tag(block.as_ptr(), usable, owner);
        self.accounting.alloc_update(owner, tag::payload_size(usable));
        block
    }

    /// Recover the owner of a block and book its release. Returns the owner
    /// and the size that was booked.
    ///
    /// # Safety
    ///
    /// `block` must be a live block handed out by this tracker
    unsafe fn clean_tag(&self, block: NonNull<u8>) -> (OwnerId, usize) {
        let usable = self.raw.usable_size(block.as_ptr());
        let owner = tag::read_tag(block.as_ptr(), usable);
        let size = tag::payload_size(usable);
        self.accounting.free_update(owner, size);
        (owner, size)
    }

    /// Allocate `size` bytes for the current owner
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.allocate_for(current_owner(), size)
    }

    pub fn allocate_for(&self, owner: OwnerId, size: usize) -> Result<NonNull<u8>, AllocError> {
        let Some(total) = size.checked_add(TAG_SIZE) else {
            return Err(self.oom(size));
        };
        let Some(block) = NonNull::new(self.raw.malloc(total)) else {
            return Err(self.oom(size));
        };
        // SAFETY: fresh block of at least `total >= TAG_SIZE` bytes
        Ok(unsafe { self.fill_tag(block, owner) })
    }

    /// Like [`Tracker::allocate_for()`], for alignments the underlying
    /// allocator does not give out by default. `align` must be a power of
    /// two.
    pub fn allocate_aligned_for(
        &self,
        owner: OwnerId,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if align <= A::MIN_ALIGN {
            return self.allocate_for(owner, size);
        }
        let Some(total) = size.checked_add(TAG_SIZE) else {
            return Err(self.oom(size));
        };
        let Some(block) = NonNull::new(self.raw.memalign(align, total)) else {
            return Err(self.oom(size));
        };
        debug_assert!(crate::util::assert::aligned_to(block.as_ptr(), align));
        // SAFETY: fresh block of at least `total >= TAG_SIZE` bytes
        Ok(unsafe { self.fill_tag(block, owner) })
    }

    /// Allocate `count` zeroed elements of `size` bytes for the current owner
    pub fn allocate_zeroed(&self, count: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.allocate_zeroed_for(current_owner(), count, size)
    }

    /// The element count is rounded up so that the tag fits entirely in the
    /// zeroed tail, past the caller's `count * size` bytes. The padded count
    /// is what gets booked: 10 elements of 8 bytes book 84 bytes on a
    /// [`DlHeap`](super::DlHeap).
    pub fn allocate_zeroed_for(
        &self,
        owner: OwnerId,
        count: usize,
        size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let requested = count.saturating_mul(size);
        let padded = if size == 0 {
            Some((TAG_SIZE, 1))
        } else {
            count
                .checked_add(div_ceil(TAG_SIZE, size))
                .map(|count| (count, size))
        };
        let Some((count, size)) = padded else {
            return Err(self.oom(requested));
        };
        let Some(block) = NonNull::new(self.raw.calloc(count, size)) else {
            return Err(self.oom(requested));
        };
        // SAFETY: fresh block with at least `TAG_SIZE` bytes of padding
        Ok(unsafe { self.fill_tag(block, owner) })
    }

    /// Release a block, booking it against the owner it was allocated for.
    /// Null is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block handed out by this tracker
    pub unsafe fn free(&self, ptr: *mut u8) {
        let Some(block) = NonNull::new(ptr) else {
            return;
        };
        self.clean_tag(block);
        self.raw.free(block.as_ptr());
    }

    /// Resize a block for the current owner. See
    /// [`Tracker::reallocate_for()`].
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block handed out by this tracker
    pub unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.reallocate_for(current_owner(), ptr, size)
    }

    /// Resize a block. The old block is booked out against the owner it was
    /// tagged with, and the new one booked in for `owner`, so a block can
    /// change hands here. A null `ptr` is a plain allocation.
    ///
    /// If the underlying allocator fails and the policy lets us return, the
    /// original block is untouched and is booked back to its owner.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block handed out by this tracker
    pub unsafe fn reallocate_for(
        &self,
        owner: OwnerId,
        ptr: *mut u8,
        size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let Some(block) = NonNull::new(ptr) else {
            return self.allocate_for(owner, size);
        };
        let Some(total) = size.checked_add(TAG_SIZE) else {
            return Err(self.oom(size));
        };
        let (old_owner, old_size) = self.clean_tag(block);
        match NonNull::new(self.raw.realloc(block.as_ptr(), total)) {
            Some(block) => Ok(self.fill_tag(block, owner)),
            None => {
                self.accounting.alloc_update(old_owner, old_size);
                Err(self.oom(size))
            }
        }
    }

    /// The owner a live block is attributed to
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block handed out by this tracker
    pub unsafe fn owner_of(&self, ptr: NonNull<u8>) -> OwnerId {
        let usable = self.raw.usable_size(ptr.as_ptr());
        tag::read_tag(ptr.as_ptr(), usable)
    }

    /// The number of bytes booked for a live block
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block handed out by this tracker
    pub unsafe fn payload_size(&self, ptr: NonNull<u8>) -> usize {
        tag::payload_size(self.raw.usable_size(ptr.as_ptr()))
    }

    /// Null-on-failure shape of [`Tracker::allocate()`], for C-like callers
    pub fn malloc(&self, size: usize) -> *mut u8 {
        self.allocate(size).map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}

#[cfg(test)]
mod tests {
    use std::slice;

    use super::*;
    use crate::{alloc::DlHeap, owner};

    type Acc = Accounting<1024>;

    /// Never has any memory to give
    struct Exhausted;

    unsafe impl RawAlloc for Exhausted {
        const MIN_ALIGN: usize = 16;

        fn malloc(&self, _: usize) -> *mut u8 {
            ptr::null_mut()
        }

        fn calloc(&self, _: usize, _: usize) -> *mut u8 {
            ptr::null_mut()
        }

        fn memalign(&self, _: usize, _: usize) -> *mut u8 {
            ptr::null_mut()
        }

        unsafe fn realloc(&self, _: *mut u8, _: usize) -> *mut u8 {
            ptr::null_mut()
        }

        unsafe fn free(&self, _: *mut u8) {
            unreachable!()
        }

        unsafe fn usable_size(&self, _: *mut u8) -> usize {
            unreachable!()
        }
    }

    /// Allocates fine, but can never grow a block
    struct NoRealloc;

    unsafe impl RawAlloc for NoRealloc {
        const MIN_ALIGN: usize = DlHeap::MIN_ALIGN;

        fn malloc(&self, size: usize) -> *mut u8 {
            DlHeap.malloc(size)
        }

        fn calloc(&self, count: usize, size: usize) -> *mut u8 {
            DlHeap.calloc(count, size)
        }

        fn memalign(&self, align: usize, size: usize) -> *mut u8 {
            DlHeap.memalign(align, size)
        }

        unsafe fn realloc(&self, _: *mut u8, _: usize) -> *mut u8 {
            ptr::null_mut()
        }

        unsafe fn free(&self, ptr: *mut u8) {
            DlHeap.free(ptr)
        }

        unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
            DlHeap.usable_size(ptr)
        }
    }

    fn usage(acc: &Acc, owner: u32) -> (isize, isize) {
        let usage = acc.slot_usage(OwnerId(owner)).unwrap();
        (usage.allocated_bytes, usage.block_count)
    }

    #[test]
    fn allocate_then_free_returns_owner_to_zero() {
        let acc = Acc::new();
        let tracker = Tracker::new(DlHeap, &acc);
        let _scope = owner::scope(OwnerId(1));

        let block = tracker.allocate(300).unwrap();
        assert_eq!(usage(&acc, 1), (300, 1));
        unsafe { tracker.free(block.as_ptr()) };
        assert_eq!(usage(&acc, 1), (0, 0));
        assert_eq!(acc.total_used_bytes(), 0);
        assert_eq!(acc.total_block_count(), 0);
    }

    #[test]
    fn five_blocks_without_frees() {
        let acc = Acc::new();
        let tracker = Tracker::new(DlHeap, &acc);
        let _scope = owner::scope(OwnerId(1));

        let blocks: Vec<_> = (1..=5)
            .map(|i| tracker.allocate(1024 * i).unwrap())
            .collect();
        assert_eq!(acc.total_used_bytes(), 15360);
        assert_eq!(acc.total_block_count(), 5);
        assert_eq!(usage(&acc, 1), (15360, 5));

        for block in blocks {
            unsafe { tracker.free(block.as_ptr()) };
        }
    }

    #[test]
    fn blocks_carry_their_owner_and_free_books_against_it() {
        let acc = Acc::new();
        let tracker = Tracker::new(DlHeap, &acc);

        let block = owner::with_owner(OwnerId(0x21), || tracker.allocate(64).unwrap());
        assert_eq!(unsafe { tracker.owner_of(block) }, OwnerId(0x21));

        // freed from a thread bound to somebody else entirely
        let _scope = owner::scope(OwnerId(0x22));
        unsafe { tracker.free(block.as_ptr()) };
        assert_eq!(usage(&acc, 0x21), (0, 0));
        assert_eq!(acc.slot_usage(OwnerId(0x22)), None);
    }

    #[test]
    fn payload_is_writable_without_touching_the_tag() {
        let acc = Acc::new();
        let tracker = Tracker::new(DlHeap, &acc);
        let block = tracker.allocate_for(OwnerId(3), 100).unwrap();
        unsafe {
            block.as_ptr().write_bytes(0xff, 100);
            assert_eq!(tracker.owner_of(block), OwnerId(3));
            assert_eq!(tracker.payload_size(block), 100);
            tracker.free(block.as_ptr());
        }
    }

    #[test]
    fn free_null_is_a_no_op() {
        let acc = Acc::new();
        let tracker = Tracker::new(Exhausted, &acc);
        unsafe { tracker.free(ptr::null_mut()) };
        assert_eq!(acc.total_used_bytes(), 0);
        assert_eq!(acc.total_block_count(), 0);
        assert_eq!(acc.owner_slots().count(), 0);
    }

    #[test]
    fn zero_sized_allocation_is_one_empty_block() {
        let acc = Acc::new();
        let tracker = Tracker::new(DlHeap, &acc);
        let block = tracker.allocate_for(OwnerId(4), 0).unwrap();
        assert_eq!(unsafe { tracker.owner_of(block) }, OwnerId(4));
        assert_eq!(acc.total_used_bytes(), 0);
        assert_eq!(acc.total_block_count(), 1);
        assert_eq!(usage(&acc, 4), (0, 1));
        unsafe { tracker.free(block.as_ptr()) };
        assert_eq!(acc.total_block_count(), 0);
    }

    #[test]
    fn reallocate_moves_the_block_to_the_new_owner() {
        let acc = Acc::new();
        let tracker = Tracker::new(DlHeap, &acc);
        let block = tracker.allocate_for(OwnerId(0xb), 100).unwrap();
        unsafe { block.as_ptr().copy_from_nonoverlapping(b"hello".as_ptr(), 5) };

        let _scope = owner::scope(OwnerId(0xa));
        let block = unsafe { tracker.reallocate(block.as_ptr(), 300) }.unwrap();

        assert_eq!(unsafe { slice::from_raw_parts(block.as_ptr(), 5) }, b"hello");
        assert_eq!(unsafe { tracker.owner_of(block) }, OwnerId(0xa));
        assert_eq!(usage(&acc, 0xb), (0, 0));
        assert_eq!(usage(&acc, 0xa), (300, 1));
        // only the delta shows up globally
        assert_eq!(acc.total_used_bytes(), 300);
        assert_eq!(acc.total_block_count(), 1);
        unsafe { tracker.free(block.as_ptr()) };
    }

    #[test]
    fn reallocate_null_is_allocate() {
        let acc = Acc::new();
        let tracker = Tracker::new(DlHeap, &acc);
        let block = unsafe { tracker.reallocate_for(OwnerId(6), ptr::null_mut(), 48) }.unwrap();
        assert_eq!(usage(&acc, 6), (48, 1));
        unsafe { tracker.free(block.as_ptr()) };
    }

    #[test]
    fn allocate_zeroed_keeps_the_zeroed_region_clean() {
        let acc = Acc::new();
        let tracker = Tracker::new(DlHeap, &acc);
        let block = tracker.allocate_zeroed_for(OwnerId(7), 10, 8).unwrap();
        let bytes = unsafe { slice::from_raw_parts(block.as_ptr(), 80) };
        assert!(bytes.iter().all(|b| *b == 0));
        assert_eq!(unsafe { tracker.owner_of(block) }, OwnerId(7));
        // one extra element was reserved for the tag
        assert_eq!(usage(&acc, 7), (84, 1));
        unsafe { tracker.free(block.as_ptr()) };
        assert_eq!(usage(&acc, 7), (0, 0));
    }

    #[test]
    fn allocate_zeroed_handles_zero_sized_elements() {
        let acc = Acc::new();
        let tracker = Tracker::new(DlHeap, &acc);
        let block = tracker.allocate_zeroed_for(OwnerId(8), 100, 0).unwrap();
        assert_eq!(usage(&acc, 8), (0, 1));
        unsafe { tracker.free(block.as_ptr()) };
    }

    #[test]
    fn aligned_allocation_is_tagged_and_aligned() {
        let acc = Acc::new();
        let tracker = Tracker::new(DlHeap, &acc);
        let block = tracker.allocate_aligned_for(OwnerId(9), 40, 512).unwrap();
        assert_eq!(block.as_ptr() as usize % 512, 0);
        assert_eq!(unsafe { tracker.owner_of(block) }, OwnerId(9));
        assert_eq!(usage(&acc, 9), (40, 1));
        unsafe { tracker.free(block.as_ptr()) };
    }

    #[test]
    fn fail_policy_hands_the_error_back() {
        let acc = Acc::new();
        let tracker = Tracker::with_policy(Exhausted, &acc, OomPolicy::Fail);
        assert_eq!(tracker.allocate(10), Err(AllocError { size: 10 }));
        assert_eq!(tracker.allocate_zeroed(4, 4), Err(AllocError { size: 16 }));
        assert_eq!(
            tracker.allocate_for(OwnerId(1), usize::MAX),
            Err(AllocError { size: usize::MAX })
        );
        assert!(tracker.malloc(1).is_null());
        assert_eq!(acc.total_block_count(), 0);
    }

    #[test]
    fn failed_reallocate_books_the_original_block_back() {
        let acc = Acc::new();
        let tracker = Tracker::with_policy(NoRealloc, &acc, OomPolicy::Fail);
        let block = tracker.allocate_for(OwnerId(0xc), 128).unwrap();

        let result = unsafe { tracker.reallocate_for(OwnerId(0xd), block.as_ptr(), 4096) };
        assert_eq!(result, Err(AllocError { size: 4096 }));
        assert_eq!(usage(&acc, 0xc), (128, 1));
        assert_eq!(acc.total_used_bytes(), 128);
        assert_eq!(unsafe { tracker.owner_of(block) }, OwnerId(0xc));
        unsafe { tracker.free(block.as_ptr()) };
    }

    #[test]
    fn policy_can_be_switched_at_runtime() {
        let acc = Acc::new();
        let tracker = Tracker::new(Exhausted, &acc);
        assert_eq!(tracker.oom_policy(), OomPolicy::Abort);
        tracker.set_oom_policy(OomPolicy::Fail);
        assert!(tracker.allocate(1).is_err());
    }

    const ABORT_CHILD_ENV: &str = "OWNALLOC_ABORT_CHILD";

    /// Reruns itself in a child process, which hits the default policy and
    /// must die by `SIGABRT` after printing the failed size.
    #[cfg(unix)]
    #[test]
    fn default_policy_aborts_with_the_size() {
        use std::{env, os::unix::process::ExitStatusExt, process::Command};

        if env::var_os(ABORT_CHILD_ENV).is_some() {
            let acc = Acc::new();
            let tracker = Tracker::new(Exhausted, &acc);
            _ = tracker.allocate(1234);
            unreachable!("allocation failure did not abort");
        }

        let output = Command::new(env::current_exe().unwrap())
            .args([
                "alloc::interpose::tests::default_policy_aborts_with_the_size",
                "--exact",
                "--nocapture",
                "--test-threads=1",
            ])
            .env(ABORT_CHILD_ENV, "1")
            .output()
            .unwrap();

        assert_eq!(output.status.signal(), Some(libc::SIGABRT));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(
            stderr.contains("xmalloc: Out of memory trying to allocate 1234 bytes\n"),
            "{stderr}"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn libc_backend_books_the_usable_size() {
        use crate::alloc::Libc;

        let acc = Acc::new();
        let tracker = Tracker::new(Libc, &acc);
        let block = tracker.allocate_for(OwnerId(0xe), 1000).unwrap();
        let booked = unsafe { tracker.payload_size(block) };
        assert!(booked >= 1000);
        assert_eq!(usage(&acc, 0xe), (booked as isize, 1));
        unsafe { tracker.free(block.as_ptr()) };
        assert_eq!(usage(&acc, 0xe), (0, 0));
    }
}
