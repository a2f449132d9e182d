//! The allocators a [`Tracker`](super::Tracker) can sit on top of.

/// A `malloc()`-shaped allocator: blocks are freed without a size, and the
/// allocator can tell how big a block really is.
///
/// # Safety
///
/// - `malloc()`, `calloc()` and `realloc()` must return null or a block
///   aligned to at least [`RawAlloc::MIN_ALIGN`]; `memalign()` must return
///   null or a block aligned to `align`.
/// - `usable_size()` must return at least the size that was requested for
///   the block, and every one of those bytes must be writable.
/// - `calloc()` must zero at least `count * size` bytes.
pub unsafe trait RawAlloc {
    /// The alignment every plain `malloc()` result is guaranteed to have
    const MIN_ALIGN: usize;

    fn malloc(&self, size: usize) -> *mut u8;

    /// Allocate `count * size` zeroed bytes, returning null on overflow
    fn calloc(&self, count: usize, size: usize) -> *mut u8;

    /// `align` must be a power of two
    fn memalign(&self, align: usize, size: usize) -> *mut u8;

    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator and `size` non-zero.
    /// On failure, `ptr` is left untouched.
    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8;

    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator
    unsafe fn free(&self, ptr: *mut u8);

    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator
    unsafe fn usable_size(&self, ptr: *mut u8) -> usize;
}

/// The C library's allocator. `malloc_usable_size()` regularly reports more
/// than was requested, since glibc rounds blocks up to its chunk sizes.
#[cfg(target_os = "linux")]
#[derive(Clone, Copy, Debug, Default)]
pub struct Libc;

#[cfg(target_os = "linux")]
impl Libc {
    pub const fn new() -> Self {
        Self
    }
}

// SAFETY: glibc and musl both align to `max_align_t`, and
// `malloc_usable_size()` is writable by contract.
#[cfg(target_os = "linux")]
unsafe impl RawAlloc for Libc {
    const MIN_ALIGN: usize = std::mem::align_of::<libc::max_align_t>();

    fn malloc(&self, size: usize) -> *mut u8 {
        // SAFETY: `malloc()` has no preconditions
        unsafe { libc::malloc(size) as *mut u8 }
    }

    fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        // SAFETY: `calloc()` checks `count * size` for overflow itself
        unsafe { libc::calloc(count, size) as *mut u8 }
    }

    fn memalign(&self, align: usize, size: usize) -> *mut u8 {
        let mut out = std::ptr::null_mut();
        // `posix_memalign()` wants a multiple of `sizeof(void *)`
        let align = align.max(std::mem::size_of::<usize>());
        // SAFETY: `align` is a power of two no smaller than a pointer
        match unsafe { libc::posix_memalign(&mut out, align, size) } {
            0 => out as *mut u8,
            _ => std::ptr::null_mut(),
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        libc::realloc(ptr as *mut libc::c_void, size) as *mut u8
    }

    unsafe fn free(&self, ptr: *mut u8) {
        libc::free(ptr as *mut libc::c_void)
    }

    unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        libc::malloc_usable_size(ptr as *mut libc::c_void)
    }
}
