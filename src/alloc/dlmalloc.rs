use std::{
    alloc::{GlobalAlloc, Layout},
    cmp, mem, ptr,
};

use ::dlmalloc::GlobalDlmalloc;

use super::raw::RawAlloc;

// https://gee.cs.oswego.edu/dl/html/malloc.html

/// Every block handed out is at least this aligned
pub const DLMALLOC_MIN_ALIGN: usize = 16;

/// Bytes directly before each block, holding `[size, align]`
const META_SIZE: usize = 2 * mem::size_of::<usize>();

/// A `malloc()`-style front for `dlmalloc`'s global heap.
///
/// `dlmalloc` wants the layout back on `free()`, so every block carries a
/// small header that remembers it. A nice side effect is that the usable
/// size of a block is *exactly* what was requested, which keeps accounting
/// on top of it free of allocator rounding.
///
/// ```plaintext
/// +--------------------+ <- base (aligned to `align`)
/// | padding...         |
/// | size, align        | META_SIZE bytes
/// +--------------------+ <- returned pointer (aligned to `align`)
/// | size bytes         |
/// +--------------------+
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct DlHeap;

impl DlHeap {
    pub const fn new() -> Self {
        Self
    }

    /// How far the returned pointer sits from the start of the raw block
    const fn header_len(align: usize) -> usize {
        if align > META_SIZE {
            align
        } else {
            META_SIZE
        }
    }

    fn raw_layout(size: usize, align: usize) -> Option<Layout> {
        let total = Self::header_len(align).checked_add(size)?;
        Layout::from_size_align(total, align).ok()
    }

    fn alloc_with(&self, size: usize, align: usize, zeroed: bool) -> *mut u8 {
        let align = cmp::max(align, DLMALLOC_MIN_ALIGN);
        let Some(layout) = Self::raw_layout(size, align) else {
            return ptr::null_mut();
        };
        // SAFETY: the layout always has a non-zero size (it includes the
        // header)
        let base = unsafe {
            if zeroed {
                GlobalDlmalloc.alloc_zeroed(layout)
            } else {
                GlobalDlmalloc.alloc(layout)
            }
        };
        if base.is_null() {
            return base;
        }
        // SAFETY: the block is `header_len + size` bytes long
        unsafe {
            let data = base.add(Self::header_len(align));
            Self::write_meta(data, size, align);
            data
        }
    }

    /// # Safety
    ///
    /// `data` must have at least `META_SIZE` writable, aligned bytes before it
    unsafe fn write_meta(data: *mut u8, size: usize, align: usize) {
        let meta = data.sub(META_SIZE).cast::<usize>();
        meta.write(size);
        meta.add(1).write(align);
    }

    /// # Safety
    ///
    /// `data` must be a live block from this allocator
    unsafe fn read_meta(data: *mut u8) -> (usize, usize) {
        let meta = data.sub(META_SIZE).cast::<usize>();
        (meta.read(), meta.add(1).read())
    }
}

// SAFETY: blocks are at least `DLMALLOC_MIN_ALIGN` aligned, and the usable
// size is exactly the requested size.
unsafe impl RawAlloc for DlHeap {
    const MIN_ALIGN: usize = DLMALLOC_MIN_ALIGN;

    fn malloc(&self, size: usize) -> *mut u8 {
        self.alloc_with(size, DLMALLOC_MIN_ALIGN, false)
    }

    fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        match count.checked_mul(size) {
            Some(size) => self.alloc_with(size, DLMALLOC_MIN_ALIGN, true),
            None => ptr::null_mut(),
        }
    }

    fn memalign(&self, align: usize, size: usize) -> *mut u8 {
        self.alloc_with(size, align, false)
    }

    unsafe fn realloc(&self, data: *mut u8, size: usize) -> *mut u8 {
        let (old_size, align) = Self::read_meta(data);
        let header_len = Self::header_len(align);
        let Some(new_layout) = Self::raw_layout(size, align) else {
            return ptr::null_mut();
        };
        let base = data.sub(header_len);
        let old_layout = Layout::from_size_align_unchecked(header_len + old_size, align);
        let new_base = GlobalDlmalloc.realloc(base, old_layout, new_layout.size());
        if new_base.is_null() {
            return new_base;
        }
        let new_data = new_base.add(header_len);
        Self::write_meta(new_data, size, align);
        new_data
    }

    unsafe fn free(&self, data: *mut u8) {
        let (size, align) = Self::read_meta(data);
        let header_len = Self::header_len(align);
        GlobalDlmalloc.dealloc(
            data.sub(header_len),
            Layout::from_size_align_unchecked(header_len + size, align),
        );
    }

    unsafe fn usable_size(&self, data: *mut u8) -> usize {
        Self::read_meta(data).0
    }
}
