//! The C face of the process-wide tracker. Allocation failure under the
//! `fail` policy shows up as a null pointer here.

use std::{
    ffi::c_int,
    io::{self, Write},
    ptr::{self, NonNull},
};

use libc::{c_void, size_t, ssize_t};

use crate::{
    config::Config,
    global::{self, TRACKER},
    owner::{self, OwnerId},
};

/// Visitor for [`ownalloc_for_each_owner()`]
pub type OwnerVisitor =
    unsafe extern "C" fn(owner: u32, bytes: ssize_t, blocks: ssize_t, ctx: *mut c_void);

/// Initialize from the environment. Returns `0` on success, `-1` if the
/// environment holds a bad value and `1` if already initialized.
#[no_mangle]
pub extern "C" fn ownalloc_init() -> c_int {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return -1;
        }
    };
    match global::init(config) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

#[no_mangle]
pub extern "C" fn ownalloc_bind_owner(owner: u32) {
    owner::bind_owner(OwnerId(owner))
}

#[no_mangle]
pub extern "C" fn ownalloc_current_owner() -> u32 {
    owner::current_owner().0
}

#[no_mangle]
pub extern "C" fn ownalloc_malloc(size: size_t) -> *mut c_void {
    TRACKER.malloc(size) as _
}

/// # Safety
///
/// `ptr` must be null or come from one of the `ownalloc_*` allocators
#[no_mangle]
pub unsafe extern "C" fn ownalloc_free(ptr: *mut c_void) {
    TRACKER.free(ptr as _)
}

/// # Safety
///
/// `ptr` must be null or come from one of the `ownalloc_*` allocators
#[no_mangle]
pub unsafe extern "C" fn ownalloc_realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    TRACKER
        .reallocate(ptr as _, size)
        .map_or(ptr::null_mut(), |p| p.as_ptr() as _)
}

#[no_mangle]
pub extern "C" fn ownalloc_calloc(count: size_t, size: size_t) -> *mut c_void {
    TRACKER
        .allocate_zeroed(count, size)
        .map_or(ptr::null_mut(), |p: NonNull<u8>| p.as_ptr() as _)
}

#[no_mangle]
pub extern "C" fn ownalloc_used_memory() -> size_t {
    global::total_used_bytes()
}

#[no_mangle]
pub extern "C" fn ownalloc_memory_block() -> size_t {
    global::total_block_count()
}

/// Call `visitor` for every owner with a non-zero balance
///
/// # Safety
///
/// `visitor` must be safe to call with `ctx`
#[no_mangle]
pub unsafe extern "C" fn ownalloc_for_each_owner(visitor: OwnerVisitor, ctx: *mut c_void) {
    global::for_each_owner_slot(|owner, bytes, blocks| {
        visitor(owner.0, bytes as ssize_t, blocks as ssize_t, ctx)
    })
}

/// Print the report to stdout
#[no_mangle]
pub extern "C" fn ownalloc_dump() {
    let report = global::report();
    let mut stdout = io::stdout().lock();
    _ = writeln!(stdout, "dump all owner mem:");
    _ = write!(stdout, "{report}");
    _ = stdout.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn count_owner(owner: u32, bytes: ssize_t, blocks: ssize_t, ctx: *mut c_void) {
        if owner == 0xc0de {
            let seen = &mut *(ctx as *mut (ssize_t, ssize_t));
            *seen = (bytes, blocks);
        }
    }

    #[test]
    fn c_surface_tracks_blocks() {
        ownalloc_bind_owner(0xc0de);
        assert_eq!(ownalloc_current_owner(), 0xc0de);

        let a = ownalloc_malloc(100);
        let b = ownalloc_calloc(10, 10);
        assert!(!a.is_null() && !b.is_null());
        let a = unsafe { ownalloc_realloc(a, 1000) };

        let mut seen: (ssize_t, ssize_t) = (0, 0);
        unsafe { ownalloc_for_each_owner(count_owner, &mut seen as *mut _ as *mut c_void) };
        assert!(seen.0 >= 1100);
        assert_eq!(seen.1, 2);
        assert!(ownalloc_used_memory() >= 1100);
        assert!(ownalloc_memory_block() >= 2);

        unsafe {
            ownalloc_free(a);
            ownalloc_free(b);
            ownalloc_free(ptr::null_mut());
        }
        let usage = global::accounting().slot_usage(OwnerId(0xc0de)).unwrap();
        assert_eq!((usage.allocated_bytes, usage.block_count), (0, 0));
        ownalloc_bind_owner(0);
    }
}
