//! The process-wide tracker.
//!
//! [`TRACKER`] and its table are plain `static`s, zeroed before `main()`
//! runs, so they work as a `#[global_allocator]` from the very first
//! allocation:
//!
//! ```no_run
//! #[global_allocator]
//! static GLOBAL: ownalloc::global::OwnerAlloc = ownalloc::global::OwnerAlloc;
//! ```
//!
//! [`init()`] applies a [`Config`] and must run once, before the
//! instrumented work starts.

use std::{
    alloc::{GlobalAlloc, Layout},
    fmt,
    ptr::NonNull,
};

use log::info;
use once_cell::sync::OnceCell;

use crate::{
    alloc::{AllocError, DefaultBackend, Tracker},
    config::Config,
    owner::OwnerId,
    report::Report,
    stats::{Accounting, DEFAULT_CAPACITY},
};

pub type GlobalTracker = Tracker<'static, DefaultBackend, DEFAULT_CAPACITY>;

static ACCOUNTING: Accounting = Accounting::new();

pub static TRACKER: GlobalTracker = Tracker::new(DefaultBackend::new(), &ACCOUNTING);

static CONFIG: OnceCell<Config> = OnceCell::new();

/// [`TRACKER`] as a `#[global_allocator]`: every Rust allocation in the
/// process gets attributed to the owner bound on the allocating thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct OwnerAlloc;

// SAFETY: forwards to `TRACKER` verbatim
unsafe impl GlobalAlloc for OwnerAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        TRACKER.alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        TRACKER.alloc_zeroed(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        TRACKER.dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        TRACKER.realloc(ptr, layout, new_size)
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    AlreadyInitialized,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => f.write_str("ownalloc is already initialized"),
        }
    }
}

impl std::error::Error for InitError {}

/// One-time setup of the process-wide tracker. A second call changes
/// nothing and returns [`InitError::AlreadyInitialized`].
pub fn init(config: Config) -> Result<(), InitError> {
    let mut fresh = false;
    let config = CONFIG.get_or_init(|| {
        fresh = true;
        config
    });
    if !fresh {
        return Err(InitError::AlreadyInitialized);
    }
    TRACKER.set_oom_policy(config.oom_policy);
    info!(
        "ownalloc initialized: {} owner slots, oom policy {}",
        DEFAULT_CAPACITY, config.oom_policy
    );
    Ok(())
}

/// The config passed to [`init()`], if it ran
pub fn config() -> Option<&'static Config> {
    CONFIG.get()
}

pub fn accounting() -> &'static Accounting {
    &ACCOUNTING
}

pub fn allocate(size: usize) -> Result<NonNull<u8>, AllocError> {
    TRACKER.allocate(size)
}

/// # Safety
///
/// `ptr` must be null or a live block from this module
pub unsafe fn free(ptr: *mut u8) {
    TRACKER.free(ptr)
}

/// # Safety
///
/// `ptr` must be null or a live block from this module
pub unsafe fn reallocate(ptr: *mut u8, size: usize) -> Result<NonNull<u8>, AllocError> {
    TRACKER.reallocate(ptr, size)
}

pub fn allocate_zeroed(count: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
    TRACKER.allocate_zeroed(count, size)
}

pub fn total_used_bytes() -> usize {
    ACCOUNTING.total_used_bytes()
}

pub fn total_block_count() -> usize {
    ACCOUNTING.total_block_count()
}

pub fn for_each_owner_slot<F>(visitor: F)
where
    F: FnMut(OwnerId, isize, isize),
{
    ACCOUNTING.for_each_owner_slot(visitor)
}

pub fn report() -> Report {
    Report::capture(&ACCOUNTING)
}
