//! Allocation interposition: allocators that tag every block with its owner
//! and book it in an [`Accounting`](crate::stats::Accounting) table.

mod dlmalloc;
mod global_alloc;
mod interpose;
pub mod oom;
mod raw;
pub mod tag;

pub use self::dlmalloc::{DlHeap, DLMALLOC_MIN_ALIGN};
pub use interpose::Tracker;
pub use oom::{AllocError, OomPolicy};
#[cfg(target_os = "linux")]
pub use raw::Libc;
pub use raw::RawAlloc;
pub use tag::TAG_SIZE;

/// The allocator the process-wide tracker sits on
#[cfg(target_os = "linux")]
pub type DefaultBackend = Libc;
#[cfg(not(target_os = "linux"))]
pub type DefaultBackend = DlHeap;
