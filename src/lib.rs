//! Attribute heap usage to logical owners without touching call sites.
//!
//! A thread binds the owner it is working for ([`owner::bind_owner()`]),
//! and every block allocated through a [`Tracker`](alloc::Tracker) from then
//! on is tagged with that owner and booked in a lock-free
//! [`Accounting`](stats::Accounting) table. Frees book against whoever the
//! block was tagged with, no matter which thread frees it.
//!
//! ```
//! use ownalloc::{alloc::{DlHeap, Tracker}, owner::{self, OwnerId}, stats::Accounting};
//!
//! let accounting = Accounting::<1024>::new();
//! let tracker = Tracker::new(DlHeap, &accounting);
//!
//! owner::bind_owner(OwnerId(1));
//! let block = tracker.allocate(1024).unwrap();
//! assert_eq!(accounting.slot_usage(OwnerId(1)).unwrap().allocated_bytes, 1024);
//! unsafe { tracker.free(block.as_ptr()) };
//! assert_eq!(accounting.total_used_bytes(), 0);
//! ```

pub mod alloc;
pub mod config;
pub mod externc;
pub mod global;
pub mod owner;
pub mod report;
pub mod stats;
pub mod util;

pub use owner::{bind_owner, current_owner, OwnerId};
