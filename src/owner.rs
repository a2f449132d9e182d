//! The owner currently "active" on each thread.
//!
//! Every allocation made through a [`Tracker`](crate::alloc::Tracker) is
//! attributed to whatever [`OwnerId`] the allocating thread has bound here.
//! The binding lives in a `const`-initialised `Cell`, so reading it never
//! allocates and never registers a TLS destructor. That matters, because the
//! tracker may be the global allocator, and the global allocator may not use
//! TLS with destructors.

use std::{cell::Cell, fmt};

use serde::{Deserialize, Serialize};

/// Opaque identifier of the logical entity a block is attributed to. The
/// value `0` is reserved, and means "no owner" (or an unclaimed slot).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct OwnerId(pub u32);

impl OwnerId {
    /// No owner
    pub const NONE: OwnerId = OwnerId(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for OwnerId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({:#x})", self.0)
    }
}

impl fmt::LowerHex for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

thread_local! {
    static CURRENT_OWNER: Cell<u32> = const { Cell::new(0) };
}

/// Associate `owner` with the calling thread, overwriting any previous
/// binding. If the thread is already tearing down its TLS, this is a no-op.
pub fn bind_owner(owner: OwnerId) {
    _ = CURRENT_OWNER.try_with(|cell| cell.set(owner.0));
}

/// The owner bound to the calling thread, or [`OwnerId::NONE`] if nothing
/// was ever bound (or TLS is already gone).
#[inline]
pub fn current_owner() -> OwnerId {
    OwnerId(CURRENT_OWNER.try_with(Cell::get).unwrap_or(0))
}

/// Binds an owner for as long as it is alive, restoring whatever was bound
/// before on drop. Scopes nest.
#[must_use = "the previous owner is restored as soon as the scope is dropped"]
pub struct OwnerScope {
    previous: OwnerId,
}

impl OwnerScope {
    pub fn enter(owner: OwnerId) -> Self {
        let previous = current_owner();
        bind_owner(owner);
        Self { previous }
    }

    /// The binding that will be restored
    pub fn previous(&self) -> OwnerId {
        self.previous
    }
}

impl Drop for OwnerScope {
    fn drop(&mut self) {
        bind_owner(self.previous);
    }
}

/// Shorthand for [`OwnerScope::enter()`]
pub fn scope(owner: OwnerId) -> OwnerScope {
    OwnerScope::enter(owner)
}

/// Run `f` with `owner` bound, restoring the previous binding afterwards
pub fn with_owner<R>(owner: OwnerId, f: impl FnOnce() -> R) -> R {
    let _scope = OwnerScope::enter(owner);
    f()
}
