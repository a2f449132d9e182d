//! What happens when the underlying allocator says no.
//!
//! By default, nothing good: the requested size is written to stderr and the
//! process aborts. Hosts that cannot afford to die can switch to
//! [`OomPolicy::Fail`], in which case the failure is handed back to the
//! caller as an [`AllocError`] (or a null pointer, at the C and
//! `GlobalAlloc` boundaries).

use std::{
    fmt,
    process,
    str::FromStr,
    sync::atomic::{AtomicU8, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::util::print::{putstr_err, write_usize, MAX_NR_CHARS_USIZE};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum OomPolicy {
    /// Log the requested size and abort the process
    #[default]
    Abort = 0,
    /// Report the failure to the caller and carry on
    Fail = 1,
}

impl OomPolicy {
    const fn from_u8(n: u8) -> Self {
        match n {
            1 => Self::Fail,
            _ => Self::Abort,
        }
    }
}

impl FromStr for OomPolicy {
    type Err = ParseOomPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "fail" => Ok(Self::Fail),
            _ => Err(ParseOomPolicyError(s.to_owned())),
        }
    }
}

impl fmt::Display for OomPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Abort => "abort",
            Self::Fail => "fail",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseOomPolicyError(String);

impl fmt::Display for ParseOomPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown OOM policy {:?}, expected `abort` or `fail`", self.0)
    }
}

impl std::error::Error for ParseOomPolicyError {}

/// An [`OomPolicy`] that can be swapped while allocations are in flight
pub(crate) struct AtomicOomPolicy(AtomicU8);

impl AtomicOomPolicy {
    pub const fn new(policy: OomPolicy) -> Self {
        Self(AtomicU8::new(policy as u8))
    }

    #[inline]
    pub fn load(&self) -> OomPolicy {
        OomPolicy::from_u8(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, policy: OomPolicy) {
        self.0.store(policy as u8, Ordering::Relaxed)
    }
}

/// The underlying allocator could not satisfy a request of `size` bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocError {
    pub size: usize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "out of memory trying to allocate {} bytes", self.size)
    }
}

impl std::error::Error for AllocError {}

/// Report an allocation of `size` bytes failing and abort. Uses nothing
/// that could allocate.
#[cold]
pub fn out_of_memory(size: usize) -> ! {
    let mut buf = [0; MAX_NR_CHARS_USIZE];
    putstr_err(b"xmalloc: Out of memory trying to allocate ");
    putstr_err(write_usize(&mut buf, size));
    putstr_err(b" bytes\n");
    process::abort()
}

/// Apply `policy` to a failed request of `size` bytes
#[cold]
pub(crate) fn handle(policy: OomPolicy, size: usize) -> AllocError {
    match policy {
        OomPolicy::Abort => out_of_memory(size),
        OomPolicy::Fail => AllocError { size },
    }
}
