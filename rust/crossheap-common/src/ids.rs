//! Identifiers stamped onto allocations.
//!
//! Both identifiers are minted from process-wide atomic sequences and are never
//! zero, so a zeroed `#[repr(C)]` handle is always recognizable as the null
//! sentinel.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Identity of the allocator context (module) that created a resource.
///
/// A resource's tag is fixed at creation; every release must present a
/// matching tag.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OriginTag(NonZeroU64);

impl OriginTag {
    /// Mints a tag that no other allocator context in this process holds.
    pub fn next() -> OriginTag {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        OriginTag(mint(&NEXT))
    }

    /// Reconstructs a tag from its raw value, as received across a boundary.
    pub fn from_raw(raw: u64) -> Option<OriginTag> {
        NonZeroU64::new(raw).map(OriginTag)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for OriginTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "origin#{}", self.0)
    }
}

impl fmt::Display for OriginTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Process-unique identity of a single allocation.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceId(NonZeroU64);

impl ResourceId {
    pub fn next() -> ResourceId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ResourceId(mint(&NEXT))
    }

    pub fn from_raw(raw: u64) -> Option<ResourceId> {
        NonZeroU64::new(raw).map(ResourceId)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res#{}", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn mint(seq: &AtomicU64) -> NonZeroU64 {
    let value = seq.fetch_add(1, Ordering::Relaxed);
    // Sequences start at 1 and cannot wrap in practice.
    NonZeroU64::new(value).expect("identifier sequence exhausted")
}
