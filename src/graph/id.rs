//! Stream-scoped identifiers.
//!
//! Both identifier kinds are dense, zero-based, and assigned in discovery
//! order, which is what lets the reader predict the id of a
//! first-encountered object without any side table.

use std::fmt;

/// Wire sentinel for a null reference: the varint encoding of `-1`.
pub const NULL_REF: u64 = u64::MAX;

/// Identity of one shared object within a stream.
///
/// Ids index directly into the reference table; id `n` is always the
/// `n`-th distinct object discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) u64);

impl ObjectId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw zero-based index.
    pub fn raw(self) -> u64 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of one stamped type within a stream.
///
/// Assigned densely in order of first appearance; the full stamp is only
/// emitted alongside the first occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw zero-based index.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}
