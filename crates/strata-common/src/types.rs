//! Identifier and timestamp types for StrataDB.

use serde::{Deserialize, Serialize};

/// Logical timestamp ordering transaction starts and commits.
///
/// Timestamps double as the per-tuple write lock: values with the high bit
/// set are transaction ids of in-flight (uncommitted) transactions, and any
/// such value found at the head of a version chain means the tuple is
/// write-locked by that transaction. Committed versions carry timestamps
/// with the high bit clear.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Canonical sentinel for an uncommitted in-flight transaction.
    pub const SENTINEL: Timestamp = Timestamp(u64::MAX);

    /// Creates a timestamp from a raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns true if this timestamp denotes a committed version.
    ///
    /// Transaction ids for in-flight transactions are drawn from the upper
    /// half of the timestamp space, so a sign test on the raw value decides.
    pub const fn is_committed(&self) -> bool {
        (self.0 as i64) >= 0
    }

    /// Returns true if `self` is strictly newer than `other` under the
    /// commit-timestamp ordering.
    ///
    /// Equal timestamps are not newer than each other; a transaction reading
    /// at its own write timestamp therefore sees its own writes.
    pub const fn newer_than(&self, other: Timestamp) -> bool {
        self.0 > other.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ts:{}", self.0)
    }
}

/// Version tag identifying the block layout a block was initialized with.
///
/// Stored in every block header so a future schema-evolution pass can tell
/// blocks of different vintages apart. The storage core only ever writes it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct LayoutVersion(pub u32);

impl std::fmt::Display for LayoutVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}
