//! Snapshot addresses
//!
//! The substrate identifies every flushed snapshot (published or proposed)
//! by an opaque, totally ordered address. The database core never inspects
//! an address beyond equality, ordering, and the string form persisted in
//! the transaction base-root property.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Opaque identifier of one substrate snapshot.
///
/// Addresses are allocated monotonically by the substrate; ordering follows
/// allocation order within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotAddress(u64);

impl SnapshotAddress {
    /// Create an address from its raw value.
    pub const fn new(raw: u64) -> Self {
        SnapshotAddress(raw)
    }

    /// The raw value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root:{}", self.0)
    }
}

/// Error parsing the `root:<n>` string form of a [`SnapshotAddress`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid snapshot address string: {0:?}")]
pub struct SnapshotAddressParseError(pub String);

impl FromStr for SnapshotAddress {
    type Err = SnapshotAddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix("root:")
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| SnapshotAddressParseError(s.to_string()))?;
        Ok(SnapshotAddress(raw))
    }
}
