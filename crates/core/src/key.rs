//! Storage keys
//!
//! The substrate stores byte-files under composite keys
//! `(kind: i16, secondary: i32, primary: i64)`. A fixed set of keys is
//! reserved for the database's own structures (magic record, object log,
//! dictionary, lookup table, system buckets and lists); everything else is
//! allocated from the 128-bit key counter as `(0, 10 + high, low)`.

use std::cmp::Ordering;
use std::fmt;

/// Composite key addressing one byte-file in the substrate.
///
/// Keys order by `(kind, secondary, primary)`. The 16-byte tuple encoding
/// used inside object-log entries preserves that order only within the
/// non-negative key space the database allocates from, which is all the
/// comparator ever sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey {
    /// Key class; 0 for all database-managed files.
    pub kind: i16,
    /// Secondary dimension.
    pub secondary: i32,
    /// Primary dimension.
    pub primary: i64,
}

/// Path magic record: a property set identifying the path as an object
/// database and carrying the format version.
pub const MAGIC_KEY: StoreKey = StoreKey::new(0, 0, 0);

/// The transaction's object log.
pub const OBJECT_LOG_KEY: StoreKey = StoreKey::new(0, 1, 11);

/// The transaction's property set (holds the base-root property).
pub const TRANSACTION_PROPERTIES_KEY: StoreKey = StoreKey::new(0, 1, 12);

/// The class/reference dictionary.
pub const DICTIONARY_KEY: StoreKey = StoreKey::new(0, 1, 32);

/// The reference to storage-key lookup table.
pub const REF_LOOKUP_KEY: StoreKey = StoreKey::new(0, 1, 33);

/// The reference key counter (`high: i64, low: i64`).
pub const KEY_COUNTER_KEY: StoreKey = StoreKey::new(0, 1, 34);

/// The system class bucket (serialized `$Class` instances).
pub const SYSTEM_CLASS_BUCKET_KEY: StoreKey = StoreKey::new(0, 1, 36);

/// The system class list, ordered by class name.
pub const SYSTEM_CLASS_LIST_KEY: StoreKey = StoreKey::new(0, 1, 37);

/// The system namer bucket (serialized `$Namer` instances).
pub const SYSTEM_NAMER_BUCKET_KEY: StoreKey = StoreKey::new(0, 1, 38);

/// The system namer list (named items), ordered by item name.
pub const SYSTEM_NAMER_LIST_KEY: StoreKey = StoreKey::new(0, 1, 39);

/// Secondary-dimension offset for allocated resource keys.
pub const RESOURCE_SECONDARY_BASE: i32 = 10;

impl StoreKey {
    /// Size of the 16-byte tuple encoding.
    pub const TUPLE_LEN: usize = 16;

    /// Create a key from its three components.
    pub const fn new(kind: i16, secondary: i32, primary: i64) -> Self {
        StoreKey {
            kind,
            secondary,
            primary,
        }
    }

    /// The resource key derived from a key-counter value `(high, low)`.
    pub const fn resource(high: i64, low: i64) -> Self {
        StoreKey {
            kind: 0,
            secondary: RESOURCE_SECONDARY_BASE + high as i32,
            primary: low,
        }
    }

    /// The counter value `(high, low)` this resource key was derived from,
    /// or `None` for reserved keys.
    pub fn counter_value(&self) -> Option<(i64, i64)> {
        if self.kind != 0 || self.secondary < RESOURCE_SECONDARY_BASE {
            return None;
        }
        Some(((self.secondary - RESOURCE_SECONDARY_BASE) as i64, self.primary))
    }

    /// Encode as a 16-byte tuple: `kind | secondary | primary | 2 pad bytes`,
    /// all big-endian.
    pub fn to_tuple_bytes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..2].copy_from_slice(&self.kind.to_be_bytes());
        buf[2..6].copy_from_slice(&self.secondary.to_be_bytes());
        buf[6..14].copy_from_slice(&self.primary.to_be_bytes());
        buf
    }

    /// Decode from the 16-byte tuple encoding.
    pub fn from_tuple_bytes(buf: &[u8; 16]) -> Self {
        let mut kind = [0u8; 2];
        let mut secondary = [0u8; 4];
        let mut primary = [0u8; 8];
        kind.copy_from_slice(&buf[..2]);
        secondary.copy_from_slice(&buf[2..6]);
        primary.copy_from_slice(&buf[6..14]);
        StoreKey {
            kind: i16::from_be_bytes(kind),
            secondary: i32::from_be_bytes(secondary),
            primary: i64::from_be_bytes(primary),
        }
    }

    /// Compare counter values as `(high, low)` pairs.
    pub fn compare_counter(a: (i64, i64), b: (i64, i64)) -> Ordering {
        a.0.cmp(&b.0).then(a.1.cmp(&b.1))
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.kind, self.secondary, self.primary)
    }
}
