//! 128-bit references
//!
//! Every persisted entity (object, class, list, data blob) is addressed by a
//! `Reference`: an opaque 128-bit identifier made of two unsigned 64-bit
//! halves. References are totally ordered lexicographically by
//! `(high, low)`, which is what keeps bucket records and reference lists
//! sorted without any further bookkeeping.
//!
//! ## Uniqueness
//!
//! Freshly generated references combine the current epoch time in
//! milliseconds with a value from the process PRNG. Uniqueness is therefore
//! probabilistic, not guaranteed; a clash between two concurrently committed
//! transactions is detected and resolved at merge time rather than at
//! allocation time.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use thiserror::Error;

/// Opaque 128-bit identifier for a persisted entity.
///
/// Ordered lexicographically by `(high, low)` as unsigned integers. The
/// string form is 32 lowercase hex digits: `hex(high) || hex(low)`, each
/// half zero-padded to 16 digits.
///
/// # Examples
///
/// ```
/// use basalt_core::Reference;
///
/// let r = Reference::new(0, 5);
/// assert_eq!(r.to_string(), "00000000000000000000000000000005");
/// assert_eq!("00000000000000000000000000000005".parse::<Reference>().unwrap(), r);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    high: u64,
    low: u64,
}

impl Reference {
    /// Size of the encoded form in bytes.
    pub const ENCODED_LEN: usize = 16;

    /// Create a reference from its two halves.
    pub const fn new(high: u64, low: u64) -> Self {
        Reference { high, low }
    }

    /// The high 64 bits.
    pub const fn high(&self) -> u64 {
        self.high
    }

    /// The low 64 bits.
    pub const fn low(&self) -> u64 {
        self.low
    }

    /// Generate a fresh reference from the clock and the process PRNG.
    ///
    /// The high half carries the epoch time in milliseconds, the low half is
    /// fully random. Two references generated in the same millisecond
    /// therefore clash with probability 2^-64; commit-time merge detects the
    /// residual risk.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let low: u64 = rand::thread_rng().gen();
        Reference { high: millis, low }
    }

    /// Encode as 16 big-endian bytes, `high` first.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.high.to_be_bytes());
        buf[8..].copy_from_slice(&self.low.to_be_bytes());
        buf
    }

    /// Decode from 16 big-endian bytes.
    pub fn from_bytes(buf: &[u8; 16]) -> Self {
        let mut high = [0u8; 8];
        let mut low = [0u8; 8];
        high.copy_from_slice(&buf[..8]);
        low.copy_from_slice(&buf[8..]);
        Reference {
            high: u64::from_be_bytes(high),
            low: u64::from_be_bytes(low),
        }
    }

    /// Decode from the first 16 bytes of a slice.
    ///
    /// Returns `None` if the slice is shorter than 16 bytes.
    pub fn from_slice(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::ENCODED_LEN {
            return None;
        }
        let mut fixed = [0u8; 16];
        fixed.copy_from_slice(&buf[..16]);
        Some(Self::from_bytes(&fixed))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.high, self.low)
    }
}

/// Error parsing the 32-hex-digit string form of a [`Reference`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReferenceParseError {
    /// The string is not exactly 32 characters long.
    #[error("Reference string must be 32 hex digits, got {0} characters")]
    InvalidLength(usize),

    /// The string contains a non-hex character.
    #[error("Reference string contains invalid hex")]
    InvalidHex,
}

impl FromStr for Reference {
    type Err = ReferenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(ReferenceParseError::InvalidLength(s.len()));
        }
        let high =
            u64::from_str_radix(&s[..16], 16).map_err(|_| ReferenceParseError::InvalidHex)?;
        let low =
            u64::from_str_radix(&s[16..], 16).map_err(|_| ReferenceParseError::InvalidHex)?;
        Ok(Reference { high, low })
    }
}
