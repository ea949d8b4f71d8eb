//! Reference to storage-key lookup
//!
//! Resources (class buckets, list files, data blobs) live in their own
//! byte-files; the lookup table at `(0,1,33)` maps each resource reference
//! to its storage key. Records are fixed 32 bytes (16-byte reference, then
//! the 16-byte key tuple), kept sorted by reference, so resolution is a
//! plain binary search.
//!
//! The companion counter at `(0,1,34)` holds the 128-bit key counter the
//! allocator advances by a small random stride; clashing strides from
//! concurrent transactions are resolved by the merge procedure, which can
//! re-key a resource and update the lookup table in place.

use std::cmp::Ordering;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;

use basalt_core::{ByteFile, Error, Reference, Result, StoreKey};

use crate::file_io::FileCursor;

/// Lookup record size: reference plus key tuple.
pub const LOOKUP_RECORD_LEN: u64 = (Reference::ENCODED_LEN + StoreKey::TUPLE_LEN) as u64;

/// The sorted reference-to-key table.
pub struct RefLookup {
    file: Box<dyn ByteFile>,
}

impl RefLookup {
    /// Open the table stored in `file`.
    pub fn new(file: Box<dyn ByteFile>) -> Self {
        RefLookup { file }
    }

    fn record_count(&self) -> u64 {
        self.file.size() / LOOKUP_RECORD_LEN
    }

    fn read_record(&mut self, idx: u64) -> Result<(Reference, StoreKey)> {
        self.file.set_position(idx * LOOKUP_RECORD_LEN);
        let mut buf = [0u8; LOOKUP_RECORD_LEN as usize];
        self.file.read_exact(&mut buf)?;
        let mut ref_bytes = [0u8; 16];
        let mut key_bytes = [0u8; 16];
        ref_bytes.copy_from_slice(&buf[..16]);
        key_bytes.copy_from_slice(&buf[16..]);
        Ok((
            Reference::from_bytes(&ref_bytes),
            StoreKey::from_tuple_bytes(&key_bytes),
        ))
    }

    /// Binary search for `reference`. `Ok(idx)` if present, `Err(idx)` with
    /// the insertion point otherwise.
    fn search(&mut self, reference: Reference) -> Result<std::result::Result<u64, u64>> {
        let mut lo = 0;
        let mut hi = self.record_count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (r, _) = self.read_record(mid)?;
            match r.cmp(&reference) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(lo))
    }

    /// The storage key bound to `reference`, if any.
    pub fn get(&mut self, reference: Reference) -> Result<Option<StoreKey>> {
        match self.search(reference)? {
            Ok(idx) => Ok(Some(self.read_record(idx)?.1)),
            Err(_) => Ok(None),
        }
    }

    /// Bind `reference` to `key`, replacing any existing binding. (The merge
    /// procedure rebinds a reference when its key is remapped.)
    pub fn insert(&mut self, reference: Reference, key: StoreKey) -> Result<()> {
        let idx = match self.search(reference)? {
            Ok(idx) => idx,
            Err(ins) => {
                self.file.set_position(ins * LOOKUP_RECORD_LEN);
                self.file.shift(LOOKUP_RECORD_LEN as i64)?;
                ins
            }
        };
        self.file.set_position(idx * LOOKUP_RECORD_LEN);
        self.file.write_all(&reference.to_bytes())?;
        self.file.write_all(&key.to_tuple_bytes())?;
        Ok(())
    }

    /// Remove the binding for `reference`. Returns whether one existed.
    pub fn remove(&mut self, reference: Reference) -> Result<bool> {
        match self.search(reference)? {
            Ok(idx) => {
                self.file
                    .set_position((idx + 1) * LOOKUP_RECORD_LEN);
                self.file.shift(-(LOOKUP_RECORD_LEN as i64))?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Resolve `reference` or fail with the internal lookup-miss error.
    pub fn resolve(&mut self, reference: Reference) -> Result<StoreKey> {
        self.get(reference)?
            .ok_or(Error::UnresolvedReference(reference))
    }
}

/// The 128-bit key counter at `(0,1,34)`.
pub struct KeyCounter {
    file: Box<dyn ByteFile>,
}

impl KeyCounter {
    /// Open the counter stored in `file`.
    pub fn new(file: Box<dyn ByteFile>) -> Self {
        KeyCounter { file }
    }

    /// Current counter value `(high, low)`; a missing file reads as zero.
    pub fn read(&mut self) -> Result<(i64, i64)> {
        if self.file.size() == 0 {
            return Ok((0, 0));
        }
        self.file.set_position(0);
        let mut cur = FileCursor(self.file.as_mut());
        let high = cur.read_i64::<BigEndian>()?;
        let low = cur.read_i64::<BigEndian>()?;
        Ok((high, low))
    }

    fn write(&mut self, high: i64, low: i64) -> Result<()> {
        self.file.set_position(0);
        let mut cur = FileCursor(self.file.as_mut());
        cur.write_i64::<BigEndian>(high)?;
        cur.write_i64::<BigEndian>(low)?;
        Ok(())
    }

    /// Advance the counter by `stride` and return the resource key derived
    /// from the new value. `low` carries the count; `high` increments when
    /// `low` wraps.
    pub fn allocate(&mut self, stride: i64) -> Result<StoreKey> {
        let (high, low) = self.read()?;
        let (high, low) = match low.checked_add(stride) {
            Some(next) => (high, next),
            None => (high + 1, stride),
        };
        self.write(high, low)?;
        Ok(StoreKey::resource(high, low))
    }

    /// Ensure the counter is at least the value `key` was derived from, so
    /// later allocations stride past it.
    pub fn advance_past(&mut self, key: StoreKey) -> Result<()> {
        let Some(target) = key.counter_value() else {
            return Err(Error::InvalidState(format!(
                "Key {key} is not in the allocated resource space"
            )));
        };
        let current = self.read()?;
        if StoreKey::compare_counter(current, target) == Ordering::Less {
            self.write(target.0, target.1)?;
        }
        Ok(())
    }
}

/// A random allocation stride in `1..=max_stride`.
pub fn random_stride(max_stride: i64) -> i64 {
    rand::thread_rng().gen_range(1..=max_stride.max(1))
}
