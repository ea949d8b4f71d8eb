//! Ordered sets of variable-length records on a byte-file
//!
//! Several structures share this component: class buckets (ordered by the
//! 16-byte reference header), the class dictionary (ordered by tag and
//! composite key), the object log (ordered by the full entry bytes) and
//! property sets. A set is a sequence of `u32` big-endian length-prefixed
//! records kept sorted under a pluggable comparator.
//!
//! Mutations edit in place with [`ByteFile::shift`]; searches walk records
//! from the front. The walk is linear, which the in-memory substrate makes
//! cheap; the interface is position-based so a paged representation can
//! replace it behind the same operations.

use std::cmp::Ordering;

use byteorder::{BigEndian, ReadBytesExt};

use basalt_core::{ByteFile, Error, Result};

use crate::file_io::FileCursor;

/// Record comparator. Must define a total order; probe records may be
/// shorter than stored records (prefix probes).
pub type RecordCmp = fn(&[u8], &[u8]) -> Ordering;

/// Compare records as raw bytes.
pub fn bytewise_cmp(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// An ordered set of length-prefixed records over one byte-file.
pub struct OrderedSetFile {
    file: Box<dyn ByteFile>,
    cmp: RecordCmp,
    allow_duplicates: bool,
}

impl OrderedSetFile {
    /// Open a set over `file` with the given record order.
    pub fn new(file: Box<dyn ByteFile>, cmp: RecordCmp, allow_duplicates: bool) -> Self {
        OrderedSetFile {
            file,
            cmp,
            allow_duplicates,
        }
    }

    /// The underlying file.
    pub fn file_mut(&mut self) -> &mut dyn ByteFile {
        self.file.as_mut()
    }

    /// Remove every record.
    pub fn clear(&mut self) -> Result<()> {
        self.file.set_size(0)
    }

    /// Number of records in the set.
    pub fn count(&mut self) -> Result<u64> {
        let mut n = 0;
        let mut pos = 0;
        let size = self.file.size();
        while pos < size {
            let len = self.record_len_at(pos)?;
            pos += 4 + len as u64;
            n += 1;
        }
        Ok(n)
    }

    fn record_len_at(&mut self, pos: u64) -> Result<u32> {
        if pos + 4 > self.file.size() {
            return Err(Error::Corruption(
                "Truncated record length in ordered set".into(),
            ));
        }
        self.file.set_position(pos);
        let len = FileCursor(self.file.as_mut()).read_u32::<BigEndian>()?;
        if pos + 4 + len as u64 > self.file.size() {
            return Err(Error::Corruption("Truncated record in ordered set".into()));
        }
        Ok(len)
    }

    fn record_at(&mut self, pos: u64) -> Result<(Vec<u8>, u64)> {
        let len = self.record_len_at(pos)?;
        let mut buf = vec![0u8; len as usize];
        self.file.read_exact(&mut buf)?;
        Ok((buf, pos + 4 + len as u64))
    }

    /// All records in order.
    pub fn iter_all(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < self.file.size() {
            let (rec, next) = self.record_at(pos)?;
            out.push(rec);
            pos = next;
        }
        Ok(out)
    }

    /// All records not ordered before `probe` (the tail set).
    pub fn iter_tail(&mut self, probe: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < self.file.size() {
            let (rec, next) = self.record_at(pos)?;
            if (self.cmp)(&rec, probe) != Ordering::Less {
                out.push(rec);
            }
            pos = next;
        }
        Ok(out)
    }

    /// The first record not ordered before `probe`, if any.
    pub fn tail_first(&mut self, probe: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut pos = 0;
        while pos < self.file.size() {
            let (rec, next) = self.record_at(pos)?;
            if (self.cmp)(&rec, probe) != Ordering::Less {
                return Ok(Some(rec));
            }
            pos = next;
        }
        Ok(None)
    }

    /// The record comparing equal to `probe`, if any.
    pub fn get(&mut self, probe: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .tail_first(probe)?
            .filter(|rec| (self.cmp)(rec, probe) == Ordering::Equal))
    }

    /// Whether a record comparing equal to `probe` exists.
    pub fn contains(&mut self, probe: &[u8]) -> Result<bool> {
        Ok(self.get(probe)?.is_some())
    }

    /// Byte position of the first record not ordered before `probe`,
    /// together with that record if present.
    fn seek(&mut self, probe: &[u8]) -> Result<(u64, Option<Vec<u8>>)> {
        let mut pos = 0;
        while pos < self.file.size() {
            let (rec, next) = self.record_at(pos)?;
            match (self.cmp)(&rec, probe) {
                Ordering::Less => pos = next,
                _ => return Ok((pos, Some(rec))),
            }
        }
        Ok((pos, None))
    }

    /// Insert `rec` at its sorted position.
    ///
    /// Returns `false` without modifying the set if an equal record exists
    /// and the set disallows duplicates. With duplicates allowed, the new
    /// record is placed after existing equals.
    pub fn insert(&mut self, rec: &[u8]) -> Result<bool> {
        let mut pos = 0;
        while pos < self.file.size() {
            let (existing, next) = self.record_at(pos)?;
            match (self.cmp)(&existing, rec) {
                Ordering::Less => pos = next,
                Ordering::Equal => {
                    if !self.allow_duplicates {
                        return Ok(false);
                    }
                    pos = next;
                }
                Ordering::Greater => break,
            }
        }
        self.file.set_position(pos);
        self.file.shift(4 + rec.len() as i64)?;
        self.file.set_position(pos);
        self.file
            .write_all(&(rec.len() as u32).to_be_bytes())?;
        self.file.write_all(rec)?;
        Ok(true)
    }

    /// Replace the record comparing equal to `rec` with `rec`.
    ///
    /// Returns `false` if no equal record exists.
    pub fn replace(&mut self, rec: &[u8]) -> Result<bool> {
        let (pos, found) = self.seek(rec)?;
        let Some(existing) = found else {
            return Ok(false);
        };
        if (self.cmp)(&existing, rec) != Ordering::Equal {
            return Ok(false);
        }
        let old_end = pos + 4 + existing.len() as u64;
        let delta = rec.len() as i64 - existing.len() as i64;
        self.file.set_position(old_end);
        self.file.shift(delta)?;
        self.file.set_position(pos);
        self.file
            .write_all(&(rec.len() as u32).to_be_bytes())?;
        self.file.write_all(rec)?;
        Ok(true)
    }

    /// Remove the first record comparing equal to `probe`.
    ///
    /// Returns `false` if no equal record exists.
    pub fn remove(&mut self, probe: &[u8]) -> Result<bool> {
        let (pos, found) = self.seek(probe)?;
        let Some(existing) = found else {
            return Ok(false);
        };
        if (self.cmp)(&existing, probe) != Ordering::Equal {
            return Ok(false);
        }
        let end = pos + 4 + existing.len() as u64;
        self.file.set_position(end);
        self.file.shift(-((end - pos) as i64))?;
        Ok(true)
    }
}
