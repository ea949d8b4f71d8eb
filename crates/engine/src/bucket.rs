//! Per-class object buckets
//!
//! Each class stores its serialized instances in one bucket: an ordered set
//! of object records keyed by the 16-byte reference header. Lookups take
//! the tail set from the reference probe and accept the first record only
//! if its header matches exactly.

use std::cmp::Ordering;

use basalt_core::{ByteFile, Error, Reference, Result};

use crate::ordered_set::OrderedSetFile;

fn reference_prefix_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let pa = &a[..a.len().min(16)];
    let pb = &b[..b.len().min(16)];
    pa.cmp(pb)
}

/// One class's bucket of serialized objects.
pub struct ObjectBucket {
    set: OrderedSetFile,
}

impl ObjectBucket {
    /// Open the bucket stored in `file`.
    pub fn new(file: Box<dyn ByteFile>) -> Self {
        ObjectBucket {
            set: OrderedSetFile::new(file, reference_prefix_cmp, false),
        }
    }

    /// Insert a serialized object. Fails if a record with the same reference
    /// header already exists; a fresh reference landing on an existing one
    /// means the uniqueness assumption broke.
    pub fn insert(&mut self, record: &[u8]) -> Result<()> {
        if self.set.insert(record)? {
            Ok(())
        } else {
            let reference = Reference::from_slice(record)
                .ok_or_else(|| Error::Corruption("Object record shorter than header".into()))?;
            Err(Error::Corruption(format!(
                "Reference clash inserting {reference} into bucket"
            )))
        }
    }

    /// The serialized object at `reference`, if present.
    pub fn get(&mut self, reference: Reference) -> Result<Option<Vec<u8>>> {
        self.set.get(&reference.to_bytes())
    }

    /// Replace the record with the same reference header in place.
    pub fn replace(&mut self, record: &[u8]) -> Result<()> {
        if self.set.replace(record)? {
            Ok(())
        } else {
            let reference = Reference::from_slice(record)
                .ok_or_else(|| Error::Corruption("Object record shorter than header".into()))?;
            Err(Error::NoSuchReference(reference))
        }
    }

    /// Replace the record if present, insert it otherwise. Used by merge
    /// replay, which carries exact records across snapshots.
    pub fn replace_or_insert(&mut self, record: &[u8]) -> Result<()> {
        if self.set.replace(record)? {
            return Ok(());
        }
        self.insert(record)
    }

    /// Whether an object with this reference is present.
    pub fn contains(&mut self, reference: Reference) -> Result<bool> {
        self.set.contains(&reference.to_bytes())
    }

    /// Number of objects in the bucket.
    pub fn count(&mut self) -> Result<u64> {
        self.set.count()
    }

    /// All serialized records in reference order.
    pub fn records(&mut self) -> Result<Vec<Vec<u8>>> {
        self.set.iter_all()
    }
}
