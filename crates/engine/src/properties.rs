//! Property sets
//!
//! Small string-keyed metadata records: the path magic record at `(0,0,0)`
//! and the transaction properties at `(0,1,12)` (which carry the base-root
//! property). A property set is an ordered set of length-prefixed
//! `key=value` UTF-8 records.

use std::cmp::Ordering;

use basalt_core::{ByteFile, Result};

use crate::file_io::take_utf;
use crate::ordered_set::OrderedSetFile;

fn property_cmp(a: &[u8], b: &[u8]) -> Ordering {
    match (take_utf(a), take_utf(b)) {
        (Ok((sa, _)), Ok((sb, _))) => sa.cmp(&sb),
        // Malformed records keep a total order by falling back to raw bytes.
        _ => a.cmp(b),
    }
}

/// A `key=value` property set over one byte-file.
pub struct PropertySet {
    set: OrderedSetFile,
}

impl PropertySet {
    /// Open the property set stored in `file`.
    pub fn new(file: Box<dyn ByteFile>) -> Self {
        PropertySet {
            set: OrderedSetFile::new(file, property_cmp, false),
        }
    }

    /// The value bound to `key`, if any.
    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        let prefix = format!("{key}=");
        for rec in self.set.iter_all()? {
            let (line, _) = take_utf(&rec)?;
            if let Some(value) = line.strip_prefix(&prefix) {
                return Ok(Some(value.to_string()));
            }
        }
        Ok(None)
    }

    /// Bind `key` to `value`, replacing any existing binding.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.remove(key)?;
        let mut rec = Vec::new();
        crate::file_io::push_utf(&mut rec, &format!("{key}={value}"))?;
        self.set.insert(&rec)?;
        Ok(())
    }

    /// Remove the binding for `key`. Returns whether one existed.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let prefix = format!("{key}=");
        for rec in self.set.iter_all()? {
            let (line, _) = take_utf(&rec)?;
            if line.starts_with(&prefix) {
                return self.set.remove(&rec);
            }
        }
        Ok(false)
    }
}
