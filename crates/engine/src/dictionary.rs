//! The class/reference dictionary
//!
//! A bidirectional map between type strings (list types, for sharing one
//! list class among identically-typed fields) and references. Every binding
//! is stored twice in one ordered set at `(0,1,32)`:
//!
//! - tag `0x01`: `utf(type_string)` then the 16-byte reference, ordered by
//!   (type, ref), serving type-to-reference queries;
//! - tag `0x02`: the reference then `utf(type_string)`, ordered by
//!   (ref, type), serving reference-to-type queries.

use std::cmp::Ordering;

use basalt_core::{ByteFile, Error, Reference, Result};

use crate::file_io::{push_utf, take_utf};
use crate::ordered_set::OrderedSetFile;

const TAG_TYPE_TO_REF: u8 = 0x01;
const TAG_REF_TO_TYPE: u8 = 0x02;

fn dictionary_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let (Some(&ta), Some(&tb)) = (a.first(), b.first()) else {
        return a.cmp(b);
    };
    if ta != tb {
        return ta.cmp(&tb);
    }
    match ta {
        TAG_TYPE_TO_REF => match (take_utf(&a[1..]), take_utf(&b[1..])) {
            (Ok((sa, ua)), Ok((sb, ub))) => {
                sa.cmp(&sb).then_with(|| a[1 + ua..].cmp(&b[1 + ub..]))
            }
            _ => a.cmp(b),
        },
        // (ref, type): the reference sits at a fixed offset, and for one
        // reference the trailing bytes keep a stable order.
        _ => a[1..].cmp(&b[1..]),
    }
}

/// The dictionary over its byte-file.
pub struct ClassDictionary {
    set: OrderedSetFile,
}

impl ClassDictionary {
    /// Open the dictionary stored in `file`.
    pub fn new(file: Box<dyn ByteFile>) -> Self {
        ClassDictionary {
            set: OrderedSetFile::new(file, dictionary_cmp, false),
        }
    }

    fn forward_record(type_string: &str, reference: Reference) -> Result<Vec<u8>> {
        let mut rec = vec![TAG_TYPE_TO_REF];
        push_utf(&mut rec, type_string)?;
        rec.extend_from_slice(&reference.to_bytes());
        Ok(rec)
    }

    fn backward_record(type_string: &str, reference: Reference) -> Result<Vec<u8>> {
        let mut rec = vec![TAG_REF_TO_TYPE];
        rec.extend_from_slice(&reference.to_bytes());
        push_utf(&mut rec, type_string)?;
        Ok(rec)
    }

    /// Add the binding in both orientations. Returns `false` if the exact
    /// binding is already present.
    pub fn add(&mut self, type_string: &str, reference: Reference) -> Result<bool> {
        let forward = Self::forward_record(type_string, reference)?;
        if self.set.contains(&forward)? {
            return Ok(false);
        }
        self.set.insert(&forward)?;
        self.set.insert(&Self::backward_record(type_string, reference)?)?;
        Ok(true)
    }

    /// The reference bound to `type_string`, if any.
    pub fn get_ref(&mut self, type_string: &str) -> Result<Option<Reference>> {
        let mut probe = vec![TAG_TYPE_TO_REF];
        push_utf(&mut probe, type_string)?;
        let Some(rec) = self.set.tail_first(&probe)? else {
            return Ok(None);
        };
        if rec.first() != Some(&TAG_TYPE_TO_REF) {
            return Ok(None);
        }
        let (s, used) = take_utf(&rec[1..])?;
        if s != type_string {
            return Ok(None);
        }
        let ref_bytes = &rec[1 + used..];
        Reference::from_slice(ref_bytes)
            .map(Some)
            .ok_or_else(|| Error::Corruption("Truncated dictionary entry".into()))
    }

    /// The type string bound to `reference`, if any.
    pub fn get_type(&mut self, reference: Reference) -> Result<Option<String>> {
        let mut probe = vec![TAG_REF_TO_TYPE];
        probe.extend_from_slice(&reference.to_bytes());
        let Some(rec) = self.set.tail_first(&probe)? else {
            return Ok(None);
        };
        if !rec.starts_with(&probe) {
            return Ok(None);
        }
        let (s, _) = take_utf(&rec[probe.len()..])?;
        Ok(Some(s))
    }

    /// All `(type, reference)` bindings from the forward orientation.
    pub fn bindings(&mut self) -> Result<Vec<(String, Reference)>> {
        let mut out = Vec::new();
        for rec in self.set.iter_all()? {
            if rec.first() != Some(&TAG_TYPE_TO_REF) {
                continue;
            }
            let (s, used) = take_utf(&rec[1..])?;
            let r = Reference::from_slice(&rec[1 + used..])
                .ok_or_else(|| Error::Corruption("Truncated dictionary entry".into()))?;
            out.push((s, r));
        }
        Ok(out)
    }
}
