//! Ordered reference lists
//!
//! A list is a contiguous byte-file of 16-byte reference entries kept
//! sorted by the list's order spec: by raw reference value, or by a string
//! key field of the referenced objects (with the reference value as a
//! tie-break when duplicates are allowed, so exact-position searches stay
//! `O(log n)`).
//!
//! Comparators never dereference objects themselves; they go through an
//! [`ElementKeyReader`], which the transaction layer (and the merge
//! engine's replay) implement over their own snapshot. Caller-supplied
//! string probes are expressed with [`SearchKey::Key`] rather than a null
//! reference sentinel.

use std::cmp::Ordering;

use basalt_core::{ByteFile, Error, Reference, Result};

use crate::classes::{ListTypeSpec, OdbClass};

/// Size of one list entry.
pub const LIST_ENTRY_LEN: u64 = Reference::ENCODED_LEN as u64;

/// Resolves the order key of a list element.
pub trait ElementKeyReader {
    /// The string key of `reference`, read from field `field_index` of its
    /// record in `element_class`'s bucket. A null field reads as the empty
    /// string.
    fn element_key(
        &mut self,
        element_class: Reference,
        field_index: usize,
        reference: Reference,
    ) -> Result<String>;
}

/// How a list's entries are ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOrder {
    /// By raw reference value.
    ByReference,
    /// By a string field of the referenced objects.
    ByKeyField {
        /// The element class whose bucket holds the objects.
        element_class: Reference,
        /// Index of the key field in the element class schema.
        field_index: usize,
        /// Reverse the key order.
        descending: bool,
    },
}

/// A list instance's runtime order spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSpec {
    /// Entry order.
    pub order: ListOrder,
    /// Whether equal keys may coexist.
    pub allow_duplicates: bool,
}

impl ListSpec {
    /// Build the runtime spec from a parsed list type and its element
    /// class.
    pub fn from_type(type_spec: &ListTypeSpec, element_class: &OdbClass) -> Result<ListSpec> {
        let order = match &type_spec.key_field {
            None => ListOrder::ByReference,
            Some(key) => {
                let field_index = element_class.field_index(key).ok_or_else(|| {
                    Error::Corruption(format!(
                        "List key field {key:?} missing from class {}",
                        element_class.name
                    ))
                })?;
                let element_ref = type_spec.element_ref.ok_or_else(|| {
                    Error::Corruption(format!(
                        "Unresolved element class in list type {}",
                        type_spec.to_code()
                    ))
                })?;
                ListOrder::ByKeyField {
                    element_class: element_ref,
                    field_index,
                    descending: type_spec.descending,
                }
            }
        };
        Ok(ListSpec {
            order,
            allow_duplicates: type_spec.allow_duplicates,
        })
    }
}

/// A search probe: a reference, or a caller-supplied key string.
#[derive(Debug, Clone, Copy)]
pub enum SearchKey<'a> {
    /// Probe by reference (resolved to its key for keyed lists).
    Ref(Reference),
    /// Probe by key string; only valid on keyed lists.
    Key(&'a str),
}

/// Order an entry relative to a probe under `spec`.
pub fn compare_entry(
    spec: &ListSpec,
    reader: &mut dyn ElementKeyReader,
    entry: Reference,
    probe: &SearchKey<'_>,
) -> Result<Ordering> {
    match &spec.order {
        ListOrder::ByReference => match probe {
            SearchKey::Ref(r) => Ok(entry.cmp(r)),
            SearchKey::Key(_) => Err(Error::ConstraintViolation(
                "Key queries are unsupported on a reference-ordered list".into(),
            )),
        },
        ListOrder::ByKeyField {
            element_class,
            field_index,
            descending,
        } => {
            let entry_key = reader.element_key(*element_class, *field_index, entry)?;
            let ord = match probe {
                SearchKey::Key(s) => entry_key.as_str().cmp(*s),
                SearchKey::Ref(r) => {
                    let probe_key = reader.element_key(*element_class, *field_index, *r)?;
                    entry_key.cmp(&probe_key)
                }
            };
            let ord = if *descending { ord.reverse() } else { ord };
            if ord == Ordering::Equal && spec.allow_duplicates {
                if let SearchKey::Ref(r) = probe {
                    return Ok(entry.cmp(r));
                }
            }
            Ok(ord)
        }
    }
}

/// The raw entry file of one list.
pub struct RefListFile {
    file: Box<dyn ByteFile>,
}

impl RefListFile {
    /// Open a list over `file`.
    pub fn new(file: Box<dyn ByteFile>) -> Self {
        RefListFile { file }
    }

    /// Number of entries.
    pub fn len(&self) -> u64 {
        self.file.size() / LIST_ENTRY_LEN
    }

    /// Whether the list has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The entry at `idx`.
    pub fn get(&mut self, idx: u64) -> Result<Reference> {
        self.file.set_position(idx * LIST_ENTRY_LEN);
        let mut buf = [0u8; 16];
        self.file.read_exact(&mut buf)?;
        Ok(Reference::from_bytes(&buf))
    }

    /// Insert `reference` at `idx`, shifting later entries up.
    pub fn insert_at(&mut self, idx: u64, reference: Reference) -> Result<()> {
        self.file.set_position(idx * LIST_ENTRY_LEN);
        self.file.shift(LIST_ENTRY_LEN as i64)?;
        self.file.set_position(idx * LIST_ENTRY_LEN);
        self.file.write_all(&reference.to_bytes())
    }

    /// Remove the entry at `idx`, shifting later entries down.
    pub fn remove_at(&mut self, idx: u64) -> Result<()> {
        self.file.set_position((idx + 1) * LIST_ENTRY_LEN);
        self.file.shift(-(LIST_ENTRY_LEN as i64))
    }

    /// Entries in `[start, end)`.
    pub fn iter_range(&mut self, start: u64, end: u64) -> Result<Vec<Reference>> {
        let end = end.min(self.len());
        let mut out = Vec::new();
        let mut idx = start;
        while idx < end {
            out.push(self.get(idx)?);
            idx += 1;
        }
        Ok(out)
    }

    /// Binary search for the first entry comparing equal to the probe.
    ///
    /// `cmp` orders an entry relative to the probe. Returns the index if
    /// found, or the insertion point encoded as `-(insertion_point + 1)`.
    pub fn search_first(
        &mut self,
        cmp: &mut dyn FnMut(Reference) -> Result<Ordering>,
    ) -> Result<i64> {
        let mut lo = 0u64;
        let mut hi = self.len();
        let mut found = None;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.get(mid)?;
            match cmp(entry)? {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => {
                    found = Some(mid);
                    hi = mid;
                }
            }
        }
        Ok(match found {
            Some(idx) => idx as i64,
            None => -(lo as i64 + 1),
        })
    }

    /// Binary search for the last entry comparing equal to the probe; same
    /// encoding as [`RefListFile::search_first`].
    pub fn search_last(
        &mut self,
        cmp: &mut dyn FnMut(Reference) -> Result<Ordering>,
    ) -> Result<i64> {
        let mut lo = 0u64;
        let mut hi = self.len();
        let mut found = None;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.get(mid)?;
            match cmp(entry)? {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => {
                    found = Some(mid);
                    lo = mid + 1;
                }
            }
        }
        Ok(match found {
            Some(idx) => idx as i64,
            None => -(lo as i64 + 1),
        })
    }
}

fn probe_cmp<'a>(
    spec: &'a ListSpec,
    reader: &'a mut dyn ElementKeyReader,
    probe: SearchKey<'a>,
) -> impl FnMut(Reference) -> Result<Ordering> + 'a {
    move |entry| compare_entry(spec, reader, entry, &probe)
}

/// First index of an entry equal to `probe`, or `-(insertion_point + 1)`.
pub fn search_first(
    file: &mut RefListFile,
    spec: &ListSpec,
    reader: &mut dyn ElementKeyReader,
    probe: SearchKey<'_>,
) -> Result<i64> {
    file.search_first(&mut probe_cmp(spec, reader, probe))
}

/// Last index of an entry equal to `probe`, or `-(insertion_point + 1)`.
pub fn search_last(
    file: &mut RefListFile,
    spec: &ListSpec,
    reader: &mut dyn ElementKeyReader,
    probe: SearchKey<'_>,
) -> Result<i64> {
    file.search_last(&mut probe_cmp(spec, reader, probe))
}

/// Both bounds of the equal range for `probe`.
pub fn search_first_and_last(
    file: &mut RefListFile,
    spec: &ListSpec,
    reader: &mut dyn ElementKeyReader,
    probe: SearchKey<'_>,
) -> Result<(i64, i64)> {
    let first = search_first(file, spec, reader, probe)?;
    if first < 0 {
        return Ok((first, first));
    }
    let last = search_last(file, spec, reader, probe)?;
    Ok((first, last))
}

/// Insert `reference` at its sorted position.
///
/// Fails with `ConstraintViolation` if the list is unique and an entry with
/// an equal key exists.
pub fn list_insert(
    file: &mut RefListFile,
    spec: &ListSpec,
    reader: &mut dyn ElementKeyReader,
    reference: Reference,
) -> Result<()> {
    let pos = search_last(file, spec, reader, SearchKey::Ref(reference))?;
    let idx = if pos >= 0 {
        if !spec.allow_duplicates {
            return Err(Error::ConstraintViolation(format!(
                "Duplicate key inserting {reference} into unique list"
            )));
        }
        pos as u64 + 1
    } else {
        (-(pos + 1)) as u64
    };
    file.insert_at(idx, reference)
}

/// Remove the first entry for `reference`. Returns whether one existed.
pub fn list_remove(
    file: &mut RefListFile,
    spec: &ListSpec,
    reader: &mut dyn ElementKeyReader,
    reference: Reference,
) -> Result<bool> {
    let (first, last) = search_first_and_last(file, spec, reader, SearchKey::Ref(reference))?;
    if first < 0 {
        return Ok(false);
    }
    // The equal range orders by key; make sure the removed entry is the
    // exact reference, not a different object with an equal key.
    for idx in first as u64..=last as u64 {
        if file.get(idx)? == reference {
            file.remove_at(idx)?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Remove every entry for `reference`, returning the removed entries.
pub fn list_remove_all(
    file: &mut RefListFile,
    spec: &ListSpec,
    reader: &mut dyn ElementKeyReader,
    reference: Reference,
) -> Result<Vec<Reference>> {
    let (first, last) = search_first_and_last(file, spec, reader, SearchKey::Ref(reference))?;
    if first < 0 {
        return Ok(Vec::new());
    }
    let mut removed = Vec::new();
    let mut idx = first as u64;
    let mut end = last as u64 + 1;
    while idx < end {
        if file.get(idx)? == reference {
            file.remove_at(idx)?;
            removed.push(reference);
            end -= 1;
        } else {
            idx += 1;
        }
    }
    Ok(removed)
}

/// Resolve view bounds `[lower, upper)` to entry positions.
pub fn resolve_bounds(
    file: &mut RefListFile,
    spec: &ListSpec,
    reader: &mut dyn ElementKeyReader,
    lower: Option<SearchKey<'_>>,
    upper: Option<SearchKey<'_>>,
) -> Result<(u64, u64)> {
    let start = match lower {
        None => 0,
        Some(probe) => {
            let pos = search_first(file, spec, reader, probe)?;
            if pos >= 0 {
                pos as u64
            } else {
                (-(pos + 1)) as u64
            }
        }
    };
    let end = match upper {
        None => file.len(),
        Some(probe) => {
            let pos = search_first(file, spec, reader, probe)?;
            if pos >= 0 {
                pos as u64
            } else {
                (-(pos + 1)) as u64
            }
        }
    };
    Ok((start, end.max(start)))
}
