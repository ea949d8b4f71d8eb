//! Object record encoding
//!
//! A serialized object is its 16-byte reference header followed by one
//! tagged value per field: `0` for null, `1` for an inline UTF-8 string
//! (length-prefixed), `2` for a 16-byte reference.

use basalt_core::{Error, Reference, Result};

use crate::file_io::{push_utf, take_utf};

const TAG_NULL: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_REFERENCE: u8 = 2;

/// One field value of an object instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// No value.
    Null,
    /// An inline string.
    Str(String),
    /// A reference to another entity.
    Ref(Reference),
}

impl FieldValue {
    /// The contained string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The contained reference, if this is a reference value.
    pub fn as_ref_value(&self) -> Option<Reference> {
        match self {
            FieldValue::Ref(r) => Some(*r),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<Reference> for FieldValue {
    fn from(r: Reference) -> Self {
        FieldValue::Ref(r)
    }
}

/// A decoded object instance: reference header plus field values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// The object's reference.
    pub reference: Reference,
    /// Field values in declaration order.
    pub values: Vec<FieldValue>,
}

impl ObjectRecord {
    /// Create a record.
    pub fn new(reference: Reference, values: Vec<FieldValue>) -> Self {
        ObjectRecord { reference, values }
    }

    /// Encode to the bucket wire form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.reference.to_bytes());
        for value in &self.values {
            match value {
                FieldValue::Null => out.push(TAG_NULL),
                FieldValue::Str(s) => {
                    out.push(TAG_STRING);
                    push_utf(&mut out, s)?;
                }
                FieldValue::Ref(r) => {
                    out.push(TAG_REFERENCE);
                    out.extend_from_slice(&r.to_bytes());
                }
            }
        }
        Ok(out)
    }

    /// Decode from the bucket wire form.
    pub fn decode(buf: &[u8]) -> Result<ObjectRecord> {
        let truncated = || Error::Corruption("Truncated object record".into());
        let reference = Reference::from_slice(buf).ok_or_else(truncated)?;
        let mut values = Vec::new();
        let mut rest = &buf[Reference::ENCODED_LEN..];
        while !rest.is_empty() {
            let tag = rest[0];
            rest = &rest[1..];
            match tag {
                TAG_NULL => values.push(FieldValue::Null),
                TAG_STRING => {
                    let (s, used) = take_utf(rest)?;
                    values.push(FieldValue::Str(s));
                    rest = &rest[used..];
                }
                TAG_REFERENCE => {
                    let r = Reference::from_slice(rest).ok_or_else(truncated)?;
                    values.push(FieldValue::Ref(r));
                    rest = &rest[Reference::ENCODED_LEN..];
                }
                other => {
                    return Err(Error::Corruption(format!(
                        "Unknown field tag {other} in object record"
                    )))
                }
            }
        }
        Ok(ObjectRecord { reference, values })
    }
}
