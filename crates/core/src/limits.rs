//! Size limits for names, schemas and inline values
//!
//! Validation functions take `&Limits` so embedders can tighten or relax
//! the defaults; the convenience wrappers in the engine use
//! `Limits::default()`.

use thiserror::Error;

/// Configurable size limits.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum class or field name length in bytes.
    pub max_name_bytes: usize,
    /// Maximum number of fields per class.
    pub max_fields_per_class: usize,
    /// Maximum inline string field value in bytes.
    pub max_inline_string_bytes: usize,
    /// Upper bound (inclusive) of the random key-counter stride.
    pub max_key_stride: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_name_bytes: 256,
            max_fields_per_class: 256,
            max_inline_string_bytes: 32 * 1024,
            max_key_stride: 127,
        }
    }
}

/// Limit violation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimitError {
    /// A name is empty.
    #[error("Name cannot be empty")]
    EmptyName,

    /// A name exceeds `max_name_bytes`.
    #[error("Name too long: {actual} bytes exceeds maximum {max}")]
    NameTooLong {
        /// Actual length in bytes.
        actual: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// A name contains a character the schema encoding cannot carry.
    #[error("Name contains invalid character {0:?}")]
    InvalidNameChar(char),

    /// A class declares more than `max_fields_per_class` fields.
    #[error("Too many fields: {actual} exceeds maximum {max}")]
    TooManyFields {
        /// Actual field count.
        actual: usize,
        /// Maximum allowed count.
        max: usize,
    },

    /// An inline string value exceeds `max_inline_string_bytes`.
    #[error("Inline string too long: {actual} bytes exceeds maximum {max}")]
    StringTooLong {
        /// Actual length in bytes.
        actual: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

/// Validate a class or field name against the given limits.
///
/// Names are embedded in the line-delimited schema form, so whitespace and
/// newlines are rejected.
pub fn validate_name(name: &str, limits: &Limits) -> Result<(), LimitError> {
    if name.is_empty() {
        return Err(LimitError::EmptyName);
    }
    if name.len() > limits.max_name_bytes {
        return Err(LimitError::NameTooLong {
            actual: name.len(),
            max: limits.max_name_bytes,
        });
    }
    if let Some(c) = name.chars().find(|c| c.is_whitespace() || *c == '\0') {
        return Err(LimitError::InvalidNameChar(c));
    }
    Ok(())
}

/// Validate an inline string field value against the given limits.
pub fn validate_inline_string(value: &str, limits: &Limits) -> Result<(), LimitError> {
    if value.len() > limits.max_inline_string_bytes {
        return Err(LimitError::StringTooLong {
            actual: value.len(),
            max: limits.max_inline_string_bytes,
        });
    }
    Ok(())
}
