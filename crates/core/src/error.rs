//! Error types for the Basalt object database
//!
//! All crates in the workspace share this taxonomy. We use `thiserror` for
//! automatic `Display` and `Error` implementations.
//!
//! ## Categories
//!
//! - **I/O**: substrate failures; bubble up unchanged.
//! - **Corruption**: malformed on-substrate records; surfaced as-is.
//! - **Logic faults** (`TypeMismatch`, `ConstraintViolation`,
//!   `ClassValidation`): the transaction remains usable; the caller decides
//!   whether to undo or abandon.
//! - **`ReadOnlyViolation`**: fatal to the transaction.
//! - **`CommitFault`**: returned by commit when concurrent history cannot be
//!   merged; the transaction is invalidated and the caller retries against a
//!   fresh base.
//!
//! `UnresolvedReference` is internal to the lookup layer; public APIs wrap
//! it as `NoSuchReference` via [`Error::into_public`].

use std::io;

use thiserror::Error;

use crate::reference::Reference;

/// Result type alias for Basalt operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type shared across the Basalt workspace.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the substrate.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or inconsistent on-substrate data.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Dereference of a reference unknown to the database.
    #[error("No such reference: {0}")]
    NoSuchReference(Reference),

    /// Reference-to-key lookup miss (internal; wrapped as `NoSuchReference`
    /// at API boundaries).
    #[error("Unresolved reference: {0}")]
    UnresolvedReference(Reference),

    /// A value was passed to a field whose declared type does not admit it,
    /// or an immutable field was mutated.
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// A structural constraint was violated (duplicate key in a unique list,
    /// remove of a missing element, key query on a reference-ordered list).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A mutating operation was invoked on a read-only transaction.
    #[error("Transaction is read-only")]
    ReadOnlyViolation,

    /// Class batch validation failed; the creator is invalidated and the
    /// substrate is untouched.
    #[error("Class validation failed: {0}")]
    ClassValidation(String),

    /// The proposal conflicts with concurrently committed history and cannot
    /// be merged.
    #[error("Commit fault: {0}")]
    CommitFault(String),

    /// An operation was invoked in a state that does not permit it.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Check if this error is a commit fault.
    ///
    /// Used for retry logic: only commit faults should be retried against a
    /// fresh base snapshot.
    pub fn is_commit_fault(&self) -> bool {
        matches!(self, Error::CommitFault(_))
    }

    /// Check if this error is a constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::ConstraintViolation(_))
    }

    /// Wrap internal lookup misses into the public `NoSuchReference` kind;
    /// all other errors pass through unchanged.
    pub fn into_public(self) -> Error {
        match self {
            Error::UnresolvedReference(r) => Error::NoSuchReference(r),
            other => other,
        }
    }
}
