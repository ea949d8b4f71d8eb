//! Core types and traits for Basalt
//!
//! This crate defines the foundational types used throughout the system:
//! - Reference: opaque 128-bit identifier for every persisted entity
//! - StoreKey: composite key addressing one substrate byte-file
//! - SnapshotAddress: opaque identifier of one substrate snapshot
//! - Error: shared error taxonomy
//! - Limits: configurable size limits
//! - Traits: the substrate interface (ByteFile, StoreTransaction,
//!   StoreSession, KeyedStore) and the commit-routing seam (CommitRouter)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod addr;
pub mod error;
pub mod key;
pub mod limits;
pub mod reference;
pub mod traits;

pub use addr::{SnapshotAddress, SnapshotAddressParseError};
pub use error::{Error, Result};
pub use key::StoreKey;
pub use limits::{validate_inline_string, validate_name, LimitError, Limits};
pub use reference::{Reference, ReferenceParseError};
pub use traits::{ByteFile, CommitRouter, KeyedStore, StoreSession, StoreTransaction};
