//! Consensus engine for Basalt
//!
//! Serializes commits per path and reconciles each flushed proposal with
//! the snapshots committed since its base: dictionary additions merge,
//! clashed key allocations are remapped, independent list operations are
//! replayed, and conflicting object, data or list changes surface as
//! `CommitFault` for the caller to retry against a fresh snapshot.
//!
//! [`ObjectDatabase`] is the embedder entry point; it wraps any
//! `basalt_core::KeyedStore` and hands out [`OdbSession`]s whose
//! transactions route their commits through this engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod database;
mod locks;
mod merge;

pub use database::{ObjectDatabase, OdbSession};
