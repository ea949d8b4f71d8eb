//! # Basalt
//!
//! An embedded versioned object database: typed objects, ordered reference
//! lists and named roots on a copy-on-write keyed substrate, with
//! snapshot-isolated transactions reconciled at commit time by a
//! deterministic merge procedure.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use basaltdb::{FieldValue, HeapStore, ListFieldSpec, ObjectDatabase, Result};
//!
//! fn main() -> Result<()> {
//!     let db = ObjectDatabase::new(Arc::new(HeapStore::new()));
//!     let session = db.create("app")?;
//!
//!     // Define a schema and commit it.
//!     let txn = session.transaction()?;
//!     let mut creator = txn.class_creator();
//!     creator
//!         .define_class("Person")
//!         .string_field("name", false)
//!         .list_field("friends", "Person", ListFieldSpec {
//!             allow_duplicates: true,
//!             key_field: Some("name".into()),
//!             descending: false,
//!         });
//!     creator.validate_and_complete()?;
//!     txn.commit()?;
//!
//!     // Build a small graph behind a named root.
//!     let txn = session.transaction()?;
//!     let person = txn.find_class("Person")?.expect("committed above");
//!     let alice = txn.construct_object(&person, vec!["Alice".into(), FieldValue::Null])?;
//!     let bob = txn.construct_object(&person, vec!["Bob".into(), FieldValue::Null])?;
//!     alice.get_list("friends")?.add(&bob)?;
//!     txn.add_named_item("root", &alice)?;
//!     txn.commit()?;
//!
//!     // Read it back from a fresh snapshot.
//!     let txn = session.read_transaction()?;
//!     let root = txn.get_named_item("root")?.expect("named above");
//!     assert_eq!(root.get_list("friends")?.len()?, 1);
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency model
//!
//! Transactions are snapshot isolated: each reads its base snapshot plus
//! its own buffered mutations. Commits on one path are serialized and
//! merged; concurrent commits succeed as long as their logical effects do
//! not clash (same object mutated, same unique key added, same list entry
//! removed). A clash surfaces as [`Error::CommitFault`], and the caller
//! opens a fresh transaction and retries.
//!
//! # Architecture
//!
//! The workspace layers, bottom up: `basalt-core` (references, keys,
//! errors, the substrate traits), `basalt-storage` (the in-memory
//! copy-on-write substrate), `basalt-engine` (buckets, lists, the object
//! log, transactions) and `basalt-consensus` (the per-path merge). Only
//! the surface re-exported here is meant to be stable.

pub use basalt_consensus::{ObjectDatabase, OdbSession};
pub use basalt_core::{
    Error, Limits, Reference, Result, SnapshotAddress,
};
pub use basalt_engine::{
    ClassCreator, ClassSource, FieldDef, FieldValue, ListFieldSpec, ObjectTransaction, OdbClass,
    OdbData, OdbList, OdbObject, TxStatus,
};
pub use basalt_storage::HeapStore;
