//! Substrate interface traits
//!
//! The object database runs on a copy-on-write keyed byte-file store (the
//! substrate). The engine consumes these traits only; `basalt-storage`
//! provides the embedded in-memory implementation, and a remote or disk
//! substrate can be swapped in behind the same seam.
//!
//! A path is a named, independently versioned chain of snapshots within one
//! store. Flushing a transaction installs its state as an unpublished
//! snapshot (a *proposal*); publishing appends an address to the path's
//! committed chain.

use std::sync::Arc;

use crate::addr::SnapshotAddress;
use crate::error::Result;
use crate::key::StoreKey;

/// One keyed byte-file inside a substrate transaction.
///
/// A handle carries its own cursor position; reads and writes advance it.
/// Multiple handles may be open on the same file within one transaction and
/// observe each other's writes. Files spring into existence on first write;
/// reading a missing file behaves as reading an empty one.
pub trait ByteFile {
    /// Current size of the file in bytes.
    fn size(&self) -> u64;

    /// Current cursor position.
    fn position(&self) -> u64;

    /// Move the cursor. Positions past the end are allowed; a write there
    /// zero-fills the gap.
    fn set_position(&mut self, pos: u64);

    /// Truncate or zero-extend the file to `size` bytes.
    fn set_size(&mut self, size: u64) -> Result<()>;

    /// Shift the data from the cursor to the end of the file by `delta`
    /// bytes. A positive `delta` opens a zero-filled gap at the cursor; a
    /// negative `delta` removes the `|delta|` bytes immediately before the
    /// cursor. The file size changes by `delta`; the cursor is left at the
    /// start of the moved region.
    fn shift(&mut self, delta: i64) -> Result<()>;

    /// Read exactly `buf.len()` bytes at the cursor, advancing it. Fails
    /// with an I/O error if the file ends first.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Write all of `buf` at the cursor, advancing it and growing the file
    /// as needed.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Remove the file from the transaction entirely.
    fn delete(&mut self) -> Result<()>;

    /// Replace this file's entire content with `other`'s. Both cursors are
    /// left at the end of the copied content.
    fn replicate_from(&mut self, other: &mut dyn ByteFile) -> Result<()>;

    /// Copy `size` bytes from `other`'s cursor to this file's cursor,
    /// advancing both.
    fn copy_from(&mut self, other: &mut dyn ByteFile, size: u64) -> Result<()>;
}

/// One substrate transaction: an isolated, mutable view of a snapshot.
///
/// The transaction exclusively owns the underlying file state; handles
/// returned by [`StoreTransaction::file`] are views that serialize access
/// through it. Dropping the transaction without flushing discards all
/// buffered writes.
pub trait StoreTransaction {
    /// Open a handle on the file stored under `key`.
    fn file(&self, key: StoreKey) -> Result<Box<dyn ByteFile>>;

    /// Whether a non-empty file exists under `key`.
    fn file_exists(&self, key: StoreKey) -> Result<bool>;

    /// Install the transaction's state as an unpublished snapshot and return
    /// its address. The transaction remains usable and may be flushed again.
    fn flush(&mut self) -> Result<SnapshotAddress>;
}

/// A session against one path of a substrate store.
pub trait StoreSession: Send + Sync {
    /// The path name this session is bound to.
    fn path_name(&self) -> &str;

    /// Address of the latest published snapshot.
    fn current_snapshot(&self) -> Result<SnapshotAddress>;

    /// Addresses published after `base`, oldest first. Empty if `base` is
    /// the current snapshot.
    fn snapshots_since(&self, base: SnapshotAddress) -> Result<Vec<SnapshotAddress>>;

    /// Open a transaction reading from `snapshot` (published or proposed).
    fn create_transaction(&self, snapshot: SnapshotAddress) -> Result<Box<dyn StoreTransaction>>;

    /// Append `proposal` to this path's committed chain.
    fn publish(&self, proposal: SnapshotAddress) -> Result<SnapshotAddress>;

    /// Publish `proposal` into a sibling path of the same store as an
    /// introduced snapshot (no merge relationship with the target's
    /// history).
    fn publish_into(&self, target_path: &str, proposal: SnapshotAddress)
        -> Result<SnapshotAddress>;
}

/// A substrate store holding independently versioned named paths.
pub trait KeyedStore: Send + Sync {
    /// Create a new, empty path. Fails if the path already exists.
    fn create_path(&self, path: &str) -> Result<()>;

    /// Whether the path exists.
    fn path_exists(&self, path: &str) -> Result<bool>;

    /// Open a session against the path.
    fn session(&self, path: &str) -> Result<Arc<dyn StoreSession>>;
}

/// Commit routing seam between a transaction and the consensus engine.
///
/// The engine hands a flushed proposal to the router; the router serializes
/// commits per path, runs the merge procedure, and returns the published
/// address or a commit fault.
pub trait CommitRouter: Send + Sync {
    /// Merge and publish `proposal` on the session's path.
    fn perform_commit(
        &self,
        session: &dyn StoreSession,
        proposal: SnapshotAddress,
    ) -> Result<SnapshotAddress>;
}
