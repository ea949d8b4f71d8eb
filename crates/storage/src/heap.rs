//! HeapStore: the embedded in-memory substrate
//!
//! A copy-on-write keyed byte-file store with snapshot addressing. Every
//! flushed transaction installs an immutable snapshot (a map from
//! [`StoreKey`] to `Arc`-shared file payloads); publishing appends a
//! snapshot address to a path's committed chain. Snapshots are never
//! mutated after installation, so sessions and transactions can share them
//! freely across threads.
//!
//! This is the substrate the end-to-end tests and the embedded
//! configuration run on. Durability is out of scope here; a disk or remote
//! substrate implements the same `basalt-core` traits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use basalt_core::{
    Error, KeyedStore, Result, SnapshotAddress, StoreKey, StoreSession, StoreTransaction,
};

use crate::transaction::HeapTransaction;

/// One snapshot: an immutable map from key to file payload.
pub(crate) type SnapshotData = BTreeMap<StoreKey, Arc<Vec<u8>>>;

/// One named path: all flushed snapshots plus the committed chain.
struct PathState {
    /// Every flushed snapshot, published or proposed, by address.
    versions: HashMap<SnapshotAddress, SnapshotData>,
    /// Addresses of published snapshots, oldest first.
    committed: Vec<SnapshotAddress>,
}

struct StoreInner {
    paths: HashMap<String, PathState>,
    next_addr: u64,
}

/// The in-memory substrate store.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct HeapStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl HeapStore {
    /// Create an empty store.
    pub fn new() -> Self {
        HeapStore {
            inner: Arc::new(Mutex::new(StoreInner {
                paths: HashMap::new(),
                next_addr: 1,
            })),
        }
    }

    fn alloc_addr(inner: &mut StoreInner) -> SnapshotAddress {
        let addr = SnapshotAddress::new(inner.next_addr);
        inner.next_addr += 1;
        addr
    }

    /// Install `data` as a flushed snapshot of `path` and return its
    /// address. Called by [`HeapTransaction::flush`].
    pub(crate) fn install_snapshot(
        &self,
        path: &str,
        data: SnapshotData,
    ) -> Result<SnapshotAddress> {
        let mut inner = self.inner.lock();
        let addr = Self::alloc_addr(&mut inner);
        let state = path_state_mut(&mut inner, path)?;
        state.versions.insert(addr, data);
        Ok(addr)
    }

    /// Fetch a snapshot's data by address.
    pub(crate) fn snapshot_data(&self, path: &str, addr: SnapshotAddress) -> Result<SnapshotData> {
        let mut inner = self.inner.lock();
        let state = path_state_mut(&mut inner, path)?;
        state
            .versions
            .get(&addr)
            .cloned()
            .ok_or_else(|| Error::InvalidState(format!("Unknown snapshot {addr} on path {path:?}")))
    }
}

impl Default for HeapStore {
    fn default() -> Self {
        Self::new()
    }
}

fn path_state_mut<'a>(inner: &'a mut StoreInner, path: &str) -> Result<&'a mut PathState> {
    inner
        .paths
        .get_mut(path)
        .ok_or_else(|| Error::InvalidState(format!("No such path: {path:?}")))
}

impl KeyedStore for HeapStore {
    fn create_path(&self, path: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.paths.contains_key(path) {
            return Err(Error::InvalidState(format!(
                "Path already exists: {path:?}"
            )));
        }
        let addr = Self::alloc_addr(&mut inner);
        let mut versions = HashMap::new();
        versions.insert(addr, SnapshotData::new());
        inner.paths.insert(
            path.to_string(),
            PathState {
                versions,
                committed: vec![addr],
            },
        );
        debug!(path, %addr, "created path");
        Ok(())
    }

    fn path_exists(&self, path: &str) -> Result<bool> {
        Ok(self.inner.lock().paths.contains_key(path))
    }

    fn session(&self, path: &str) -> Result<Arc<dyn StoreSession>> {
        if !self.path_exists(path)? {
            return Err(Error::InvalidState(format!("No such path: {path:?}")));
        }
        Ok(Arc::new(HeapSession {
            store: self.clone(),
            path: path.to_string(),
        }))
    }
}

/// A session against one path of a [`HeapStore`].
pub struct HeapSession {
    store: HeapStore,
    path: String,
}

impl StoreSession for HeapSession {
    fn path_name(&self) -> &str {
        &self.path
    }

    fn current_snapshot(&self) -> Result<SnapshotAddress> {
        let mut inner = self.store.inner.lock();
        let state = path_state_mut(&mut inner, &self.path)?;
        state
            .committed
            .last()
            .copied()
            .ok_or_else(|| Error::Corruption(format!("Path {:?} has no snapshots", self.path)))
    }

    fn snapshots_since(&self, base: SnapshotAddress) -> Result<Vec<SnapshotAddress>> {
        let mut inner = self.store.inner.lock();
        let state = path_state_mut(&mut inner, &self.path)?;
        let pos = state
            .committed
            .iter()
            .position(|a| *a == base)
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "Base root {base} is not in the history of path {:?}",
                    self.path
                ))
            })?;
        Ok(state.committed[pos + 1..].to_vec())
    }

    fn create_transaction(&self, snapshot: SnapshotAddress) -> Result<Box<dyn StoreTransaction>> {
        let data = self.store.snapshot_data(&self.path, snapshot)?;
        Ok(Box::new(HeapTransaction::new(
            self.store.clone(),
            self.path.clone(),
            data,
        )))
    }

    fn publish(&self, proposal: SnapshotAddress) -> Result<SnapshotAddress> {
        let mut inner = self.store.inner.lock();
        let state = path_state_mut(&mut inner, &self.path)?;
        if !state.versions.contains_key(&proposal) {
            return Err(Error::InvalidState(format!(
                "Unknown snapshot {proposal} on path {:?}",
                self.path
            )));
        }
        state.committed.push(proposal);
        debug!(path = %self.path, %proposal, "published snapshot");
        Ok(proposal)
    }

    fn publish_into(
        &self,
        target_path: &str,
        proposal: SnapshotAddress,
    ) -> Result<SnapshotAddress> {
        let data = self.store.snapshot_data(&self.path, proposal)?;
        let mut inner = self.store.inner.lock();
        let addr = HeapStore::alloc_addr(&mut inner);
        let state = path_state_mut(&mut inner, target_path)?;
        state.versions.insert(addr, data);
        state.committed.push(addr);
        debug!(
            from = %self.path,
            to = target_path,
            %proposal,
            %addr,
            "published introduced snapshot"
        );
        Ok(addr)
    }
}
