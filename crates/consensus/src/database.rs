//! Database coordinator and sessions
//!
//! [`ObjectDatabase`] fronts one substrate store: it formats and opens
//! paths, hands out per-path [`OdbSession`]s, and routes every commit
//! through the merge procedure under that path's lock. It is the embedded
//! stand-in for a root server; a networked deployment would put a
//! transport in front of the same routing.

use std::sync::Arc;

use tracing::debug;

use basalt_core::{
    CommitRouter, Error, KeyedStore, Result, SnapshotAddress, StoreSession,
};
use basalt_engine::transaction::ObjectTransaction;
use basalt_engine::setup::{check_magic, format_path};

use crate::locks::PathLocks;
use crate::merge::merge_commit;

struct DbInner {
    store: Arc<dyn KeyedStore>,
    locks: PathLocks,
}

/// Coordinator over one substrate store. Cheap to clone; clones share the
/// per-path lock registry.
#[derive(Clone)]
pub struct ObjectDatabase {
    inner: Arc<DbInner>,
}

impl ObjectDatabase {
    /// Wrap a substrate store.
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        ObjectDatabase {
            inner: Arc::new(DbInner {
                store,
                locks: PathLocks::new(),
            }),
        }
    }

    /// Create and format a fresh object database path.
    pub fn create(&self, path: &str) -> Result<OdbSession> {
        self.inner.store.create_path(path)?;
        let session = self.inner.store.session(path)?;
        format_path(session.as_ref())?;
        Ok(OdbSession {
            db: self.clone(),
            session,
        })
    }

    /// Open a session against an existing, formatted path.
    pub fn open(&self, path: &str) -> Result<OdbSession> {
        if !self.inner.store.path_exists(path)? {
            return Err(Error::InvalidState(format!("No such path: {path:?}")));
        }
        let session = self.inner.store.session(path)?;
        let probe = session.create_transaction(session.current_snapshot()?)?;
        check_magic(probe.as_ref())?;
        Ok(OdbSession {
            db: self.clone(),
            session,
        })
    }
}

impl CommitRouter for ObjectDatabase {
    /// The per-path critical section: serialize, merge, publish.
    fn perform_commit(
        &self,
        session: &dyn StoreSession,
        proposal: SnapshotAddress,
    ) -> Result<SnapshotAddress> {
        let lock = self.inner.locks.lock_for(session.path_name());
        let _guard = lock.lock();
        merge_commit(session, proposal)
    }
}

/// A client session against one object database path.
pub struct OdbSession {
    db: ObjectDatabase,
    session: Arc<dyn StoreSession>,
}

impl OdbSession {
    /// The path this session is bound to.
    pub fn path_name(&self) -> &str {
        self.session.path_name()
    }

    /// Address of the latest published snapshot.
    pub fn current_snapshot(&self) -> Result<SnapshotAddress> {
        self.session.current_snapshot()
    }

    /// Open a read-write transaction on the current snapshot.
    pub fn transaction(&self) -> Result<ObjectTransaction> {
        ObjectTransaction::open(Arc::clone(&self.session), Arc::new(self.db.clone()))
    }

    /// Open a read-write transaction with custom limits.
    pub fn transaction_with_limits(
        &self,
        limits: basalt_core::Limits,
    ) -> Result<ObjectTransaction> {
        ObjectTransaction::open_with_limits(
            Arc::clone(&self.session),
            Arc::new(self.db.clone()),
            limits,
        )
    }

    /// Open a read-only transaction on the current snapshot.
    pub fn read_transaction(&self) -> Result<ObjectTransaction> {
        ObjectTransaction::open_read_only(Arc::clone(&self.session), Arc::new(self.db.clone()))
    }

    /// Publish this path's current snapshot into `target` as an introduced
    /// snapshot, bypassing merge checks entirely.
    pub fn publish_to(&self, target: &OdbSession) -> Result<SnapshotAddress> {
        let lock = self.db.inner.locks.lock_for(target.path_name());
        let _guard = lock.lock();
        let current = self.session.current_snapshot()?;
        let published = self.session.publish_into(target.path_name(), current)?;
        debug!(
            from = self.path_name(),
            to = target.path_name(),
            %published,
            "introduced snapshot published"
        );
        Ok(published)
    }
}

impl PartialEq for OdbSession {
    fn eq(&self, other: &Self) -> bool {
        self.path_name() == other.path_name()
    }
}

impl Eq for OdbSession {}

impl std::fmt::Debug for OdbSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OdbSession")
            .field("path", &self.path_name())
            .finish()
    }
}
