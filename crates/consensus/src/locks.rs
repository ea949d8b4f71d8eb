//! Per-path commit locks
//!
//! Commits for one path form a strictly serialized critical section, but
//! different paths must be able to commit in parallel. The registry hands
//! out one lock per path name, created lazily on first use.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Lazily populated lock registry keyed by path name.
pub(crate) struct PathLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        PathLocks {
            locks: DashMap::new(),
        }
    }

    /// The lock serializing commits on `path`.
    pub fn lock_for(&self, path: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
