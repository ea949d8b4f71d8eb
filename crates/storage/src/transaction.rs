//! Heap substrate transactions and byte-file handles
//!
//! A transaction starts from an `Arc`-shared snapshot map and mutates it
//! copy-on-write: the first write to a file clones that file's payload once
//! (`Arc::make_mut`), leaving the source snapshot untouched. File handles
//! are independent cursors over the transaction's shared state, so several
//! handles (and several engine components) can be open at once.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use basalt_core::{ByteFile, Error, Result, SnapshotAddress, StoreKey, StoreTransaction};

use crate::heap::{HeapStore, SnapshotData};

pub(crate) struct TxnState {
    files: SnapshotData,
}

/// A mutable, isolated view of one snapshot of a [`HeapStore`] path.
pub struct HeapTransaction {
    store: HeapStore,
    path: String,
    state: Arc<Mutex<TxnState>>,
}

impl HeapTransaction {
    pub(crate) fn new(store: HeapStore, path: String, files: SnapshotData) -> Self {
        HeapTransaction {
            store,
            path,
            state: Arc::new(Mutex::new(TxnState { files })),
        }
    }
}

impl StoreTransaction for HeapTransaction {
    fn file(&self, key: StoreKey) -> Result<Box<dyn ByteFile>> {
        Ok(Box::new(HeapFile {
            state: Arc::clone(&self.state),
            key,
            pos: 0,
        }))
    }

    fn file_exists(&self, key: StoreKey) -> Result<bool> {
        Ok(self.state.lock().files.contains_key(&key))
    }

    fn flush(&mut self) -> Result<SnapshotAddress> {
        let data = self.state.lock().files.clone();
        self.store.install_snapshot(&self.path, data)
    }
}

/// A cursor over one keyed file of a [`HeapTransaction`].
pub struct HeapFile {
    state: Arc<Mutex<TxnState>>,
    key: StoreKey,
    pos: u64,
}

impl HeapFile {
    fn eof(&self, wanted: usize, available: u64) -> Error {
        Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "read of {wanted} bytes at {} past end of file {} (size {available})",
                self.pos, self.key
            ),
        ))
    }
}

impl ByteFile for HeapFile {
    fn size(&self) -> u64 {
        self.state
            .lock()
            .files
            .get(&self.key)
            .map(|d| d.len() as u64)
            .unwrap_or(0)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn set_position(&mut self, pos: u64) {
        self.pos = pos;
    }

    fn set_size(&mut self, size: u64) -> Result<()> {
        let mut state = self.state.lock();
        let data = state.files.entry(self.key).or_default();
        Arc::make_mut(data).resize(size as usize, 0);
        Ok(())
    }

    fn shift(&mut self, delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        let mut state = self.state.lock();
        let data = state.files.entry(self.key).or_default();
        let bytes = Arc::make_mut(data);
        let pos = self.pos as usize;
        if pos > bytes.len() {
            return Err(Error::InvalidState(format!(
                "shift at {pos} past end of file {} (size {})",
                self.key,
                bytes.len()
            )));
        }
        if delta > 0 {
            let gap = delta as usize;
            bytes.splice(pos..pos, std::iter::repeat(0u8).take(gap));
            // Cursor stays at the start of the opened gap.
        } else {
            let cut = (-delta) as usize;
            if cut > pos {
                return Err(Error::InvalidState(format!(
                    "shift of {delta} at {pos} before start of file {}",
                    self.key
                )));
            }
            bytes.drain(pos - cut..pos);
            self.pos = (pos - cut) as u64;
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        let empty: &[u8] = &[];
        let data = state
            .files
            .get(&self.key)
            .map(|d| d.as_slice())
            .unwrap_or(empty);
        let pos = self.pos as usize;
        let end = pos.checked_add(buf.len()).ok_or_else(|| {
            Error::InvalidState(format!("read position overflow in file {}", self.key))
        })?;
        if end > data.len() {
            return Err(self.eof(buf.len(), data.len() as u64));
        }
        buf.copy_from_slice(&data[pos..end]);
        drop(state);
        self.pos = end as u64;
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let data = state.files.entry(self.key).or_default();
        let bytes = Arc::make_mut(data);
        let pos = self.pos as usize;
        let end = pos + buf.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[pos..end].copy_from_slice(buf);
        drop(state);
        self.pos = end as u64;
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.state.lock().files.remove(&self.key);
        self.pos = 0;
        Ok(())
    }

    fn replicate_from(&mut self, other: &mut dyn ByteFile) -> Result<()> {
        let size = other.size();
        let mut buf = vec![0u8; size as usize];
        other.set_position(0);
        other.read_exact(&mut buf)?;

        let mut state = self.state.lock();
        let data = state.files.entry(self.key).or_default();
        *Arc::make_mut(data) = buf;
        drop(state);
        self.pos = size;
        Ok(())
    }

    fn copy_from(&mut self, other: &mut dyn ByteFile, size: u64) -> Result<()> {
        let mut buf = vec![0u8; size as usize];
        other.read_exact(&mut buf)?;
        self.write_all(&buf)
    }
}
