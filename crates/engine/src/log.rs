//! The object log
//!
//! Every logical mutation a transaction performs is recorded as a binary
//! entry in an append-only ordered set at key `(0,1,11)`: resource key
//! allocations, object and data changes, list adds/removes, list-change
//! markers and dictionary additions. The merge procedure reads the logs of
//! a proposal and of every snapshot committed since its base to decide
//! whether the proposal can be replayed.
//!
//! Entries are ordered lexicographically over their full byte encoding:
//! one code byte, then one to three 16-byte tuples. That puts entries of
//! one kind together and groups them by their primary key tuple, which is
//! exactly the iteration order replay wants.
//!
//! The companion property set at `(0,1,12)` carries the base-root property
//! `B`, distinguishing an iterative proposal (has a base root) from an
//! introduced one (published without merging).

use basalt_core::{
    Error, Reference, Result, SnapshotAddress, StoreKey, StoreTransaction,
    key::{OBJECT_LOG_KEY, TRANSACTION_PROPERTIES_KEY},
};

use crate::ordered_set::{bytewise_cmp, OrderedSetFile};
use crate::properties::PropertySet;

/// Entry code for a resource key allocation.
pub const CODE_KEY_ALLOC: u8 = 0x04;
/// Entry code for a data blob mutation.
pub const CODE_DATA_CHANGE: u8 = 0x07;
/// Entry code for a list element addition.
pub const CODE_LIST_ADD: u8 = 0x09;
/// Entry code for a list element removal.
pub const CODE_LIST_REMOVE: u8 = 0x0a;
/// Entry code for a list-changed marker.
pub const CODE_LIST_CHANGE: u8 = 0x0b;
/// Entry code for an object insert or replace.
pub const CODE_OBJECT_CHANGE: u8 = 0x0f;
/// Entry code for a dictionary addition.
pub const CODE_DICTIONARY_ADD: u8 = 0x13;

/// The base-root property key.
const BASE_ROOT_PROPERTY: &str = "B";
/// Base-root property value of an introduced proposal.
const NO_BASE_ROOT: &str = "no base root";

/// One logical event in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// A storage key was allocated for a resource reference.
    KeyAlloc {
        /// The allocated storage key.
        key: StoreKey,
        /// The resource reference the key backs.
        reference: Reference,
    },
    /// A data blob was mutated.
    DataChange {
        /// The blob's reference.
        data_ref: Reference,
    },
    /// A reference was added to an ordered list.
    ListAdd {
        /// The list instance.
        list: Reference,
        /// The added element.
        object: Reference,
        /// The list's type class.
        list_class: Reference,
    },
    /// A reference was removed from an ordered list.
    ListRemove {
        /// The list instance.
        list: Reference,
        /// The removed element.
        object: Reference,
        /// The list's type class.
        list_class: Reference,
    },
    /// A list was changed at least once in this transaction.
    ListChange {
        /// The list instance.
        list: Reference,
    },
    /// An object was inserted or replaced in its class bucket.
    ObjectChange {
        /// The object's class.
        class: Reference,
        /// The object.
        object: Reference,
    },
    /// A binding was added to the class dictionary.
    DictionaryAdd {
        /// The bound reference.
        reference: Reference,
    },
}

impl LogEntry {
    /// The entry's code byte.
    pub fn code(&self) -> u8 {
        match self {
            LogEntry::KeyAlloc { .. } => CODE_KEY_ALLOC,
            LogEntry::DataChange { .. } => CODE_DATA_CHANGE,
            LogEntry::ListAdd { .. } => CODE_LIST_ADD,
            LogEntry::ListRemove { .. } => CODE_LIST_REMOVE,
            LogEntry::ListChange { .. } => CODE_LIST_CHANGE,
            LogEntry::ObjectChange { .. } => CODE_OBJECT_CHANGE,
            LogEntry::DictionaryAdd { .. } => CODE_DICTIONARY_ADD,
        }
    }

    /// Encode as `code | tuples`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 3 * 16);
        out.push(self.code());
        match self {
            LogEntry::KeyAlloc { key, reference } => {
                out.extend_from_slice(&key.to_tuple_bytes());
                out.extend_from_slice(&reference.to_bytes());
            }
            LogEntry::DataChange { data_ref } => {
                out.extend_from_slice(&data_ref.to_bytes());
            }
            LogEntry::ListAdd {
                list,
                object,
                list_class,
            }
            | LogEntry::ListRemove {
                list,
                object,
                list_class,
            } => {
                out.extend_from_slice(&list.to_bytes());
                out.extend_from_slice(&object.to_bytes());
                out.extend_from_slice(&list_class.to_bytes());
            }
            LogEntry::ListChange { list } => {
                out.extend_from_slice(&list.to_bytes());
            }
            LogEntry::ObjectChange { class, object } => {
                out.extend_from_slice(&class.to_bytes());
                out.extend_from_slice(&object.to_bytes());
            }
            LogEntry::DictionaryAdd { reference } => {
                out.extend_from_slice(&reference.to_bytes());
            }
        }
        out
    }

    /// Decode one entry from its full byte encoding.
    pub fn decode(buf: &[u8]) -> Result<LogEntry> {
        let truncated = || Error::Corruption("Truncated object log entry".into());
        let code = *buf.first().ok_or_else(truncated)?;
        let body = &buf[1..];
        let tuple = |i: usize| -> Result<[u8; 16]> {
            let mut t = [0u8; 16];
            let start = i * 16;
            let end = start + 16;
            if body.len() < end {
                return Err(truncated());
            }
            t.copy_from_slice(&body[start..end]);
            Ok(t)
        };
        let expect = |tuples: usize| -> Result<()> {
            if body.len() != tuples * 16 {
                return Err(Error::Corruption(format!(
                    "Object log entry {code:#04x} has {} body bytes, expected {}",
                    body.len(),
                    tuples * 16
                )));
            }
            Ok(())
        };
        match code {
            CODE_KEY_ALLOC => {
                expect(2)?;
                Ok(LogEntry::KeyAlloc {
                    key: StoreKey::from_tuple_bytes(&tuple(0)?),
                    reference: Reference::from_bytes(&tuple(1)?),
                })
            }
            CODE_DATA_CHANGE => {
                expect(1)?;
                Ok(LogEntry::DataChange {
                    data_ref: Reference::from_bytes(&tuple(0)?),
                })
            }
            CODE_LIST_ADD | CODE_LIST_REMOVE => {
                expect(3)?;
                let list = Reference::from_bytes(&tuple(0)?);
                let object = Reference::from_bytes(&tuple(1)?);
                let list_class = Reference::from_bytes(&tuple(2)?);
                Ok(if code == CODE_LIST_ADD {
                    LogEntry::ListAdd {
                        list,
                        object,
                        list_class,
                    }
                } else {
                    LogEntry::ListRemove {
                        list,
                        object,
                        list_class,
                    }
                })
            }
            CODE_LIST_CHANGE => {
                expect(1)?;
                Ok(LogEntry::ListChange {
                    list: Reference::from_bytes(&tuple(0)?),
                })
            }
            CODE_OBJECT_CHANGE => {
                expect(2)?;
                Ok(LogEntry::ObjectChange {
                    class: Reference::from_bytes(&tuple(0)?),
                    object: Reference::from_bytes(&tuple(1)?),
                })
            }
            CODE_DICTIONARY_ADD => {
                expect(1)?;
                Ok(LogEntry::DictionaryAdd {
                    reference: Reference::from_bytes(&tuple(0)?),
                })
            }
            other => Err(Error::Corruption(format!(
                "Unknown object log entry code {other:#04x}"
            ))),
        }
    }
}

/// The per-transaction object log plus its companion properties.
pub struct ObjectLog {
    set: OrderedSetFile,
    props: PropertySet,
}

impl ObjectLog {
    /// Open the log of `txn`.
    pub fn open(txn: &dyn StoreTransaction) -> Result<Self> {
        let set = OrderedSetFile::new(txn.file(OBJECT_LOG_KEY)?, bytewise_cmp, true);
        let props = PropertySet::new(txn.file(TRANSACTION_PROPERTIES_KEY)?);
        Ok(ObjectLog { set, props })
    }

    /// Append `entry` unconditionally.
    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        self.set.insert(&entry.encode())?;
        Ok(())
    }

    /// Whether an entry with exactly these bytes exists.
    pub fn has(&mut self, entry: &LogEntry) -> Result<bool> {
        self.set.contains(&entry.encode())
    }

    fn has_prefix(&mut self, prefix: &[u8]) -> Result<bool> {
        Ok(self
            .set
            .tail_first(prefix)?
            .map(|rec| rec.starts_with(prefix))
            .unwrap_or(false))
    }

    /// Record an object insert/replace. Idempotent per `(class, object)`.
    pub fn log_object_change(&mut self, class: Reference, object: Reference) -> Result<()> {
        let entry = LogEntry::ObjectChange { class, object };
        if !self.has(&entry)? {
            self.append(&entry)?;
        }
        Ok(())
    }

    /// Record a data blob mutation. Idempotent per blob.
    pub fn log_data_change(&mut self, data_ref: Reference) -> Result<()> {
        let entry = LogEntry::DataChange { data_ref };
        if !self.has(&entry)? {
            self.append(&entry)?;
        }
        Ok(())
    }

    /// Record that a list changed. Idempotent per list.
    pub fn log_list_change(&mut self, list: Reference) -> Result<()> {
        let entry = LogEntry::ListChange { list };
        if !self.has(&entry)? {
            self.append(&entry)?;
        }
        Ok(())
    }

    /// Record a list addition. Multiplicity matters, so this always appends,
    /// and marks the list changed.
    pub fn log_list_add(
        &mut self,
        list: Reference,
        object: Reference,
        list_class: Reference,
    ) -> Result<()> {
        self.append(&LogEntry::ListAdd {
            list,
            object,
            list_class,
        })?;
        self.log_list_change(list)
    }

    /// Record a list removal. Always appends, and marks the list changed.
    pub fn log_list_remove(
        &mut self,
        list: Reference,
        object: Reference,
        list_class: Reference,
    ) -> Result<()> {
        self.append(&LogEntry::ListRemove {
            list,
            object,
            list_class,
        })?;
        self.log_list_change(list)
    }

    /// Record a resource key allocation.
    pub fn log_key_alloc(&mut self, key: StoreKey, reference: Reference) -> Result<()> {
        self.append(&LogEntry::KeyAlloc { key, reference })
    }

    /// Record a dictionary addition.
    pub fn log_dictionary_add(&mut self, reference: Reference) -> Result<()> {
        let entry = LogEntry::DictionaryAdd { reference };
        if !self.has(&entry)? {
            self.append(&entry)?;
        }
        Ok(())
    }

    /// Whether this transaction changed the object `(class, object)`.
    pub fn has_object_change(&mut self, class: Reference, object: Reference) -> Result<bool> {
        self.has(&LogEntry::ObjectChange { class, object })
    }

    /// Whether this transaction mutated the blob `data_ref`.
    pub fn has_data_change(&mut self, data_ref: Reference) -> Result<bool> {
        self.has(&LogEntry::DataChange { data_ref })
    }

    /// Whether this transaction changed the list `list`.
    pub fn has_list_change(&mut self, list: Reference) -> Result<bool> {
        self.has(&LogEntry::ListChange { list })
    }

    /// Whether this transaction allocated the storage key `key`, for any
    /// reference.
    pub fn has_key_alloc(&mut self, key: StoreKey) -> Result<bool> {
        let mut prefix = Vec::with_capacity(17);
        prefix.push(CODE_KEY_ALLOC);
        prefix.extend_from_slice(&key.to_tuple_bytes());
        self.has_prefix(&prefix)
    }

    /// All entries in log order.
    pub fn entries(&mut self) -> Result<Vec<LogEntry>> {
        self.set.iter_all()?.iter().map(|r| LogEntry::decode(r)).collect()
    }

    /// All entries of one kind, in log order.
    pub fn entries_of_kind(&mut self, code: u8) -> Result<Vec<LogEntry>> {
        self.set
            .iter_tail(&[code])?
            .iter()
            .take_while(|r| r.first() == Some(&code))
            .map(|r| LogEntry::decode(r))
            .collect()
    }

    /// Remove every entry and the base-root property.
    pub fn clear(&mut self) -> Result<()> {
        self.set.clear()?;
        self.props.remove(BASE_ROOT_PROPERTY)?;
        Ok(())
    }

    /// The proposal's base root, or `None` for an introduced proposal.
    pub fn base_root(&mut self) -> Result<Option<SnapshotAddress>> {
        match self.props.get(BASE_ROOT_PROPERTY)? {
            None => Ok(None),
            Some(v) if v == NO_BASE_ROOT => Ok(None),
            Some(v) => v
                .parse::<SnapshotAddress>()
                .map(Some)
                .map_err(|e| Error::Corruption(e.to_string())),
        }
    }

    /// Set or clear the base-root property.
    pub fn set_base_root(&mut self, root: Option<SnapshotAddress>) -> Result<()> {
        match root {
            Some(addr) => self.props.set(BASE_ROOT_PROPERTY, &addr.to_string()),
            None => self.props.set(BASE_ROOT_PROPERTY, NO_BASE_ROOT),
        }
    }
}
