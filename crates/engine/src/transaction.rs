//! Object transactions
//!
//! [`ObjectTransaction`] is the client API: it owns one substrate
//! transaction over its base snapshot, the object log recording its
//! logical effects, and the per-transaction caches. Objects, lists and
//! data blobs are handed out as handles that share the transaction
//! internals behind one lock; a transaction and its handles are meant to
//! be driven from one thread at a time.
//!
//! Committing flushes the log (stamping the base root) and the substrate
//! transaction, then hands the proposal to the [`CommitRouter`] (the
//! consensus engine), which serializes commits per path and either
//! publishes a merged snapshot or returns a `CommitFault`. Dropping a
//! transaction without committing discards it; nothing was published.

use std::cell::Cell;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use basalt_core::{
    validate_inline_string, ByteFile, CommitRouter, Error, Reference, Result, SnapshotAddress,
    StoreSession,
};

use crate::classes::{
    parse_field_type, FieldType, OdbClass, CLASS_LIST_REF, CLASS_LIST_TYPE_REF, NAMER_CLASS_REF,
    NAMER_LIST_REF, NAMER_LIST_TYPE_REF,
};
use crate::list::{
    list_insert, list_remove, list_remove_all, resolve_bounds, search_first,
    search_first_and_last, ListSpec, RefListFile, SearchKey,
};
use crate::log::ObjectLog;
use crate::object::{FieldValue, ObjectRecord};
use crate::registry::ClassCreator;
use crate::setup::check_magic;
use crate::view::{class_list_spec, namer_list_spec, StoreView};

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Accepting operations.
    Active,
    /// Successfully committed; no further operations.
    Committed,
    /// Rejected by a read-only violation; no further operations.
    Rejected,
    /// Invalidated (commit fault or explicit close).
    Finalized,
}

/// Identity of one list within a transaction: the instance, its type class
/// in the dictionary, its element class and its runtime order.
#[derive(Clone)]
pub(crate) struct ListInfo {
    pub list_ref: Reference,
    pub list_class: Reference,
    pub element_class: Reference,
    pub spec: ListSpec,
}

pub(crate) struct TxCore {
    pub view: StoreView,
    pub log: ObjectLog,
    pub status: TxStatus,
    pub read_only: bool,
    list_versions: FxHashMap<Reference, u64>,
}

impl TxCore {
    pub fn ensure_active(&self) -> Result<()> {
        match self.status {
            TxStatus::Active => Ok(()),
            other => Err(Error::InvalidState(format!(
                "Transaction is no longer active ({other:?})"
            ))),
        }
    }

    /// Gate every mutating entry point. A mutation attempt on a read-only
    /// transaction rejects the whole transaction.
    pub fn ensure_writable(&mut self) -> Result<()> {
        self.ensure_active()?;
        if self.read_only {
            self.status = TxStatus::Rejected;
            return Err(Error::ReadOnlyViolation);
        }
        Ok(())
    }

    pub fn list_version(&self, list: Reference) -> u64 {
        self.list_versions.get(&list).copied().unwrap_or(0)
    }

    fn bump_list(&mut self, list: Reference) {
        *self.list_versions.entry(list).or_insert(0) += 1;
    }

    /// Allocate a key for a fresh resource and log the allocation.
    pub fn allocate_resource(&mut self, reference: Reference) -> Result<basalt_core::StoreKey> {
        let key = self.view.allocate_key(reference)?;
        self.log.log_key_alloc(key, reference)?;
        Ok(key)
    }

    fn check_field_value(
        &mut self,
        class_name: &str,
        field: &crate::classes::FieldDef,
        ftype: &FieldType,
        value: FieldValue,
    ) -> Result<FieldValue> {
        let mismatch = |detail: String| Err(Error::TypeMismatch(detail));
        match ftype {
            FieldType::InlineString => match value {
                FieldValue::Null => Ok(FieldValue::Null),
                FieldValue::Str(s) => {
                    validate_inline_string(&s, self.view.limits())
                        .map_err(|e| Error::TypeMismatch(e.to_string()))?;
                    Ok(FieldValue::Str(s))
                }
                FieldValue::Ref(_) => mismatch(format!(
                    "Field {}.{} takes an inline string",
                    class_name, field.name
                )),
            },
            FieldType::Instance {
                class_name: declared_name,
                class_ref,
            } => match value {
                FieldValue::Null => Ok(FieldValue::Null),
                FieldValue::Ref(r) => {
                    let declared = class_ref.ok_or_else(|| {
                        Error::Corruption(format!(
                            "Unresolved class in field type {}",
                            field.type_code
                        ))
                    })?;
                    if !self.view.bucket(declared)?.contains(r)? {
                        return mismatch(format!(
                            "{r} is not an instance of {declared_name}"
                        ));
                    }
                    Ok(FieldValue::Ref(r))
                }
                FieldValue::Str(_) => mismatch(format!(
                    "Field {}.{} takes a {} reference",
                    class_name, field.name, declared_name
                )),
            },
            FieldType::ClassRef => match value {
                FieldValue::Null => Ok(FieldValue::Null),
                FieldValue::Ref(r) => match self.view.get_class(r) {
                    Ok(_) => Ok(FieldValue::Ref(r)),
                    Err(Error::NoSuchReference(_)) => {
                        mismatch(format!("{r} is not a class reference"))
                    }
                    Err(e) => Err(e),
                },
                FieldValue::Str(_) => mismatch(format!(
                    "Field {}.{} takes a class reference",
                    class_name, field.name
                )),
            },
            FieldType::Data | FieldType::List(_) => mismatch(format!(
                "Field {}.{} is a resource field; pass null and use the handle",
                class_name, field.name
            )),
        }
    }

    /// Build, type-check, allocate and insert one object.
    pub fn construct_object(
        &mut self,
        class: &OdbClass,
        reference: Option<Reference>,
        values: Vec<FieldValue>,
    ) -> Result<Reference> {
        if values.len() != class.fields.len() {
            return Err(Error::TypeMismatch(format!(
                "Class {} takes {} fields, got {}",
                class.name,
                class.fields.len(),
                values.len()
            )));
        }
        let obj_ref = reference.unwrap_or_else(Reference::generate);
        let mut content = Vec::with_capacity(values.len());
        for (field, value) in class.fields.iter().zip(values) {
            let ftype = parse_field_type(&field.type_code)?;
            let checked = match ftype {
                // Resource fields allocate their own sub-reference and key.
                FieldType::Data | FieldType::List(_) => match value {
                    FieldValue::Null => {
                        let sub = Reference::generate();
                        self.allocate_resource(sub)?;
                        FieldValue::Ref(sub)
                    }
                    _ => {
                        return Err(Error::TypeMismatch(format!(
                            "Field {}.{} is allocated automatically; pass null",
                            class.name, field.name
                        )))
                    }
                },
                other => self.check_field_value(&class.name, field, &other, value)?,
            };
            content.push(checked);
        }
        let record = ObjectRecord::new(obj_ref, content).encode()?;
        self.view.bucket(class.reference)?.insert(&record)?;
        self.log.log_object_change(class.reference, obj_ref)?;
        Ok(obj_ref)
    }

    pub fn read_record(&mut self, class_ref: Reference, obj_ref: Reference) -> Result<ObjectRecord> {
        let record = self
            .view
            .bucket(class_ref)?
            .get(obj_ref)?
            .ok_or(Error::NoSuchReference(obj_ref))?;
        ObjectRecord::decode(&record)
    }

    pub fn set_field(
        &mut self,
        class_ref: Reference,
        obj_ref: Reference,
        field: &str,
        value: FieldValue,
    ) -> Result<()> {
        let class = self.view.get_class(class_ref)?;
        let idx = class.field_index(field).ok_or_else(|| {
            Error::TypeMismatch(format!("Class {} has no field {field:?}", class.name))
        })?;
        let fd = &class.fields[idx];
        if !fd.mutable {
            return Err(Error::TypeMismatch(format!(
                "Field {}.{} is immutable",
                class.name, fd.name
            )));
        }
        let ftype = parse_field_type(&fd.type_code)?;
        let checked = self.check_field_value(&class.name, fd, &ftype, value)?;

        let mut bucket = self.view.bucket(class_ref)?;
        let record = bucket
            .get(obj_ref)?
            .ok_or(Error::NoSuchReference(obj_ref))?;
        let mut decoded = ObjectRecord::decode(&record)?;
        decoded.values[idx] = checked;
        bucket.replace(&decoded.encode()?)?;
        self.log.log_object_change(class_ref, obj_ref)?;
        Ok(())
    }

    /// Resolve the list behind an object field.
    pub fn list_info(
        &mut self,
        class_ref: Reference,
        obj_ref: Reference,
        field: &str,
    ) -> Result<ListInfo> {
        let class = self.view.get_class(class_ref)?;
        let idx = class.field_index(field).ok_or_else(|| {
            Error::TypeMismatch(format!("Class {} has no field {field:?}", class.name))
        })?;
        let fd = &class.fields[idx];
        let FieldType::List(type_spec) = parse_field_type(&fd.type_code)? else {
            return Err(Error::TypeMismatch(format!(
                "Field {}.{} is not a list",
                class.name, fd.name
            )));
        };
        let record = self.read_record(class_ref, obj_ref)?;
        let Some(FieldValue::Ref(list_ref)) = record.values.get(idx) else {
            return Err(Error::Corruption(format!(
                "List field {}.{} of {obj_ref} holds no reference",
                class.name, fd.name
            )));
        };
        let type_code = type_spec.to_code();
        let list_class = self
            .view
            .dictionary()?
            .get_ref(&type_code)?
            .ok_or_else(|| {
                Error::Corruption(format!("List type {type_code:?} missing from dictionary"))
            })?;
        let element_class = type_spec.element_ref.ok_or_else(|| {
            Error::Corruption(format!("Unresolved element class in {type_code:?}"))
        })?;
        let spec = self.view.list_spec_for(&type_spec)?;
        Ok(ListInfo {
            list_ref: *list_ref,
            list_class,
            element_class,
            spec,
        })
    }

    /// Resolve the data blob behind an object field.
    pub fn data_ref(
        &mut self,
        class_ref: Reference,
        obj_ref: Reference,
        field: &str,
    ) -> Result<Reference> {
        let class = self.view.get_class(class_ref)?;
        let idx = class.field_index(field).ok_or_else(|| {
            Error::TypeMismatch(format!("Class {} has no field {field:?}", class.name))
        })?;
        let fd = &class.fields[idx];
        if !matches!(parse_field_type(&fd.type_code)?, FieldType::Data) {
            return Err(Error::TypeMismatch(format!(
                "Field {}.{} is not a data blob",
                class.name, fd.name
            )));
        }
        let record = self.read_record(class_ref, obj_ref)?;
        match record.values.get(idx) {
            Some(FieldValue::Ref(r)) => Ok(*r),
            _ => Err(Error::Corruption(format!(
                "Data field {}.{} of {obj_ref} holds no reference",
                class.name, fd.name
            ))),
        }
    }

    pub fn open_list_file(&mut self, list_ref: Reference) -> Result<RefListFile> {
        let key = self.view.resolve_key(list_ref)?;
        Ok(RefListFile::new(self.view.store().file(key)?))
    }

    pub fn open_data_file(&mut self, data_ref: Reference) -> Result<Box<dyn ByteFile>> {
        let key = self.view.resolve_key(data_ref)?;
        self.view.store().file(key)
    }

    /// Add `element` to the list, logging the effect.
    pub fn list_add(&mut self, info: &ListInfo, element: Reference) -> Result<()> {
        if !self.view.bucket(info.element_class)?.contains(element)? {
            return Err(Error::TypeMismatch(format!(
                "{element} is not an instance of the list's element class"
            )));
        }
        let mut file = self.open_list_file(info.list_ref)?;
        list_insert(&mut file, &info.spec, &mut self.view, element)?;
        self.log
            .log_list_add(info.list_ref, element, info.list_class)?;
        self.bump_list(info.list_ref);
        Ok(())
    }

    /// Remove the first entry for `element`, logging the effect.
    pub fn list_remove(&mut self, info: &ListInfo, element: Reference) -> Result<bool> {
        let mut file = self.open_list_file(info.list_ref)?;
        if !list_remove(&mut file, &info.spec, &mut self.view, element)? {
            return Ok(false);
        }
        self.log
            .log_list_remove(info.list_ref, element, info.list_class)?;
        self.bump_list(info.list_ref);
        Ok(true)
    }

    /// Remove every entry for `element`, logging each removal.
    pub fn list_remove_all(&mut self, info: &ListInfo, element: Reference) -> Result<u64> {
        let mut file = self.open_list_file(info.list_ref)?;
        let removed = list_remove_all(&mut file, &info.spec, &mut self.view, element)?;
        for r in &removed {
            self.log.log_list_remove(info.list_ref, *r, info.list_class)?;
        }
        if !removed.is_empty() {
            self.bump_list(info.list_ref);
        }
        Ok(removed.len() as u64)
    }

    pub(crate) fn namer_list_info() -> ListInfo {
        ListInfo {
            list_ref: NAMER_LIST_REF,
            list_class: NAMER_LIST_TYPE_REF,
            element_class: NAMER_CLASS_REF,
            spec: namer_list_spec(),
        }
    }

    pub(crate) fn class_list_info() -> ListInfo {
        ListInfo {
            list_ref: CLASS_LIST_REF,
            list_class: CLASS_LIST_TYPE_REF,
            element_class: crate::classes::CLASS_CLASS_REF,
            spec: class_list_spec(),
        }
    }

    /// The `$Namer` instance bound to `name`, if any.
    fn named_ref(&mut self, name: &str) -> Result<Option<Reference>> {
        let mut file = self.open_list_file(NAMER_LIST_REF)?;
        let pos = search_first(
            &mut file,
            &namer_list_spec(),
            &mut self.view,
            SearchKey::Key(name),
        )?;
        if pos < 0 {
            return Ok(None);
        }
        Ok(Some(file.get(pos as u64)?))
    }

    pub fn add_named_item(
        &mut self,
        name: &str,
        class_ref: Reference,
        obj_ref: Reference,
    ) -> Result<()> {
        if self.named_ref(name)?.is_some() {
            return Err(Error::ConstraintViolation(format!(
                "Named item {name:?} already exists"
            )));
        }
        let namer = self.construct_object(
            &crate::classes::NAMER_CLASS,
            None,
            vec![
                FieldValue::Str(name.to_string()),
                FieldValue::Str(class_ref.to_string()),
                FieldValue::Str(obj_ref.to_string()),
            ],
        )?;
        self.list_add(&Self::namer_list_info(), namer)
    }

    pub fn remove_named_item(&mut self, name: &str) -> Result<bool> {
        let Some(namer) = self.named_ref(name)? else {
            return Ok(false);
        };
        // The namer object itself stays behind as garbage until collected;
        // removal from the list unbinds the name.
        self.list_remove(&Self::namer_list_info(), namer)
    }

    pub fn get_named_item(&mut self, name: &str) -> Result<Option<(Reference, Reference)>> {
        let Some(namer) = self.named_ref(name)? else {
            return Ok(None);
        };
        let record = self.read_record(NAMER_CLASS_REF, namer)?;
        let (Some(FieldValue::Str(class_str)), Some(FieldValue::Str(ref_str))) =
            (record.values.get(1), record.values.get(2))
        else {
            return Err(Error::Corruption(format!(
                "Malformed namer record for {name:?}"
            )));
        };
        let class_ref = class_str
            .parse::<Reference>()
            .map_err(|e| Error::Corruption(e.to_string()))?;
        let obj_ref = ref_str
            .parse::<Reference>()
            .map_err(|e| Error::Corruption(e.to_string()))?;
        Ok(Some((class_ref, obj_ref)))
    }
}

/// A snapshot-isolated transaction over one object database path.
pub struct ObjectTransaction {
    core: Arc<Mutex<TxCore>>,
    session: Arc<dyn StoreSession>,
    router: Arc<dyn CommitRouter>,
    base_root: SnapshotAddress,
}

impl ObjectTransaction {
    fn new(
        session: Arc<dyn StoreSession>,
        router: Arc<dyn CommitRouter>,
        read_only: bool,
        limits: basalt_core::Limits,
    ) -> Result<Self> {
        let base_root = session.current_snapshot()?;
        let store = session.create_transaction(base_root)?;
        check_magic(store.as_ref())?;
        let log = ObjectLog::open(store.as_ref())?;
        let view = StoreView::with_limits(store, limits);
        Ok(ObjectTransaction {
            core: Arc::new(Mutex::new(TxCore {
                view,
                log,
                status: TxStatus::Active,
                read_only,
                list_versions: FxHashMap::default(),
            })),
            session,
            router,
            base_root,
        })
    }

    /// Open a read-write transaction on the session's current snapshot.
    pub fn open(session: Arc<dyn StoreSession>, router: Arc<dyn CommitRouter>) -> Result<Self> {
        Self::new(session, router, false, basalt_core::Limits::default())
    }

    /// Open a read-write transaction with custom limits.
    pub fn open_with_limits(
        session: Arc<dyn StoreSession>,
        router: Arc<dyn CommitRouter>,
        limits: basalt_core::Limits,
    ) -> Result<Self> {
        Self::new(session, router, false, limits)
    }

    /// Open a read-only transaction. Every mutating entry point fails with
    /// `ReadOnlyViolation` and rejects the transaction.
    pub fn open_read_only(
        session: Arc<dyn StoreSession>,
        router: Arc<dyn CommitRouter>,
    ) -> Result<Self> {
        Self::new(session, router, true, basalt_core::Limits::default())
    }

    /// The path this transaction operates on.
    pub fn path_name(&self) -> String {
        self.session.path_name().to_string()
    }

    /// The snapshot this transaction reads from.
    pub fn base_root(&self) -> SnapshotAddress {
        self.base_root
    }

    /// Whether this transaction rejects mutations.
    pub fn is_read_only(&self) -> bool {
        self.core.lock().read_only
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TxStatus {
        self.core.lock().status
    }

    /// Start a batch of class definitions.
    pub fn class_creator(&self) -> ClassCreator {
        ClassCreator::new(Arc::clone(&self.core))
    }

    /// Look a class up by name.
    pub fn find_class(&self, name: &str) -> Result<Option<OdbClass>> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        Ok(core.view.find_class(name)?.map(|c| (*c).clone()))
    }

    /// Load a class by reference.
    pub fn get_class(&self, reference: Reference) -> Result<OdbClass> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        core.view
            .get_class(reference)
            .map(|c| (*c).clone())
            .map_err(Error::into_public)
    }

    /// Construct an object of `class` with a fresh reference.
    pub fn construct_object(
        &self,
        class: &OdbClass,
        values: Vec<FieldValue>,
    ) -> Result<OdbObject> {
        self.construct_object_inner(class, None, values)
    }

    /// Construct an object at a caller-supplied reference.
    pub fn construct_object_at(
        &self,
        class: &OdbClass,
        reference: Reference,
        values: Vec<FieldValue>,
    ) -> Result<OdbObject> {
        self.construct_object_inner(class, Some(reference), values)
    }

    fn construct_object_inner(
        &self,
        class: &OdbClass,
        reference: Option<Reference>,
        values: Vec<FieldValue>,
    ) -> Result<OdbObject> {
        let mut core = self.core.lock();
        core.ensure_writable()?;
        let obj_ref = core.construct_object(class, reference, values)?;
        Ok(OdbObject {
            core: Arc::clone(&self.core),
            class: class.reference,
            reference: obj_ref,
        })
    }

    /// Fetch an existing object of `class` by reference.
    pub fn get_object(&self, class: &OdbClass, reference: Reference) -> Result<OdbObject> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        if !core.view.bucket(class.reference)?.contains(reference)? {
            return Err(Error::NoSuchReference(reference));
        }
        Ok(OdbObject {
            core: Arc::clone(&self.core),
            class: class.reference,
            reference,
        })
    }

    /// Bind `name` to `object` as a graph root.
    pub fn add_named_item(&self, name: &str, object: &OdbObject) -> Result<()> {
        let mut core = self.core.lock();
        core.ensure_writable()?;
        core.add_named_item(name, object.class, object.reference)
    }

    /// Unbind `name`. Returns whether a binding existed.
    pub fn remove_named_item(&self, name: &str) -> Result<bool> {
        let mut core = self.core.lock();
        core.ensure_writable()?;
        core.remove_named_item(name)
    }

    /// Resolve a graph root by name.
    pub fn get_named_item(&self, name: &str) -> Result<Option<OdbObject>> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        let Some((class_ref, obj_ref)) = core.get_named_item(name)? else {
            return Ok(None);
        };
        if !core.view.bucket(class_ref)?.contains(obj_ref)? {
            return Err(Error::NoSuchReference(obj_ref));
        }
        Ok(Some(OdbObject {
            core: Arc::clone(&self.core),
            class: class_ref,
            reference: obj_ref,
        }))
    }

    /// The system class list, ordered by class name.
    pub fn class_names_list(&self) -> OdbList {
        OdbList::new(Arc::clone(&self.core), TxCore::class_list_info())
    }

    /// The named items list, ordered by item name.
    pub fn named_items_list(&self) -> OdbList {
        OdbList::new(Arc::clone(&self.core), TxCore::namer_list_info())
    }

    /// Garbage collection of unreachable objects is not implemented; the
    /// interface exists for embedders that schedule it. Always returns
    /// `false` (nothing collected).
    pub fn do_garbage_collection(&self) -> Result<bool> {
        self.core.lock().ensure_active()?;
        Ok(false)
    }

    /// Commit: flush the object log and the substrate transaction, then
    /// route the proposal through the consensus engine.
    ///
    /// On success the transaction is `Committed` and the published snapshot
    /// address is returned. A `CommitFault` invalidates the transaction;
    /// the caller retries against a fresh snapshot by opening a new one.
    pub fn commit(self) -> Result<SnapshotAddress> {
        {
            let mut core = self.core.lock();
            core.ensure_active()?;
            if core.read_only {
                core.status = TxStatus::Rejected;
                return Err(Error::ReadOnlyViolation);
            }
            core.log.set_base_root(Some(self.base_root))?;
        }
        let proposal = self.core.lock().view.flush()?;
        debug!(
            path = self.session.path_name(),
            base = %self.base_root,
            %proposal,
            "flushed proposal; entering commit"
        );
        match self.router.perform_commit(self.session.as_ref(), proposal) {
            Ok(published) => {
                self.core.lock().status = TxStatus::Committed;
                Ok(published)
            }
            Err(e) => {
                if e.is_commit_fault() {
                    self.core.lock().status = TxStatus::Finalized;
                }
                Err(e)
            }
        }
    }
}

/// Handle to one object within a transaction.
#[derive(Clone)]
pub struct OdbObject {
    core: Arc<Mutex<TxCore>>,
    class: Reference,
    reference: Reference,
}

impl std::fmt::Debug for OdbObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OdbObject")
            .field("class", &self.class)
            .field("reference", &self.reference)
            .finish()
    }
}

impl OdbObject {
    /// The object's reference.
    pub fn reference(&self) -> Reference {
        self.reference
    }

    /// The object's class reference.
    pub fn class_ref(&self) -> Reference {
        self.class
    }

    fn field_index(core: &mut TxCore, class: Reference, field: &str) -> Result<usize> {
        let class = core.view.get_class(class)?;
        class.field_index(field).ok_or_else(|| {
            Error::TypeMismatch(format!("Class {} has no field {field:?}", class.name))
        })
    }

    /// The raw value of `field`.
    pub fn get(&self, field: &str) -> Result<FieldValue> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        let idx = Self::field_index(&mut core, self.class, field)?;
        let record = core.read_record(self.class, self.reference)?;
        record.values.get(idx).cloned().ok_or_else(|| {
            Error::Corruption(format!("Object {} is missing field {idx}", self.reference))
        })
    }

    /// The string value of `field` (`None` when null).
    pub fn get_string(&self, field: &str) -> Result<Option<String>> {
        match self.get(field)? {
            FieldValue::Null => Ok(None),
            FieldValue::Str(s) => Ok(Some(s)),
            FieldValue::Ref(_) => Err(Error::TypeMismatch(format!(
                "Field {field:?} holds a reference, not a string"
            ))),
        }
    }

    /// The reference value of `field` (`None` when null).
    pub fn get_reference(&self, field: &str) -> Result<Option<Reference>> {
        match self.get(field)? {
            FieldValue::Null => Ok(None),
            FieldValue::Ref(r) => Ok(Some(r)),
            FieldValue::Str(_) => Err(Error::TypeMismatch(format!(
                "Field {field:?} holds a string, not a reference"
            ))),
        }
    }

    /// Dereference an instance field into an object handle.
    pub fn get_object(&self, field: &str) -> Result<Option<OdbObject>> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        let class = core.view.get_class(self.class)?;
        let idx = class.field_index(field).ok_or_else(|| {
            Error::TypeMismatch(format!("Class {} has no field {field:?}", class.name))
        })?;
        let FieldType::Instance {
            class_ref: Some(declared),
            ..
        } = parse_field_type(&class.fields[idx].type_code)?
        else {
            return Err(Error::TypeMismatch(format!(
                "Field {}.{} is not an instance reference",
                class.name, field
            )));
        };
        let record = core.read_record(self.class, self.reference)?;
        match record.values.get(idx) {
            Some(FieldValue::Ref(r)) => Ok(Some(OdbObject {
                core: Arc::clone(&self.core),
                class: declared,
                reference: *r,
            })),
            Some(FieldValue::Null) => Ok(None),
            _ => Err(Error::Corruption(format!(
                "Instance field {}.{} holds a non-reference",
                class.name, field
            ))),
        }
    }

    /// Set any field value; the field must be mutable and admit the value.
    pub fn set(&self, field: &str, value: FieldValue) -> Result<()> {
        let mut core = self.core.lock();
        core.ensure_writable()?;
        core.set_field(self.class, self.reference, field, value)
    }

    /// Set a string field.
    pub fn set_string(&self, field: &str, value: &str) -> Result<()> {
        self.set(field, FieldValue::Str(value.to_string()))
    }

    /// Set a reference field.
    pub fn set_reference(&self, field: &str, value: Reference) -> Result<()> {
        self.set(field, FieldValue::Ref(value))
    }

    /// Null a field out.
    pub fn set_null(&self, field: &str) -> Result<()> {
        self.set(field, FieldValue::Null)
    }

    /// Open the ordered list behind `field`.
    pub fn get_list(&self, field: &str) -> Result<OdbList> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        let info = core.list_info(self.class, self.reference, field)?;
        Ok(OdbList::new(Arc::clone(&self.core), info))
    }

    /// Open the data blob behind `field`.
    pub fn get_data(&self, field: &str) -> Result<OdbData> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        let data_ref = core.data_ref(self.class, self.reference, field)?;
        Ok(OdbData {
            core: Arc::clone(&self.core),
            reference: data_ref,
            pos: 0,
        })
    }
}

/// Handle to one ordered reference list (or a bounded view of it).
///
/// Views share the backing file; bounds clamp to the parent view. Cached
/// view positions are invalidated through a per-list version counter, so a
/// mutation through any handle is seen by all of them.
pub struct OdbList {
    core: Arc<Mutex<TxCore>>,
    info: ListInfo,
    lowers: Vec<String>,
    uppers: Vec<String>,
    cached_range: Cell<Option<(u64, u64, u64)>>,
}

impl OdbList {
    pub(crate) fn new(core: Arc<Mutex<TxCore>>, info: ListInfo) -> Self {
        OdbList {
            core,
            info,
            lowers: Vec::new(),
            uppers: Vec::new(),
            cached_range: Cell::new(None),
        }
    }

    /// The list instance's reference.
    pub fn reference(&self) -> Reference {
        self.info.list_ref
    }

    fn derive(&self, lower: Option<&str>, upper: Option<&str>) -> OdbList {
        let mut lowers = self.lowers.clone();
        let mut uppers = self.uppers.clone();
        lowers.extend(lower.map(str::to_string));
        uppers.extend(upper.map(str::to_string));
        OdbList {
            core: Arc::clone(&self.core),
            info: self.info.clone(),
            lowers,
            uppers,
            cached_range: Cell::new(None),
        }
    }

    /// View of entries with keys in `[lower, upper)`.
    pub fn sub(&self, lower: &str, upper: &str) -> OdbList {
        self.derive(Some(lower), Some(upper))
    }

    /// View of entries with keys before `upper`.
    pub fn head(&self, upper: &str) -> OdbList {
        self.derive(None, Some(upper))
    }

    /// View of entries with keys at or after `lower`.
    pub fn tail(&self, lower: &str) -> OdbList {
        self.derive(Some(lower), None)
    }

    fn range(&self, core: &mut TxCore) -> Result<(u64, u64)> {
        let version = core.list_version(self.info.list_ref);
        if let Some((v, s, e)) = self.cached_range.get() {
            if v == version {
                return Ok((s, e));
            }
        }
        let mut file = core.open_list_file(self.info.list_ref)?;
        let mut start = 0u64;
        let mut end = file.len();
        for lb in &self.lowers {
            let (s, _) = resolve_bounds(
                &mut file,
                &self.info.spec,
                &mut core.view,
                Some(SearchKey::Key(lb)),
                None,
            )?;
            start = start.max(s);
        }
        for ub in &self.uppers {
            let (_, e) = resolve_bounds(
                &mut file,
                &self.info.spec,
                &mut core.view,
                None,
                Some(SearchKey::Key(ub)),
            )?;
            end = end.min(e);
        }
        let end = end.max(start);
        self.cached_range.set(Some((version, start, end)));
        Ok((start, end))
    }

    /// Number of entries in this view.
    pub fn len(&self) -> Result<u64> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        let (start, end) = self.range(&mut core)?;
        Ok(end - start)
    }

    /// Whether this view is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The entries of this view, in list order.
    pub fn references(&self) -> Result<Vec<Reference>> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        let (start, end) = self.range(&mut core)?;
        let mut file = core.open_list_file(self.info.list_ref)?;
        file.iter_range(start, end)
    }

    /// The entries of this view as object handles.
    pub fn objects(&self) -> Result<Vec<OdbObject>> {
        Ok(self
            .references()?
            .into_iter()
            .map(|r| OdbObject {
                core: Arc::clone(&self.core),
                class: self.info.element_class,
                reference: r,
            })
            .collect())
    }

    /// The entry at position `idx` of this view.
    pub fn get_at(&self, idx: u64) -> Result<Option<Reference>> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        let (start, end) = self.range(&mut core)?;
        if start + idx >= end {
            return Ok(None);
        }
        let mut file = core.open_list_file(self.info.list_ref)?;
        file.get(start + idx).map(Some)
    }

    /// First entry of this view.
    pub fn first(&self) -> Result<Option<Reference>> {
        self.get_at(0)
    }

    /// Last entry of this view.
    pub fn last(&self) -> Result<Option<Reference>> {
        let len = self.len()?;
        if len == 0 {
            return Ok(None);
        }
        self.get_at(len - 1)
    }

    fn find_exact(&self, core: &mut TxCore, element: Reference) -> Result<Option<u64>> {
        let (start, end) = self.range(core)?;
        let mut file = core.open_list_file(self.info.list_ref)?;
        let (first, last) = search_first_and_last(
            &mut file,
            &self.info.spec,
            &mut core.view,
            SearchKey::Ref(element),
        )?;
        if first < 0 {
            return Ok(None);
        }
        for idx in first as u64..=last as u64 {
            if idx >= start && idx < end && file.get(idx)? == element {
                return Ok(Some(idx - start));
            }
        }
        Ok(None)
    }

    /// Position of `element` within this view.
    pub fn index_of(&self, element: Reference) -> Result<Option<u64>> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        self.find_exact(&mut core, element)
    }

    /// Whether `element` is in this view.
    pub fn contains(&self, element: Reference) -> Result<bool> {
        Ok(self.index_of(element)?.is_some())
    }

    /// Position of the first entry with key `key` within this view. Only
    /// valid on keyed lists.
    pub fn index_of_key(&self, key: &str) -> Result<Option<u64>> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        let (start, end) = self.range(&mut core)?;
        let mut file = core.open_list_file(self.info.list_ref)?;
        let pos = search_first(
            &mut file,
            &self.info.spec,
            &mut core.view,
            SearchKey::Key(key),
        )?;
        if pos < 0 {
            return Ok(None);
        }
        let pos = pos as u64;
        if pos < start || pos >= end {
            return Ok(None);
        }
        Ok(Some(pos - start))
    }

    /// Whether an entry with key `key` is in this view.
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.index_of_key(key)?.is_some())
    }

    /// The first object with key `key` in this view.
    pub fn get_by_key(&self, key: &str) -> Result<Option<OdbObject>> {
        let Some(idx) = self.index_of_key(key)? else {
            return Ok(None);
        };
        let Some(reference) = self.get_at(idx)? else {
            return Ok(None);
        };
        Ok(Some(OdbObject {
            core: Arc::clone(&self.core),
            class: self.info.element_class,
            reference,
        }))
    }

    /// Add an object to the list. Fails with `ConstraintViolation` on a
    /// duplicate key in a unique list.
    pub fn add(&self, object: &OdbObject) -> Result<()> {
        self.add_ref(object.reference)
    }

    /// Add by raw reference.
    pub fn add_ref(&self, element: Reference) -> Result<()> {
        let mut core = self.core.lock();
        core.ensure_writable()?;
        core.list_add(&self.info, element)
    }

    /// Remove the first entry for `element`. Returns whether one existed.
    pub fn remove(&self, element: Reference) -> Result<bool> {
        let mut core = self.core.lock();
        core.ensure_writable()?;
        core.list_remove(&self.info, element)
    }

    /// Remove every entry for `element`, returning how many were removed.
    pub fn remove_all(&self, element: Reference) -> Result<u64> {
        let mut core = self.core.lock();
        core.ensure_writable()?;
        core.list_remove_all(&self.info, element)
    }
}

/// Handle to one data blob, with a positioned cursor.
pub struct OdbData {
    core: Arc<Mutex<TxCore>>,
    reference: Reference,
    pos: u64,
}

impl OdbData {
    /// The blob's reference.
    pub fn reference(&self) -> Reference {
        self.reference
    }

    /// Size of the blob in bytes.
    pub fn size(&self) -> Result<u64> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        Ok(core.open_data_file(self.reference)?.size())
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Move the cursor.
    pub fn set_position(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Truncate or zero-extend the blob.
    pub fn set_size(&mut self, size: u64) -> Result<()> {
        let mut core = self.core.lock();
        core.ensure_writable()?;
        core.open_data_file(self.reference)?.set_size(size)?;
        core.log.log_data_change(self.reference)
    }

    /// Read exactly `buf.len()` bytes at the cursor.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        let mut file = core.open_data_file(self.reference)?;
        file.set_position(self.pos);
        file.read_exact(buf)?;
        self.pos = file.position();
        Ok(())
    }

    /// The whole blob content.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut core = self.core.lock();
        core.ensure_active()?;
        let mut file = core.open_data_file(self.reference)?;
        crate::file_io::read_all(file.as_mut())
    }

    /// Write `buf` at the cursor, growing the blob as needed.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        let mut core = self.core.lock();
        core.ensure_writable()?;
        let mut file = core.open_data_file(self.reference)?;
        file.set_position(self.pos);
        file.write_all(buf)?;
        self.pos = file.position();
        core.log.log_data_change(self.reference)
    }
}
