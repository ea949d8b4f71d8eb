//! Resolution layer over one substrate transaction
//!
//! [`StoreView`] bundles a substrate transaction with the lookups every
//! higher operation needs: reference-to-key resolution (with the system
//! bypass for the fixed buckets and lists), class loading from the system
//! bucket, the class dictionary, and key allocation from the stride
//! counter. Resolved classes and keys are memoized per view; views are
//! never shared between transactions.
//!
//! Both the client transaction and the consensus merge work through a
//! `StoreView`: the transaction over its base snapshot, the merge over the
//! current snapshot it is building the merged state in.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use basalt_core::key::{DICTIONARY_KEY, KEY_COUNTER_KEY, REF_LOOKUP_KEY, SYSTEM_CLASS_LIST_KEY};
use basalt_core::{
    Error, Limits, Reference, Result, SnapshotAddress, StoreKey, StoreTransaction,
};

use crate::bucket::ObjectBucket;
use crate::classes::{
    system_key_for, ClassSource, ListTypeSpec, OdbClass, CLASS_CLASS, CLASS_CLASS_REF,
    NAMER_CLASS, NAMER_CLASS_REF,
};
use crate::dictionary::ClassDictionary;
use crate::list::{
    search_first, ElementKeyReader, ListOrder, ListSpec, RefListFile, SearchKey,
};
use crate::lookup::{random_stride, KeyCounter, RefLookup};
use crate::object::{FieldValue, ObjectRecord};

/// The order spec of the system class list (by `$Class.name`, unique).
pub fn class_list_spec() -> ListSpec {
    ListSpec {
        order: ListOrder::ByKeyField {
            element_class: CLASS_CLASS_REF,
            field_index: 0,
            descending: false,
        },
        allow_duplicates: false,
    }
}

/// The order spec of the system namer list (by `$Namer.name`, unique).
pub fn namer_list_spec() -> ListSpec {
    ListSpec {
        order: ListOrder::ByKeyField {
            element_class: NAMER_CLASS_REF,
            field_index: 0,
            descending: false,
        },
        allow_duplicates: false,
    }
}

/// A memoizing resolution layer over one substrate transaction.
pub struct StoreView {
    store: Box<dyn StoreTransaction>,
    limits: Limits,
    class_cache: FxHashMap<Reference, Arc<OdbClass>>,
    class_name_cache: FxHashMap<String, Reference>,
    key_cache: FxHashMap<Reference, StoreKey>,
}

impl StoreView {
    /// Wrap a substrate transaction with default limits.
    pub fn new(store: Box<dyn StoreTransaction>) -> Self {
        Self::with_limits(store, Limits::default())
    }

    /// Wrap a substrate transaction with custom limits.
    pub fn with_limits(store: Box<dyn StoreTransaction>, limits: Limits) -> Self {
        StoreView {
            store,
            limits,
            class_cache: FxHashMap::default(),
            class_name_cache: FxHashMap::default(),
            key_cache: FxHashMap::default(),
        }
    }

    /// The wrapped substrate transaction.
    pub fn store(&self) -> &dyn StoreTransaction {
        self.store.as_ref()
    }

    /// The configured limits.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Flush the substrate transaction into a proposal snapshot.
    pub fn flush(&mut self) -> Result<SnapshotAddress> {
        self.store.flush()
    }

    /// The reference-to-key lookup table.
    pub fn lookup(&self) -> Result<RefLookup> {
        Ok(RefLookup::new(self.store.file(REF_LOOKUP_KEY)?))
    }

    /// The key counter.
    pub fn counter(&self) -> Result<KeyCounter> {
        Ok(KeyCounter::new(self.store.file(KEY_COUNTER_KEY)?))
    }

    /// The class dictionary.
    pub fn dictionary(&self) -> Result<ClassDictionary> {
        Ok(ClassDictionary::new(self.store.file(DICTIONARY_KEY)?))
    }

    /// Resolve a reference to its storage key. System references bypass the
    /// lookup table; everything else misses with `UnresolvedReference`.
    pub fn resolve_key(&mut self, reference: Reference) -> Result<StoreKey> {
        if let Some(key) = system_key_for(reference) {
            return Ok(key);
        }
        if let Some(key) = self.key_cache.get(&reference) {
            return Ok(*key);
        }
        let key = self.lookup()?.resolve(reference)?;
        self.key_cache.insert(reference, key);
        Ok(key)
    }

    /// Bind `reference` to `key` in the lookup table (and the cache).
    pub fn bind_key(&mut self, reference: Reference, key: StoreKey) -> Result<()> {
        self.lookup()?.insert(reference, key)?;
        self.key_cache.insert(reference, key);
        Ok(())
    }

    /// Allocate a fresh storage key for `reference`: advance the counter by
    /// a random stride and bind the derived key.
    pub fn allocate_key(&mut self, reference: Reference) -> Result<StoreKey> {
        let stride = random_stride(self.limits.max_key_stride);
        let key = self.counter()?.allocate(stride)?;
        self.bind_key(reference, key)?;
        Ok(key)
    }

    /// Open the instance bucket of `class_ref`.
    pub fn bucket(&mut self, class_ref: Reference) -> Result<ObjectBucket> {
        let key = self.resolve_key(class_ref)?;
        Ok(ObjectBucket::new(self.store.file(key)?))
    }

    /// Load a class definition by reference.
    pub fn get_class(&mut self, reference: Reference) -> Result<Arc<OdbClass>> {
        if let Some(class) = self.class_cache.get(&reference) {
            return Ok(Arc::clone(class));
        }
        let class = if reference == CLASS_CLASS_REF {
            CLASS_CLASS.clone()
        } else if reference == NAMER_CLASS_REF {
            NAMER_CLASS.clone()
        } else {
            let mut bucket = self.bucket(CLASS_CLASS_REF)?;
            let record = bucket
                .get(reference)?
                .ok_or(Error::NoSuchReference(reference))?;
            let decoded = ObjectRecord::decode(&record)?;
            let (Some(FieldValue::Str(name)), Some(FieldValue::Str(schema))) =
                (decoded.values.first(), decoded.values.get(1))
            else {
                return Err(Error::Corruption(format!(
                    "Malformed class record at {reference}"
                )));
            };
            OdbClass::from_schema(name.clone(), reference, ClassSource::User, schema)?
        };
        let class = Arc::new(class);
        self.class_name_cache
            .insert(class.name.clone(), reference);
        self.class_cache.insert(reference, Arc::clone(&class));
        Ok(class)
    }

    /// Look a class up by name through the system class list.
    pub fn find_class(&mut self, name: &str) -> Result<Option<Arc<OdbClass>>> {
        if let Some(reference) = self.class_name_cache.get(name) {
            let reference = *reference;
            return self.get_class(reference).map(Some);
        }
        let mut file = RefListFile::new(self.store.file(SYSTEM_CLASS_LIST_KEY)?);
        let spec = class_list_spec();
        let pos = search_first(&mut file, &spec, self, SearchKey::Key(name))?;
        if pos < 0 {
            return Ok(None);
        }
        let reference = file.get(pos as u64)?;
        self.get_class(reference).map(Some)
    }

    /// Register a freshly defined class in the memoization caches.
    pub fn cache_class(&mut self, class: Arc<OdbClass>) {
        self.class_name_cache
            .insert(class.name.clone(), class.reference);
        self.class_cache.insert(class.reference, class);
    }

    /// Build the runtime order spec for a list type code, resolving the
    /// element class.
    pub fn list_spec_for(&mut self, type_spec: &ListTypeSpec) -> Result<ListSpec> {
        let element_ref = type_spec.element_ref.ok_or_else(|| {
            Error::Corruption(format!(
                "Unresolved element class in list type {}",
                type_spec.to_code()
            ))
        })?;
        let element_class = self.get_class(element_ref)?;
        ListSpec::from_type(type_spec, &element_class)
    }
}

impl ElementKeyReader for StoreView {
    fn element_key(
        &mut self,
        element_class: Reference,
        field_index: usize,
        reference: Reference,
    ) -> Result<String> {
        let mut bucket = self.bucket(element_class)?;
        let record = bucket
            .get(reference)?
            .ok_or(Error::NoSuchReference(reference))?;
        let decoded = ObjectRecord::decode(&record)?;
        match decoded.values.get(field_index) {
            Some(FieldValue::Str(s)) => Ok(s.clone()),
            Some(FieldValue::Null) => Ok(String::new()),
            _ => Err(Error::Corruption(format!(
                "List key field {field_index} of {reference} is not a string"
            ))),
        }
    }
}
