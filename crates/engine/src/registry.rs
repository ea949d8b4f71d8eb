//! Class registry and batch class creation
//!
//! Classes are defined in batches through a [`ClassCreator`]: the batch
//! collects definitions whose field types may reference each other by name
//! (including cycles), then `validate_and_complete` resolves every name,
//! allocates references, registers the list types in the dictionary and
//! defines the classes in the registry.
//!
//! Validation runs in full before anything is written, so a failed batch
//! leaves the substrate untouched and the creator invalidated.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use basalt_core::{validate_name, Error, Reference, Result};

use crate::classes::{
    ClassSource, FieldDef, ListTypeSpec, OdbClass, CLASS_CLASS_REF,
};
use crate::object::{FieldValue, ObjectRecord};
use crate::transaction::TxCore;

/// Ordering policy of a list field.
#[derive(Debug, Clone, Default)]
pub struct ListFieldSpec {
    /// Whether equal keys may coexist.
    pub allow_duplicates: bool,
    /// Element-class field to order by; `None` orders by reference value.
    pub key_field: Option<String>,
    /// Reverse the key order.
    pub descending: bool,
}

#[derive(Debug, Clone)]
enum PendingField {
    Str {
        name: String,
        mutable: bool,
    },
    Data {
        name: String,
    },
    Instance {
        name: String,
        class_name: String,
        mutable: bool,
    },
    List {
        name: String,
        element_class: String,
        spec: ListFieldSpec,
    },
}

impl PendingField {
    fn name(&self) -> &str {
        match self {
            PendingField::Str { name, .. }
            | PendingField::Data { name }
            | PendingField::Instance { name, .. }
            | PendingField::List { name, .. } => name,
        }
    }

    fn referenced_class(&self) -> Option<&str> {
        match self {
            PendingField::Instance { class_name, .. } => Some(class_name),
            PendingField::List { element_class, .. } => Some(element_class),
            _ => None,
        }
    }
}

/// One class definition being collected in a batch.
#[derive(Debug)]
pub struct PendingClass {
    name: String,
    fields: Vec<PendingField>,
}

impl PendingClass {
    /// Add an inline string field.
    pub fn string_field(&mut self, name: &str, mutable: bool) -> &mut Self {
        self.fields.push(PendingField::Str {
            name: name.to_string(),
            mutable,
        });
        self
    }

    /// Add a data blob field.
    pub fn data_field(&mut self, name: &str) -> &mut Self {
        self.fields.push(PendingField::Data {
            name: name.to_string(),
        });
        self
    }

    /// Add an instance-reference field. `class_name` may name a class in
    /// this batch or an existing class.
    pub fn instance_field(&mut self, name: &str, class_name: &str, mutable: bool) -> &mut Self {
        self.fields.push(PendingField::Instance {
            name: name.to_string(),
            class_name: class_name.to_string(),
            mutable,
        });
        self
    }

    /// Add an ordered list field over `element_class`.
    pub fn list_field(&mut self, name: &str, element_class: &str, spec: ListFieldSpec) -> &mut Self {
        self.fields.push(PendingField::List {
            name: name.to_string(),
            element_class: element_class.to_string(),
            spec,
        });
        self
    }
}

/// A batch of class definitions.
pub struct ClassCreator {
    core: Arc<Mutex<TxCore>>,
    pending: Vec<PendingClass>,
}

impl ClassCreator {
    pub(crate) fn new(core: Arc<Mutex<TxCore>>) -> Self {
        ClassCreator {
            core,
            pending: Vec::new(),
        }
    }

    /// Start a class definition in this batch.
    pub fn define_class(&mut self, name: &str) -> &mut PendingClass {
        self.pending.push(PendingClass {
            name: name.to_string(),
            fields: Vec::new(),
        });
        self.pending.last_mut().expect("just pushed")
    }

    /// Whether a batch field is an inline string (key-field candidates).
    fn is_string_field(fields: &[PendingField], name: &str) -> bool {
        fields
            .iter()
            .any(|f| f.name() == name && matches!(f, PendingField::Str { .. }))
    }

    /// Validate the whole batch, resolve names, then define every class.
    ///
    /// Any `ClassValidation` failure happens before the first substrate
    /// write; the creator is consumed either way.
    pub fn validate_and_complete(self) -> Result<Vec<OdbClass>> {
        let core = Arc::clone(&self.core);
        let mut core = core.lock();
        core.ensure_writable()?;

        // ---- Validation phase: nothing below may touch the substrate. ----
        let limits = core.view.limits().clone();
        let mut batch_index: HashMap<&str, usize> = HashMap::new();
        for (i, pending) in self.pending.iter().enumerate() {
            validate_name(&pending.name, &limits)
                .map_err(|e| Error::ClassValidation(format!("Class {:?}: {e}", pending.name)))?;
            if batch_index.insert(pending.name.as_str(), i).is_some() {
                return Err(Error::ClassValidation(format!(
                    "Class {:?} defined twice in one batch",
                    pending.name
                )));
            }
            if pending.fields.len() > limits.max_fields_per_class {
                return Err(Error::ClassValidation(format!(
                    "Class {:?} declares {} fields, maximum is {}",
                    pending.name,
                    pending.fields.len(),
                    limits.max_fields_per_class
                )));
            }
            let mut seen = HashMap::new();
            for field in &pending.fields {
                validate_name(field.name(), &limits).map_err(|e| {
                    Error::ClassValidation(format!(
                        "Field {}.{}: {e}",
                        pending.name,
                        field.name()
                    ))
                })?;
                if seen.insert(field.name(), ()).is_some() {
                    return Err(Error::ClassValidation(format!(
                        "Field {}.{} defined twice",
                        pending.name,
                        field.name()
                    )));
                }
            }
        }

        // Resolve every referenced class name: either a member of this
        // batch, or an already committed class.
        let mut resolved_existing: HashMap<String, Arc<OdbClass>> = HashMap::new();
        for pending in &self.pending {
            for field in &pending.fields {
                let Some(target) = field.referenced_class() else {
                    continue;
                };
                if batch_index.contains_key(target) || resolved_existing.contains_key(target) {
                    continue;
                }
                match core.view.find_class(target)? {
                    Some(class) => {
                        resolved_existing.insert(target.to_string(), class);
                    }
                    None => {
                        return Err(Error::ClassValidation(format!(
                            "Field {}.{} references unknown class {target:?}",
                            pending.name,
                            field.name()
                        )))
                    }
                }
            }
        }

        // Key fields of keyed lists must be string fields of the element.
        for pending in &self.pending {
            for field in &pending.fields {
                let PendingField::List {
                    name,
                    element_class,
                    spec,
                } = field
                else {
                    continue;
                };
                let Some(key) = &spec.key_field else { continue };
                let ok = match batch_index.get(element_class.as_str()) {
                    Some(i) => Self::is_string_field(&self.pending[*i].fields, key),
                    None => {
                        let class = &resolved_existing[element_class.as_str()];
                        class
                            .field_index(key)
                            .map(|i| class.fields[i].type_code == "[S")
                            .unwrap_or(false)
                    }
                };
                if !ok {
                    return Err(Error::ClassValidation(format!(
                        "List {}.{name} orders by {key:?}, which is not a string field of {element_class}",
                        pending.name
                    )));
                }
            }
        }

        // ---- Resolution phase: allocate references, build final codes. ----
        let refs: Vec<Reference> = self.pending.iter().map(|_| Reference::generate()).collect();
        let resolve = |name: &str| -> Reference {
            match batch_index.get(name) {
                Some(i) => refs[*i],
                None => resolved_existing[name].reference,
            }
        };

        let mut classes = Vec::with_capacity(self.pending.len());
        for (pending, reference) in self.pending.iter().zip(&refs) {
            let mut fields = Vec::with_capacity(pending.fields.len());
            for field in &pending.fields {
                let (type_code, mutable) = match field {
                    PendingField::Str { mutable, .. } => ("[S".to_string(), *mutable),
                    PendingField::Data { .. } => ("[D".to_string(), false),
                    PendingField::Instance {
                        class_name,
                        mutable,
                        ..
                    } => (format!("{class_name}#{}", resolve(class_name)), *mutable),
                    PendingField::List {
                        element_class,
                        spec,
                        ..
                    } => {
                        let code = ListTypeSpec {
                            element_name: element_class.clone(),
                            element_ref: Some(resolve(element_class)),
                            allow_duplicates: spec.allow_duplicates,
                            key_field: spec.key_field.clone(),
                            descending: spec.descending,
                            collator: spec.key_field.as_ref().map(|_| "lexi".to_string()),
                        }
                        .to_code();
                        (code, false)
                    }
                };
                fields.push(FieldDef {
                    name: field.name().to_string(),
                    type_code,
                    mutable,
                });
            }
            classes.push(OdbClass {
                name: pending.name.clone(),
                reference: *reference,
                source: ClassSource::User,
                fields,
            });
        }

        // ---- Write phase. ----
        // Register list types in the dictionary first; every list type is a
        // class with its own reference.
        for class in &classes {
            for field in &class.fields {
                if !field.type_code.starts_with("[L<") {
                    continue;
                }
                let mut dictionary = core.view.dictionary()?;
                if dictionary.get_ref(&field.type_code)?.is_none() {
                    let type_ref = Reference::generate();
                    dictionary.add(&field.type_code, type_ref)?;
                    core.log.log_dictionary_add(type_ref)?;
                }
            }
        }

        // Define each class: a `$Class` instance in the system bucket, an
        // allocated instance bucket, and membership in the class list.
        for class in &classes {
            let record = ObjectRecord::new(
                class.reference,
                vec![
                    FieldValue::Str(class.name.clone()),
                    FieldValue::Str(class.schema_string()),
                ],
            )
            .encode()?;
            core.view.bucket(CLASS_CLASS_REF)?.insert(&record)?;
            core.log.log_object_change(CLASS_CLASS_REF, class.reference)?;

            core.allocate_resource(class.reference)?;

            core.list_add(&TxCore::class_list_info(), class.reference)?;
            core.view.cache_class(Arc::new(class.clone()));
            debug!(class = %class.name, reference = %class.reference, "defined class");
        }

        Ok(classes)
    }
}
