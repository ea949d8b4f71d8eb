//! Path formatting
//!
//! A fresh substrate path becomes an object database by writing the magic
//! record, the pre-baked system classes and the empty system structures,
//! then publishing the result directly (an introduced snapshot; there is no
//! concurrent history to merge against yet).

use tracing::info;

use basalt_core::key::{
    DICTIONARY_KEY, MAGIC_KEY, SYSTEM_CLASS_BUCKET_KEY, SYSTEM_CLASS_LIST_KEY,
};
use basalt_core::{Error, Result, SnapshotAddress, StoreSession, StoreTransaction};

use crate::bucket::ObjectBucket;
use crate::classes::{
    class_list_type_code, namer_list_type_code, CLASS_CLASS, CLASS_CLASS_REF,
    CLASS_LIST_TYPE_REF, NAMER_CLASS, NAMER_CLASS_REF, NAMER_LIST_TYPE_REF,
};
use crate::dictionary::ClassDictionary;
use crate::list::RefListFile;
use crate::log::ObjectLog;
use crate::object::{FieldValue, ObjectRecord};
use crate::properties::PropertySet;

/// Magic record object-type value.
pub const OB_TYPE: &str = "com.mckoi.odb.ObjectDatabase";
/// Magic record format version.
pub const OB_VERSION: &str = "1.0";

/// Format the path behind `session` as an empty object database and publish
/// the initial snapshot.
pub fn format_path(session: &dyn StoreSession) -> Result<SnapshotAddress> {
    let base = session.current_snapshot()?;
    let mut txn = session.create_transaction(base)?;

    let mut magic = PropertySet::new(txn.file(MAGIC_KEY)?);
    if magic.get("ob_type")?.is_some() {
        return Err(Error::InvalidState(format!(
            "Path {:?} is already formatted",
            session.path_name()
        )));
    }
    magic.set("ob_type", OB_TYPE)?;
    magic.set("version", OB_VERSION)?;

    // The two system classes are themselves `$Class` instances in the
    // system bucket, and members of the class list ($Class before $Namer in
    // name order).
    let mut bucket = ObjectBucket::new(txn.file(SYSTEM_CLASS_BUCKET_KEY)?);
    for class in [&*CLASS_CLASS, &*NAMER_CLASS] {
        let record = ObjectRecord::new(
            class.reference,
            vec![
                FieldValue::Str(class.name.clone()),
                FieldValue::Str(class.schema_string()),
            ],
        )
        .encode()?;
        bucket.insert(&record)?;
    }
    let mut class_list = RefListFile::new(txn.file(SYSTEM_CLASS_LIST_KEY)?);
    class_list.insert_at(0, CLASS_CLASS_REF)?;
    class_list.insert_at(1, NAMER_CLASS_REF)?;

    // Dictionary bindings for the system list types.
    let mut dictionary = ClassDictionary::new(txn.file(DICTIONARY_KEY)?);
    dictionary.add(&class_list_type_code(), CLASS_LIST_TYPE_REF)?;
    dictionary.add(&namer_list_type_code(), NAMER_LIST_TYPE_REF)?;

    // An empty log with no base root: the initial snapshot is introduced.
    let mut log = ObjectLog::open(txn.as_ref())?;
    log.set_base_root(None)?;

    let proposal = txn.flush()?;
    let published = session.publish(proposal)?;
    info!(path = session.path_name(), %published, "formatted object database path");
    Ok(published)
}

/// Verify the magic record of a formatted path.
pub fn check_magic(txn: &dyn StoreTransaction) -> Result<()> {
    let mut magic = PropertySet::new(txn.file(MAGIC_KEY)?);
    match magic.get("ob_type")? {
        Some(t) if t == OB_TYPE => {}
        other => {
            return Err(Error::InvalidState(format!(
                "Not an object database path (ob_type = {other:?})"
            )))
        }
    }
    match magic.get("version")? {
        Some(v) if v == OB_VERSION => Ok(()),
        other => Err(Error::InvalidState(format!(
            "Unsupported object database version {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::KeyedStore;
    use basalt_storage::HeapStore;

    #[test]
    fn test_format_then_check() {
        let store = HeapStore::new();
        store.create_path("db").unwrap();
        let session = store.session("db").unwrap();
        format_path(session.as_ref()).unwrap();

        let txn = session
            .create_transaction(session.current_snapshot().unwrap())
            .unwrap();
        check_magic(txn.as_ref()).unwrap();
    }

    #[test]
    fn test_double_format_rejected() {
        let store = HeapStore::new();
        store.create_path("db").unwrap();
        let session = store.session("db").unwrap();
        format_path(session.as_ref()).unwrap();
        assert!(format_path(session.as_ref()).is_err());
    }

    #[test]
    fn test_unformatted_path_fails_check() {
        let store = HeapStore::new();
        store.create_path("raw").unwrap();
        let session = store.session("raw").unwrap();
        let txn = session
            .create_transaction(session.current_snapshot().unwrap())
            .unwrap();
        assert!(check_magic(txn.as_ref()).is_err());
    }

    #[test]
    fn test_system_structures_present() {
        use crate::view::StoreView;

        let store = HeapStore::new();
        store.create_path("db").unwrap();
        let session = store.session("db").unwrap();
        format_path(session.as_ref()).unwrap();

        let txn = session
            .create_transaction(session.current_snapshot().unwrap())
            .unwrap();
        let mut view = StoreView::new(txn);

        let class_class = view.get_class(CLASS_CLASS_REF).unwrap();
        assert_eq!(class_class.name, "$Class");
        let namer_class = view.get_class(NAMER_CLASS_REF).unwrap();
        assert_eq!(namer_class.name, "$Namer");

        // Name lookup goes through the class list and the bucket records.
        let found = view.find_class("$Namer").unwrap().unwrap();
        assert_eq!(found.reference, NAMER_CLASS_REF);
        assert!(view.find_class("Missing").unwrap().is_none());

        // The system list types are in the dictionary, both directions.
        let mut dict = view.dictionary().unwrap();
        assert_eq!(
            dict.get_ref(&class_list_type_code()).unwrap(),
            Some(CLASS_LIST_TYPE_REF)
        );
        assert_eq!(
            dict.get_type(NAMER_LIST_TYPE_REF).unwrap(),
            Some(namer_list_type_code())
        );
    }
}
