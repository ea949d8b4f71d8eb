//! Shared helpers for the end-to-end suite.

use std::sync::{Arc, Once};

use basaltdb::{
    FieldValue, HeapStore, ListFieldSpec, ObjectDatabase, ObjectTransaction, OdbSession,
};

/// Install a test subscriber once so `RUST_LOG`-style filtering works when
/// debugging a failing scenario.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// A fresh database with one formatted path.
pub fn new_db(path: &str) -> (ObjectDatabase, OdbSession) {
    init_tracing();
    let db = ObjectDatabase::new(Arc::new(HeapStore::new()));
    let session = db.create(path).unwrap();
    (db, session)
}

/// Define `Person(name:[S immutable, friends:[L<Person>(duplicates,name,lexi))`
/// and commit.
pub fn define_person(session: &OdbSession) {
    let txn = session.transaction().unwrap();
    let mut creator = txn.class_creator();
    creator
        .define_class("Person")
        .string_field("name", false)
        .list_field(
            "friends",
            "Person",
            ListFieldSpec {
                allow_duplicates: true,
                key_field: Some("name".to_string()),
                descending: false,
            },
        );
    creator.validate_and_complete().unwrap();
    txn.commit().unwrap();
}

/// Define `Tag(name:[S immutable)` plus a `Registry` root holding a list of
/// tags uniquely ordered by name, bound to the named item `"tags"`.
pub fn define_tag_registry(session: &OdbSession) {
    let txn = session.transaction().unwrap();
    let mut creator = txn.class_creator();
    creator.define_class("Tag").string_field("name", false);
    creator.define_class("Registry").list_field(
        "tags",
        "Tag",
        ListFieldSpec {
            allow_duplicates: false,
            key_field: Some("name".to_string()),
            descending: false,
        },
    );
    creator.validate_and_complete().unwrap();

    let registry_class = txn.find_class("Registry").unwrap().unwrap();
    let registry = txn
        .construct_object(&registry_class, vec![FieldValue::Null])
        .unwrap();
    txn.add_named_item("tags", &registry).unwrap();
    txn.commit().unwrap();
}

/// Construct a `Person` with the given name.
pub fn new_person(txn: &ObjectTransaction, name: &str) -> basaltdb::OdbObject {
    let class = txn.find_class("Person").unwrap().unwrap();
    txn.construct_object(&class, vec![name.into(), FieldValue::Null])
        .unwrap()
}

/// Construct a `Tag` and add it to the registry list.
pub fn add_tag(txn: &ObjectTransaction, name: &str) -> basaltdb::Result<basaltdb::OdbObject> {
    let class = txn.find_class("Tag").unwrap().unwrap();
    let tag = txn.construct_object(&class, vec![name.into()])?;
    let registry = txn.get_named_item("tags")?.expect("registry root");
    registry.get_list("tags")?.add(&tag)?;
    Ok(tag)
}

/// Names in the registry list, in list order.
pub fn tag_names(session: &OdbSession) -> Vec<String> {
    let txn = session.read_transaction().unwrap();
    let registry = txn.get_named_item("tags").unwrap().unwrap();
    registry
        .get_list("tags")
        .unwrap()
        .objects()
        .unwrap()
        .iter()
        .map(|o| o.get_string("name").unwrap().unwrap())
        .collect()
}
