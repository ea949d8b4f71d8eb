//! Constraint and type-check behavior within a single transaction.

use basaltdb::{Error, FieldValue};

use crate::common::{add_tag, define_tag_registry, new_db, tag_names};

#[test]
fn test_unique_list_rejects_duplicate_key_but_commit_survives() {
    let (_db, session) = new_db("app");
    define_tag_registry(&session);

    let txn = session.transaction().unwrap();
    add_tag(&txn, "x").unwrap();
    add_tag(&txn, "y").unwrap();

    // A second tag named "x" violates the unique order.
    let err = add_tag(&txn, "x").unwrap_err();
    assert!(err.is_constraint_violation(), "got {err:?}");

    // The transaction is still valid and commits the two accepted tags.
    txn.commit().unwrap();
    assert_eq!(tag_names(&session), vec!["x", "y"]);
}

#[test]
fn test_remove_then_readd_same_key() {
    let (_db, session) = new_db("app");
    define_tag_registry(&session);

    let txn = session.transaction().unwrap();
    let tag = add_tag(&txn, "x").unwrap();
    let registry = txn.get_named_item("tags").unwrap().unwrap();
    let list = registry.get_list("tags").unwrap();
    assert!(list.remove(tag.reference()).unwrap());
    // The key is free again.
    add_tag(&txn, "x").unwrap();
    txn.commit().unwrap();
    assert_eq!(tag_names(&session), vec!["x"]);
}

#[test]
fn test_remove_missing_entry_reports_false() {
    let (_db, session) = new_db("app");
    define_tag_registry(&session);

    let txn = session.transaction().unwrap();
    let tag = add_tag(&txn, "x").unwrap();
    let registry = txn.get_named_item("tags").unwrap().unwrap();
    let list = registry.get_list("tags").unwrap();
    assert!(list.remove(tag.reference()).unwrap());
    assert!(!list.remove(tag.reference()).unwrap());
}

#[test]
fn test_key_queries_on_keyed_list() {
    let (_db, session) = new_db("app");
    define_tag_registry(&session);

    let txn = session.transaction().unwrap();
    for name in ["delta", "alpha", "echo", "bravo", "charlie"] {
        add_tag(&txn, name).unwrap();
    }
    let registry = txn.get_named_item("tags").unwrap().unwrap();
    let list = registry.get_list("tags").unwrap();

    assert_eq!(list.len().unwrap(), 5);
    assert_eq!(list.index_of_key("charlie").unwrap(), Some(2));
    assert!(list.contains_key("echo").unwrap());
    assert!(!list.contains_key("foxtrot").unwrap());
    assert_eq!(
        list.get_by_key("bravo")
            .unwrap()
            .unwrap()
            .get_string("name")
            .unwrap(),
        Some("bravo".to_string())
    );

    // Bounded views: [bravo, delta) -> bravo, charlie.
    let sub = list.sub("bravo", "delta");
    let names: Vec<String> = sub
        .objects()
        .unwrap()
        .iter()
        .map(|o| o.get_string("name").unwrap().unwrap())
        .collect();
    assert_eq!(names, vec!["bravo", "charlie"]);
    assert_eq!(sub.first().unwrap(), list.get_at(1).unwrap());
}

#[test]
fn test_wrong_value_type_is_rejected() {
    let (_db, session) = new_db("app");
    define_tag_registry(&session);

    let txn = session.transaction().unwrap();
    let tag_class = txn.find_class("Tag").unwrap().unwrap();

    // A reference where a string belongs.
    let registry = txn.get_named_item("tags").unwrap().unwrap();
    let err = txn
        .construct_object(&tag_class, vec![FieldValue::Ref(registry.reference())])
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch(_)));
}

#[test]
fn test_list_type_check_on_add() {
    let (_db, session) = new_db("app");
    define_tag_registry(&session);

    let txn = session.transaction().unwrap();
    let registry = txn.get_named_item("tags").unwrap().unwrap();
    let list = registry.get_list("tags").unwrap();

    // The registry itself is not a Tag.
    let err = list.add(&registry).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch(_)));
}

#[test]
fn test_named_item_names_are_unique() {
    let (_db, session) = new_db("app");
    define_tag_registry(&session);

    let txn = session.transaction().unwrap();
    let tag = add_tag(&txn, "x").unwrap();
    let err = txn.add_named_item("tags", &tag).unwrap_err();
    assert!(err.is_constraint_violation());
}
