//! Create/read cycles: schema in one transaction, graph in the next,
//! reads from a third.

use basaltdb::{Error, FieldValue, TxStatus};

use crate::common::{define_person, new_db, new_person};

#[test]
fn test_create_read_cycle_through_named_root() {
    let (_db, session) = new_db("app");

    // Transaction 1: the schema.
    define_person(&session);

    // Transaction 2: a small graph behind a named root.
    let txn = session.transaction().unwrap();
    let alice = new_person(&txn, "Alice");
    let bob = new_person(&txn, "Bob");
    let carol = new_person(&txn, "Carol");
    let friends = alice.get_list("friends").unwrap();
    friends.add(&carol).unwrap();
    friends.add(&bob).unwrap();
    txn.add_named_item("root", &alice).unwrap();
    txn.commit().unwrap();

    // Transaction 3: read it back; friends iterate in name order.
    let txn = session.read_transaction().unwrap();
    let root = txn.get_named_item("root").unwrap().unwrap();
    assert_eq!(root.get_string("name").unwrap(), Some("Alice".to_string()));
    let names: Vec<String> = root
        .get_list("friends")
        .unwrap()
        .objects()
        .unwrap()
        .iter()
        .map(|o| o.get_string("name").unwrap().unwrap())
        .collect();
    assert_eq!(names, vec!["Bob", "Carol"]);
}

#[test]
fn test_uncommitted_work_is_invisible() {
    let (_db, session) = new_db("app");
    define_person(&session);

    {
        let txn = session.transaction().unwrap();
        let alice = new_person(&txn, "Alice");
        txn.add_named_item("root", &alice).unwrap();
        // Dropped without commit: implicit rollback.
    }

    let txn = session.read_transaction().unwrap();
    assert!(txn.get_named_item("root").unwrap().is_none());
}

#[test]
fn test_mvcc_reader_keeps_its_snapshot() {
    let (_db, session) = new_db("app");
    define_person(&session);

    let reader = session.read_transaction().unwrap();

    let writer = session.transaction().unwrap();
    let alice = new_person(&writer, "Alice");
    writer.add_named_item("root", &alice).unwrap();
    writer.commit().unwrap();

    // The reader still sees its base snapshot.
    assert!(reader.get_named_item("root").unwrap().is_none());

    // An explicit refresh is a new transaction.
    let fresh = session.read_transaction().unwrap();
    assert!(fresh.get_named_item("root").unwrap().is_some());
}

#[test]
fn test_data_blob_round_trip_across_commits() {
    let (_db, session) = new_db("app");

    let txn = session.transaction().unwrap();
    let mut creator = txn.class_creator();
    creator
        .define_class("Attachment")
        .string_field("name", false)
        .data_field("bytes");
    creator.validate_and_complete().unwrap();

    let class = txn.find_class("Attachment").unwrap().unwrap();
    let att = txn
        .construct_object(&class, vec!["blob".into(), FieldValue::Null])
        .unwrap();
    let mut data = att.get_data("bytes").unwrap();
    data.write(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
    txn.add_named_item("att", &att).unwrap();
    txn.commit().unwrap();

    let txn = session.read_transaction().unwrap();
    let att = txn.get_named_item("att").unwrap().unwrap();
    let data = att.get_data("bytes").unwrap();
    assert_eq!(data.read_all().unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(data.size().unwrap(), 4);
}

#[test]
fn test_read_only_transaction_cannot_commit() {
    let (_db, session) = new_db("app");
    define_person(&session);

    let ro = session.read_transaction().unwrap();
    assert!(ro.find_class("Person").unwrap().is_some());
    match ro.commit() {
        Err(Error::ReadOnlyViolation) => {}
        other => panic!("expected ReadOnlyViolation, got {other:?}"),
    }
}

#[test]
fn test_commit_marks_transaction_committed() {
    let (_db, session) = new_db("app");
    define_person(&session);

    let txn = session.transaction().unwrap();
    let alice = new_person(&txn, "Alice");
    txn.add_named_item("root", &alice).unwrap();
    assert_eq!(txn.status(), TxStatus::Active);
    txn.commit().unwrap();

    // Handles created before the commit are now inert.
    let err = alice.get_string("name").unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[test]
fn test_class_names_list_is_ordered() {
    let (_db, session) = new_db("app");
    define_person(&session);

    let txn = session.read_transaction().unwrap();
    let names: Vec<String> = txn
        .class_names_list()
        .objects()
        .unwrap()
        .iter()
        .map(|c| c.get_string("name").unwrap().unwrap())
        .collect();
    assert_eq!(names, vec!["$Class", "$Namer", "Person"]);
}
