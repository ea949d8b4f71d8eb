//! Commit-time merging of concurrent transactions: independent effects
//! merge, clashing effects fault, clashed key allocations are remapped.

use std::sync::Arc;
use std::thread;

use basaltdb::{Error, FieldValue, Limits, OdbSession};

use crate::common::{add_tag, define_person, define_tag_registry, new_db, new_person, tag_names};

#[test]
fn test_concurrent_adds_of_different_keys_merge() {
    let (_db, session) = new_db("app");
    define_tag_registry(&session);

    let t1 = session.transaction().unwrap();
    let t2 = session.transaction().unwrap();
    add_tag(&t1, "a").unwrap();
    add_tag(&t2, "b").unwrap();

    t1.commit().unwrap();
    // The merge replays t2's add onto the post-t1 list.
    t2.commit().unwrap();

    assert_eq!(tag_names(&session), vec!["a", "b"]);
}

#[test]
fn test_concurrent_mutation_of_same_object_faults() {
    let (_db, session) = new_db("app");
    define_person(&session);

    let setup = session.transaction().unwrap();
    let o = new_person(&setup, "O");
    setup.add_named_item("o", &o).unwrap();
    setup.commit().unwrap();

    // Person.name is immutable, so mutate through a second, mutable class.
    let txn = session.transaction().unwrap();
    let mut creator = txn.class_creator();
    creator.define_class("Note").string_field("text", true);
    creator.validate_and_complete().unwrap();
    let note_class = txn.find_class("Note").unwrap().unwrap();
    let note = txn
        .construct_object(&note_class, vec!["initial".into()])
        .unwrap();
    txn.add_named_item("note", &note).unwrap();
    txn.commit().unwrap();

    let t1 = session.transaction().unwrap();
    let t2 = session.transaction().unwrap();
    for (t, v) in [(&t1, "from t1"), (&t2, "from t2")] {
        let note = t.get_named_item("note").unwrap().unwrap();
        note.set_string("text", v).unwrap();
    }

    t1.commit().unwrap();
    let err = t2.commit().unwrap_err();
    assert!(err.is_commit_fault());
    assert!(
        err.to_string().contains("concurrently modified"),
        "got {err}"
    );

    let txn = session.read_transaction().unwrap();
    let note = txn.get_named_item("note").unwrap().unwrap();
    assert_eq!(note.get_string("text").unwrap(), Some("from t1".into()));
}

#[test]
fn test_concurrent_remove_of_same_entry_faults() {
    let (_db, session) = new_db("app");
    define_tag_registry(&session);

    let setup = session.transaction().unwrap();
    let tag = add_tag(&setup, "victim").unwrap();
    setup.commit().unwrap();

    let t1 = session.transaction().unwrap();
    let t2 = session.transaction().unwrap();
    for t in [&t1, &t2] {
        let registry = t.get_named_item("tags").unwrap().unwrap();
        assert!(registry
            .get_list("tags")
            .unwrap()
            .remove(tag.reference())
            .unwrap());
    }

    t1.commit().unwrap();
    let err = t2.commit().unwrap_err();
    assert!(err.is_commit_fault());
    assert!(
        err.to_string()
            .contains("Duplicate remove object from list operation"),
        "got {err}"
    );

    assert!(tag_names(&session).is_empty());
}

#[test]
fn test_concurrent_add_and_remove_of_different_entries_merge() {
    let (_db, session) = new_db("app");
    define_tag_registry(&session);

    let setup = session.transaction().unwrap();
    let old = add_tag(&setup, "old").unwrap();
    setup.commit().unwrap();

    let t1 = session.transaction().unwrap();
    let t2 = session.transaction().unwrap();
    // t1 removes "old"; t2 adds "new".
    let registry = t1.get_named_item("tags").unwrap().unwrap();
    assert!(registry
        .get_list("tags")
        .unwrap()
        .remove(old.reference())
        .unwrap());
    add_tag(&t2, "new").unwrap();

    t1.commit().unwrap();
    t2.commit().unwrap();

    assert_eq!(tag_names(&session), vec!["new"]);
}

#[test]
fn test_key_clash_remap_preserves_both_blobs() {
    let (_db, session) = new_db("app");

    let txn = session.transaction().unwrap();
    let mut creator = txn.class_creator();
    creator
        .define_class("Doc")
        .string_field("name", false)
        .data_field("body");
    creator.validate_and_complete().unwrap();
    txn.commit().unwrap();

    // A stride bound of 1 forces both transactions' blob allocations onto
    // the same storage key, exercising the remap path at merge.
    let clashing = Limits {
        max_key_stride: 1,
        ..Limits::default()
    };
    let t1 = session.transaction_with_limits(clashing.clone()).unwrap();
    let t2 = session.transaction_with_limits(clashing).unwrap();

    for (t, name) in [(&t1, "left"), (&t2, "right")] {
        let class = t.find_class("Doc").unwrap().unwrap();
        let doc = t
            .construct_object(&class, vec![(*name).into(), FieldValue::Null])
            .unwrap();
        let mut body = doc.get_data("body").unwrap();
        body.write(name.as_bytes()).unwrap();
        t.add_named_item(name, &doc).unwrap();
    }

    t1.commit().unwrap();
    t2.commit().unwrap();

    // Both blobs survive with their own content under their own keys.
    let txn = session.read_transaction().unwrap();
    for name in ["left", "right"] {
        let doc = txn.get_named_item(name).unwrap().unwrap();
        let body = doc.get_data("body").unwrap();
        assert_eq!(body.read_all().unwrap(), name.as_bytes());
    }
}

#[test]
fn test_threaded_commits_with_retry_converge() {
    let (_db, session) = new_db("app");
    define_tag_registry(&session);
    let session = Arc::new(session);

    let threads = 4;
    let per_thread = 5;
    let mut handles = Vec::new();
    for t in 0..threads {
        let session: Arc<OdbSession> = Arc::clone(&session);
        handles.push(thread::spawn(move || {
            for i in 0..per_thread {
                let name = format!("tag-{t}-{i:02}");
                // Commit faults are expected under contention: reopen on a
                // fresh snapshot and replay the intent.
                loop {
                    let txn = session.transaction().unwrap();
                    add_tag(&txn, &name).unwrap();
                    match txn.commit() {
                        Ok(_) => break,
                        Err(Error::CommitFault(_)) => continue,
                        Err(other) => panic!("unexpected commit error: {other:?}"),
                    }
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let names = tag_names(&session);
    assert_eq!(names.len(), (threads * per_thread) as usize);
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted, "list stays in key order under contention");
}

#[test]
fn test_commits_on_different_paths_do_not_interfere() {
    let (db, a) = new_db("a");
    let b = db.create("b").unwrap();
    define_tag_registry(&a);
    define_tag_registry(&b);

    let ta = a.transaction().unwrap();
    let tb = b.transaction().unwrap();
    add_tag(&ta, "only-a").unwrap();
    add_tag(&tb, "only-b").unwrap();
    ta.commit().unwrap();
    tb.commit().unwrap();

    assert_eq!(tag_names(&a), vec!["only-a"]);
    assert_eq!(tag_names(&b), vec!["only-b"]);
}
