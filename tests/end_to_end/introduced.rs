//! Introduced snapshots: publishing one path's state into another
//! bypasses the merge entirely.

use crate::common::{add_tag, define_tag_registry, new_db, tag_names};

#[test]
fn test_publish_to_carries_whole_state() {
    let (db, source) = new_db("source");
    let target = db.create("target").unwrap();
    define_tag_registry(&source);

    let txn = source.transaction().unwrap();
    add_tag(&txn, "carried").unwrap();
    txn.commit().unwrap();

    source.publish_to(&target).unwrap();

    // The target now carries the source's full object graph.
    assert_eq!(tag_names(&target), vec!["carried"]);

    // And keeps evolving independently.
    let txn = target.transaction().unwrap();
    add_tag(&txn, "local").unwrap();
    txn.commit().unwrap();
    assert_eq!(tag_names(&target), vec!["carried", "local"]);
    assert_eq!(tag_names(&source), vec!["carried"]);
}

#[test]
fn test_session_equality_is_by_path_name() {
    let (db, a) = new_db("a");
    let b = db.create("b").unwrap();
    let a_again = db.open("a").unwrap();

    assert_eq!(a, a_again);
    assert_ne!(a, b);
}
