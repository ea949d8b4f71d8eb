//! Property tests over the public API: order invariants under arbitrary
//! operation sequences, and encoding round trips.

use proptest::prelude::*;

use basaltdb::{FieldValue, Reference};

use crate::common::{define_tag_registry, new_db};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// After any sequence of adds and removes, a unique keyed list stays
    /// strictly sorted with no duplicate keys.
    #[test]
    fn prop_unique_list_stays_sorted(ops in proptest::collection::vec((any::<bool>(), 0u8..20), 1..40)) {
        let (_db, session) = new_db("app");
        define_tag_registry(&session);

        let txn = session.transaction().unwrap();
        let tag_class = txn.find_class("Tag").unwrap().unwrap();
        let registry = txn.get_named_item("tags").unwrap().unwrap();
        let list = registry.get_list("tags").unwrap();

        let mut live: Vec<Option<Reference>> = vec![None; 20];
        for (add, slot) in ops {
            let slot = slot as usize;
            if add {
                if live[slot].is_none() {
                    let tag = txn
                        .construct_object(&tag_class, vec![format!("tag-{slot:02}").into()])
                        .unwrap();
                    list.add(&tag).unwrap();
                    live[slot] = Some(tag.reference());
                }
            } else if let Some(r) = live[slot].take() {
                prop_assert!(list.remove(r).unwrap());
            }
        }

        let names: Vec<String> = list
            .objects()
            .unwrap()
            .iter()
            .map(|o| o.get_string("name").unwrap().unwrap())
            .collect();
        let expected_len = live.iter().filter(|s| s.is_some()).count();
        prop_assert_eq!(names.len(), expected_len);
        for pair in names.windows(2) {
            prop_assert!(pair[0] < pair[1], "strictly sorted, no duplicate keys");
        }
    }

    /// Reference string form round-trips for arbitrary references.
    #[test]
    fn prop_reference_string_round_trip(high in any::<u64>(), low in any::<u64>()) {
        let r = Reference::new(high, low);
        prop_assert_eq!(r.to_string().parse::<Reference>().unwrap(), r);
    }
}

/// Objects committed and re-read decode to the values that were written.
#[test]
fn test_object_round_trip_through_commit() {
    let (_db, session) = new_db("app");
    let txn = session.transaction().unwrap();
    let mut creator = txn.class_creator();
    creator
        .define_class("Sample")
        .string_field("a", false)
        .string_field("b", true)
        .instance_field("next", "Sample", true);
    creator.validate_and_complete().unwrap();

    let class = txn.find_class("Sample").unwrap().unwrap();
    let first = txn
        .construct_object(
            &class,
            vec!["alpha".into(), FieldValue::Null, FieldValue::Null],
        )
        .unwrap();
    let second = txn
        .construct_object(
            &class,
            vec![
                "beta".into(),
                "note".into(),
                FieldValue::Ref(first.reference()),
            ],
        )
        .unwrap();
    txn.add_named_item("second", &second).unwrap();
    txn.commit().unwrap();

    let txn = session.read_transaction().unwrap();
    let second = txn.get_named_item("second").unwrap().unwrap();
    assert_eq!(second.get_string("a").unwrap(), Some("beta".into()));
    assert_eq!(second.get_string("b").unwrap(), Some("note".into()));
    let next = second.get_object("next").unwrap().unwrap();
    assert_eq!(next.get_string("a").unwrap(), Some("alpha".into()));
    assert_eq!(next.get_string("b").unwrap(), None);
}
