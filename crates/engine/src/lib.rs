//! The Basalt object data model and transaction engine
//!
//! This crate implements the transactional object store over the substrate
//! traits of `basalt-core`:
//! - reference-to-key lookup and stride-based key allocation
//! - the class dictionary, registry and batch class creation
//! - per-class object buckets with the tagged record encoding
//! - ordered reference lists with reference or key-field ordering
//! - the per-transaction object log consumed by the consensus engine
//! - [`ObjectTransaction`], the client API
//!
//! Commit routing is abstracted behind `basalt_core::CommitRouter`; the
//! consensus crate provides the real per-path merge implementation and
//! reuses the components exported here to replay proposals.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucket;
pub mod classes;
pub mod dictionary;
pub mod file_io;
pub mod list;
pub mod log;
pub mod lookup;
pub mod object;
pub mod ordered_set;
pub mod properties;
pub mod registry;
pub mod setup;
pub mod transaction;
pub mod view;

pub use bucket::ObjectBucket;
pub use classes::{
    parse_field_type, ClassSource, FieldDef, FieldType, ListTypeSpec, OdbClass, CLASS_CLASS_REF,
    CLASS_LIST_REF, NAMER_CLASS_REF, NAMER_LIST_REF,
};
pub use dictionary::ClassDictionary;
pub use list::{ListOrder, ListSpec, RefListFile, SearchKey};
pub use log::{LogEntry, ObjectLog};
pub use lookup::{KeyCounter, RefLookup};
pub use object::{FieldValue, ObjectRecord};
pub use properties::PropertySet;
pub use registry::{ClassCreator, ListFieldSpec, PendingClass};
pub use setup::{check_magic, format_path, OB_TYPE, OB_VERSION};
pub use transaction::{ObjectTransaction, OdbData, OdbList, OdbObject, TxStatus};
pub use view::StoreView;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use basalt_core::{
        CommitRouter, Error, KeyedStore, Reference, Result, SnapshotAddress, StoreSession,
    };
    use basalt_storage::HeapStore;

    use crate::object::FieldValue;
    use crate::registry::ListFieldSpec;
    use crate::setup::format_path;
    use crate::transaction::{ObjectTransaction, TxStatus};

    /// Publishes proposals without merging; single-writer engine tests
    /// never have concurrent history.
    struct PassthroughRouter;

    impl CommitRouter for PassthroughRouter {
        fn perform_commit(
            &self,
            session: &dyn StoreSession,
            proposal: SnapshotAddress,
        ) -> Result<SnapshotAddress> {
            session.publish(proposal)
        }
    }

    fn test_session() -> Arc<dyn StoreSession> {
        let store = HeapStore::new();
        store.create_path("db").unwrap();
        let session = store.session("db").unwrap();
        format_path(session.as_ref()).unwrap();
        session
    }

    fn open(session: &Arc<dyn StoreSession>) -> ObjectTransaction {
        ObjectTransaction::open(Arc::clone(session), Arc::new(PassthroughRouter)).unwrap()
    }

    fn define_person(txn: &ObjectTransaction) {
        let mut creator = txn.class_creator();
        creator
            .define_class("Person")
            .string_field("name", false)
            .string_field("note", true)
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
    }

    #[test]
    fn test_define_and_find_class() {
        let session = test_session();
        let txn = open(&session);
        define_person(&txn);

        let person = txn.find_class("Person").unwrap().unwrap();
        assert_eq!(person.fields.len(), 3);
        assert_eq!(person.fields[0].type_code, "[S");
        assert!(person.fields[2].type_code.starts_with("[L<Person#"));

        txn.commit().unwrap();

        // Visible to a fresh transaction after commit.
        let txn2 = open(&session);
        assert!(txn2.find_class("Person").unwrap().is_some());
        assert!(txn2.find_class("Absent").unwrap().is_none());
    }

    #[test]
    fn test_class_validation_failure_is_atomic() {
        let session = test_session();
        let txn = open(&session);
        let mut creator = txn.class_creator();
        creator
            .define_class("Broken")
            .instance_field("other", "DoesNotExist", false);
        let err = creator.validate_and_complete().unwrap_err();
        assert!(matches!(err, Error::ClassValidation(_)));

        // Nothing was defined.
        assert!(txn.find_class("Broken").unwrap().is_none());
    }

    #[test]
    fn test_mutual_references_within_batch() {
        let session = test_session();
        let txn = open(&session);
        let mut creator = txn.class_creator();
        creator
            .define_class("Author")
            .string_field("name", false)
            .instance_field("favourite", "Book", true);
        creator
            .define_class("Book")
            .string_field("title", false)
            .instance_field("author", "Author", false);
        creator.validate_and_complete().unwrap();

        let author = txn.find_class("Author").unwrap().unwrap();
        let book = txn.find_class("Book").unwrap().unwrap();
        assert!(author.fields[1]
            .type_code
            .ends_with(&book.reference.to_string()));
        assert!(book.fields[1]
            .type_code
            .ends_with(&author.reference.to_string()));
    }

    #[test]
    fn test_construct_and_read_object() {
        let session = test_session();
        let txn = open(&session);
        define_person(&txn);
        let person = txn.find_class("Person").unwrap().unwrap();

        let alice = txn
            .construct_object(
                &person,
                vec!["Alice".into(), FieldValue::Null, FieldValue::Null],
            )
            .unwrap();
        assert_eq!(alice.get_string("name").unwrap(), Some("Alice".to_string()));
        assert_eq!(alice.get_string("note").unwrap(), None);

        // The list field was auto-allocated a reference.
        assert!(matches!(alice.get("friends").unwrap(), FieldValue::Ref(_)));

        let fetched = txn.get_object(&person, alice.reference()).unwrap();
        assert_eq!(fetched.get_string("name").unwrap(), Some("Alice".into()));
    }

    #[test]
    fn test_construct_wrong_arity() {
        let session = test_session();
        let txn = open(&session);
        define_person(&txn);
        let person = txn.find_class("Person").unwrap().unwrap();
        let err = txn
            .construct_object(&person, vec!["Alice".into()])
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn test_set_immutable_field_rejected() {
        let session = test_session();
        let txn = open(&session);
        define_person(&txn);
        let person = txn.find_class("Person").unwrap().unwrap();
        let alice = txn
            .construct_object(
                &person,
                vec!["Alice".into(), FieldValue::Null, FieldValue::Null],
            )
            .unwrap();

        let err = alice.set_string("name", "Eve").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));

        alice.set_string("note", "mutable is fine").unwrap();
        assert_eq!(
            alice.get_string("note").unwrap(),
            Some("mutable is fine".to_string())
        );
    }

    #[test]
    fn test_instance_field_type_check() {
        let session = test_session();
        let txn = open(&session);
        let mut creator = txn.class_creator();
        creator.define_class("Tag").string_field("name", false);
        creator
            .define_class("Post")
            .string_field("title", false)
            .instance_field("tag", "Tag", true);
        creator.validate_and_complete().unwrap();

        let tag_class = txn.find_class("Tag").unwrap().unwrap();
        let post_class = txn.find_class("Post").unwrap().unwrap();

        let tag = txn.construct_object(&tag_class, vec!["x".into()]).unwrap();
        let post = txn
            .construct_object(
                &post_class,
                vec!["hello".into(), FieldValue::Ref(tag.reference())],
            )
            .unwrap();
        assert_eq!(
            post.get_object("tag").unwrap().unwrap().reference(),
            tag.reference()
        );

        // A Post reference is not a Tag.
        let err = txn
            .construct_object(
                &post_class,
                vec!["bad".into(), FieldValue::Ref(post.reference())],
            )
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn test_list_add_iterate_in_key_order() {
        let session = test_session();
        let txn = open(&session);
        define_person(&txn);
        let person = txn.find_class("Person").unwrap().unwrap();

        let alice = txn
            .construct_object(
                &person,
                vec!["Alice".into(), FieldValue::Null, FieldValue::Null],
            )
            .unwrap();
        let carol = txn
            .construct_object(
                &person,
                vec!["Carol".into(), FieldValue::Null, FieldValue::Null],
            )
            .unwrap();
        let bob = txn
            .construct_object(
                &person,
                vec!["Bob".into(), FieldValue::Null, FieldValue::Null],
            )
            .unwrap();

        let friends = alice.get_list("friends").unwrap();
        friends.add(&carol).unwrap();
        friends.add(&bob).unwrap();

        let names: Vec<Option<String>> = friends
            .objects()
            .unwrap()
            .iter()
            .map(|o| o.get_string("name").unwrap())
            .collect();
        assert_eq!(
            names,
            vec![Some("Bob".to_string()), Some("Carol".to_string())]
        );
        assert_eq!(friends.len().unwrap(), 2);
        assert!(friends.contains(bob.reference()).unwrap());
        assert!(friends.contains_key("Carol").unwrap());
        assert!(!friends.contains_key("Dave").unwrap());
    }

    #[test]
    fn test_list_views_clamp() {
        let session = test_session();
        let txn = open(&session);
        define_person(&txn);
        let person = txn.find_class("Person").unwrap().unwrap();
        let root = txn
            .construct_object(
                &person,
                vec!["root".into(), FieldValue::Null, FieldValue::Null],
            )
            .unwrap();
        let list = root.get_list("friends").unwrap();

        for name in ["a", "b", "c", "d", "e"] {
            let p = txn
                .construct_object(
                    &person,
                    vec![(*name).into(), FieldValue::Null, FieldValue::Null],
                )
                .unwrap();
            list.add(&p).unwrap();
        }

        let sub = list.sub("b", "e");
        assert_eq!(sub.len().unwrap(), 3);
        // A child view clamps to the parent's bounds.
        let narrower = sub.sub("a", "d");
        assert_eq!(narrower.len().unwrap(), 2); // b, c
        assert_eq!(sub.head("c").len().unwrap(), 1); // b
        assert_eq!(sub.tail("c").len().unwrap(), 2); // c, d
    }

    #[test]
    fn test_named_items() {
        let session = test_session();
        let txn = open(&session);
        define_person(&txn);
        let person = txn.find_class("Person").unwrap().unwrap();
        let alice = txn
            .construct_object(
                &person,
                vec!["Alice".into(), FieldValue::Null, FieldValue::Null],
            )
            .unwrap();

        txn.add_named_item("root", &alice).unwrap();
        let fetched = txn.get_named_item("root").unwrap().unwrap();
        assert_eq!(fetched.reference(), alice.reference());
        assert_eq!(fetched.get_string("name").unwrap(), Some("Alice".into()));

        assert!(txn.get_named_item("missing").unwrap().is_none());

        // Names are unique.
        let err = txn.add_named_item("root", &alice).unwrap_err();
        assert!(err.is_constraint_violation());

        assert_eq!(txn.named_items_list().len().unwrap(), 1);
        assert!(txn.remove_named_item("root").unwrap());
        assert!(!txn.remove_named_item("root").unwrap());
        assert!(txn.get_named_item("root").unwrap().is_none());
    }

    #[test]
    fn test_named_items_visible_after_commit() {
        let session = test_session();
        let txn = open(&session);
        define_person(&txn);
        let person = txn.find_class("Person").unwrap().unwrap();
        let alice = txn
            .construct_object(
                &person,
                vec!["Alice".into(), FieldValue::Null, FieldValue::Null],
            )
            .unwrap();
        txn.add_named_item("root", &alice).unwrap();
        txn.commit().unwrap();

        let txn2 = open(&session);
        let fetched = txn2.get_named_item("root").unwrap().unwrap();
        assert_eq!(fetched.get_string("name").unwrap(), Some("Alice".into()));
    }

    #[test]
    fn test_data_blob_read_write() {
        let session = test_session();
        let txn = open(&session);
        let mut creator = txn.class_creator();
        creator
            .define_class("File")
            .string_field("name", false)
            .data_field("content");
        creator.validate_and_complete().unwrap();

        let file_class = txn.find_class("File").unwrap().unwrap();
        let file = txn
            .construct_object(&file_class, vec!["hello.txt".into(), FieldValue::Null])
            .unwrap();

        let mut data = file.get_data("content").unwrap();
        data.write(b"hello, ").unwrap();
        data.write(b"world").unwrap();
        assert_eq!(data.size().unwrap(), 12);

        data.set_position(7);
        let mut buf = [0u8; 5];
        data.read(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert_eq!(data.read_all().unwrap(), b"hello, world");

        txn.commit().unwrap();

        let txn2 = open(&session);
        let file2 = txn2
            .get_object(&file_class, file.reference())
            .unwrap();
        assert_eq!(file2.get_data("content").unwrap().read_all().unwrap(), b"hello, world");
    }

    #[test]
    fn test_read_only_transaction_rejects_mutation() {
        let session = test_session();
        let setup = open(&session);
        define_person(&setup);
        setup.commit().unwrap();

        let ro =
            ObjectTransaction::open_read_only(Arc::clone(&session), Arc::new(PassthroughRouter))
                .unwrap();
        assert!(ro.find_class("Person").unwrap().is_some());

        let person = ro.find_class("Person").unwrap().unwrap();
        let err = ro
            .construct_object(
                &person,
                vec!["x".into(), FieldValue::Null, FieldValue::Null],
            )
            .unwrap_err();
        assert!(matches!(err, Error::ReadOnlyViolation));
        // The violation is fatal.
        assert_eq!(ro.status(), TxStatus::Rejected);
        assert!(ro.find_class("Person").is_err());
    }

    #[test]
    fn test_snapshot_isolation_between_object_transactions() {
        let session = test_session();
        let setup = open(&session);
        define_person(&setup);
        setup.commit().unwrap();

        let t1 = open(&session);
        let t2 = open(&session);

        let person = t1.find_class("Person").unwrap().unwrap();
        let alice = t1
            .construct_object(
                &person,
                vec!["Alice".into(), FieldValue::Null, FieldValue::Null],
            )
            .unwrap();
        t1.add_named_item("root", &alice).unwrap();
        t1.commit().unwrap();

        // t2 still reads its base snapshot.
        assert!(t2.get_named_item("root").unwrap().is_none());

        // A refresh (new transaction) sees it.
        let t3 = open(&session);
        assert!(t3.get_named_item("root").unwrap().is_some());
    }

    #[test]
    fn test_lookup_resolves_every_allocated_reference() {
        let session = test_session();
        let txn = open(&session);
        define_person(&txn);
        let person = txn.find_class("Person").unwrap().unwrap();
        let alice = txn
            .construct_object(
                &person,
                vec!["Alice".into(), FieldValue::Null, FieldValue::Null],
            )
            .unwrap();

        // The class reference and the friends-list sub-reference both
        // resolve through the lookup table.
        let friends_ref = alice.get("friends").unwrap();
        let FieldValue::Ref(friends_ref) = friends_ref else {
            panic!("friends should hold a reference")
        };
        let list = alice.get_list("friends").unwrap();
        assert_eq!(list.reference(), friends_ref);
        assert_eq!(list.len().unwrap(), 0);
    }

    #[test]
    fn test_construct_object_at_fixed_reference() {
        let session = test_session();
        let txn = open(&session);
        define_person(&txn);
        let person = txn.find_class("Person").unwrap().unwrap();
        let fixed = Reference::new(42, 43);
        let obj = txn
            .construct_object_at(
                &person,
                fixed,
                vec!["Fixed".into(), FieldValue::Null, FieldValue::Null],
            )
            .unwrap();
        assert_eq!(obj.reference(), fixed);
        assert_eq!(
            txn.get_object(&person, fixed).unwrap().get_string("name").unwrap(),
            Some("Fixed".into())
        );
    }

    #[test]
    fn test_garbage_collection_stub() {
        let session = test_session();
        let txn = open(&session);
        assert!(!txn.do_garbage_collection().unwrap());
    }
}
