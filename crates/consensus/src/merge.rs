//! The merge procedure
//!
//! Given a flushed proposal and the chain of snapshots committed since its
//! base, decide whether the proposal's logical effects can be replayed onto
//! the latest snapshot, and produce the merged snapshot if so. The caller
//! holds the per-path commit lock; everything here is strictly sequential.
//!
//! The procedure works entirely from object logs:
//!
//! 1. A proposal without a base root (an introduced proposal) publishes
//!    unconditionally, as does a proposal whose base is still current.
//! 2. Dictionary additions merge idempotently.
//! 3. Resource key allocations are compared against every intervening
//!    snapshot's allocations; a clashing key is remapped to a fresh key and
//!    the resource's bytes are copied under the new key, rebinding the
//!    reference in the lookup table.
//! 4. An object or data blob changed both by the proposal and by any
//!    intervening snapshot is a commit fault.
//! 5. Lists touched only by the proposal are copied wholesale; lists also
//!    touched by intervening snapshots are rebuilt by replaying the
//!    proposal's adds and removes against the current list, converting
//!    constraint violations into commit faults.
//!
//! The merged snapshot gets a fresh object log describing the replayed
//! effects, so the next merge sees this commit's changes like any other's.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use basalt_core::{
    Error, Reference, Result, SnapshotAddress, StoreKey, StoreSession, StoreTransaction,
};
use basalt_engine::classes::parse_field_type;
use basalt_engine::list::{list_insert, list_remove, ListSpec, RefListFile};
use basalt_engine::log::{LogEntry, ObjectLog};
use basalt_engine::lookup::random_stride;
use basalt_engine::view::StoreView;
use basalt_engine::FieldType;

/// Proposal log entries split by kind, in log order.
#[derive(Default)]
struct ProposalEffects {
    key_allocs: Vec<(StoreKey, Reference)>,
    dict_adds: Vec<Reference>,
    object_changes: Vec<(Reference, Reference)>,
    data_changes: Vec<Reference>,
    list_changes: Vec<Reference>,
    list_adds: Vec<(Reference, Reference, Reference)>,
    list_removes: Vec<(Reference, Reference, Reference)>,
}

impl ProposalEffects {
    fn from_entries(entries: Vec<LogEntry>) -> Self {
        let mut fx = ProposalEffects::default();
        for entry in entries {
            match entry {
                LogEntry::KeyAlloc { key, reference } => fx.key_allocs.push((key, reference)),
                LogEntry::DictionaryAdd { reference } => fx.dict_adds.push(reference),
                LogEntry::ObjectChange { class, object } => {
                    fx.object_changes.push((class, object))
                }
                LogEntry::DataChange { data_ref } => fx.data_changes.push(data_ref),
                LogEntry::ListChange { list } => fx.list_changes.push(list),
                LogEntry::ListAdd {
                    list,
                    object,
                    list_class,
                } => fx.list_adds.push((list, object, list_class)),
                LogEntry::ListRemove {
                    list,
                    object,
                    list_class,
                } => fx.list_removes.push((list, object, list_class)),
            }
        }
        fx
    }
}

/// Resolve the runtime order spec of a list from its type class.
fn list_spec_in(view: &mut StoreView, list_class: Reference) -> Result<ListSpec> {
    let type_code = view
        .dictionary()?
        .get_type(list_class)?
        .ok_or_else(|| {
            Error::Corruption(format!("List class {list_class} missing from dictionary"))
        })?;
    let FieldType::List(type_spec) = parse_field_type(&type_code)? else {
        return Err(Error::Corruption(format!(
            "Dictionary entry {type_code:?} is not a list type"
        )));
    };
    view.list_spec_for(&type_spec)
}

fn copy_file(
    src_view: &StoreView,
    src_key: StoreKey,
    dst_view: &StoreView,
    dst_key: StoreKey,
) -> Result<()> {
    let mut src = src_view.store().file(src_key)?;
    let mut dst = dst_view.store().file(dst_key)?;
    dst.replicate_from(src.as_mut())
}

/// Merge `proposal` into the latest snapshot of the session's path and
/// publish the result. Caller holds the path's commit lock.
pub(crate) fn merge_commit(
    session: &dyn StoreSession,
    proposal: SnapshotAddress,
) -> Result<SnapshotAddress> {
    let mut prop_view = StoreView::new(session.create_transaction(proposal)?);
    let mut prop_log = ObjectLog::open(prop_view.store())?;

    // Introduced proposals publish unconditionally.
    let Some(base_root) = prop_log.base_root()? else {
        debug!(path = session.path_name(), %proposal, "publishing introduced proposal");
        return session.publish(proposal);
    };
    let roots = session.snapshots_since(base_root)?;
    if roots.is_empty() {
        debug!(path = session.path_name(), %proposal, "no intervening snapshots; publishing");
        return session.publish(proposal);
    }
    debug!(
        path = session.path_name(),
        %proposal,
        %base_root,
        intervening = roots.len(),
        "merging proposal against newer history"
    );

    let fx = ProposalEffects::from_entries(prop_log.entries()?);

    // Logs of every snapshot committed since the base. The transactions
    // stay alive alongside their logs' file handles.
    let mut root_logs = Vec::with_capacity(roots.len());
    for root in &roots {
        let txn: Box<dyn StoreTransaction> = session.create_transaction(*root)?;
        let log = ObjectLog::open(txn.as_ref())?;
        root_logs.push((txn, log));
    }

    // Working transaction on the current snapshot. Its log is rebuilt to
    // describe this commit's replayed effects.
    let current_addr = session.current_snapshot()?;
    let mut cur_view = StoreView::new(session.create_transaction(current_addr)?);
    let mut cur_log = ObjectLog::open(cur_view.store())?;
    cur_log.clear()?;
    cur_log.set_base_root(Some(current_addr))?;

    // Dictionary merge: bindings are value-identical or new, never clash.
    {
        let mut prop_dict = prop_view.dictionary()?;
        let mut cur_dict = cur_view.dictionary()?;
        for reference in &fx.dict_adds {
            let type_string = prop_dict.get_type(*reference)?.ok_or_else(|| {
                Error::Corruption(format!(
                    "DictionaryAdd {reference} has no entry in the proposal dictionary"
                ))
            })?;
            cur_dict.add(&type_string, *reference)?;
            cur_log.log_dictionary_add(*reference)?;
        }
    }

    // Key allocation remap: a key also allocated by any intervening
    // snapshot moves to a fresh key.
    let mut remap: HashMap<StoreKey, bool> =
        fx.key_allocs.iter().map(|(k, _)| (*k, false)).collect();
    for (_, root_log) in root_logs.iter_mut() {
        for (key, _) in &fx.key_allocs {
            if root_log.has_key_alloc(*key)? {
                remap.insert(*key, true);
            }
        }
    }
    if let Some(max_key) = fx.key_allocs.iter().map(|(k, _)| *k).max() {
        cur_view.counter()?.advance_past(max_key)?;
    }
    for (key, reference) in &fx.key_allocs {
        let clashed = remap[key];
        let target = if clashed {
            let stride = random_stride(cur_view.limits().max_key_stride);
            cur_view.counter()?.allocate(stride)?
        } else {
            *key
        };
        // The working transaction never saw the proposal's resources, so
        // the bytes are copied across either way.
        copy_file(&prop_view, *key, &cur_view, target)?;
        cur_view.bind_key(*reference, target)?;
        cur_log.log_key_alloc(target, *reference)?;
        if clashed {
            debug!(%reference, old = %key, new = %target, "remapped clashed resource key");
        }
    }

    // Object/data clash detection: the same object or blob modified by the
    // proposal and by any intervening snapshot cannot be merged.
    for (_, root_log) in root_logs.iter_mut() {
        for (class, object) in &fx.object_changes {
            if root_log.has_object_change(*class, *object)? {
                return Err(Error::CommitFault(format!(
                    "Object at reference {object} was concurrently modified"
                )));
            }
        }
        for data_ref in &fx.data_changes {
            if root_log.has_data_change(*data_ref)? {
                return Err(Error::CommitFault(format!(
                    "Data at reference {data_ref} was concurrently modified"
                )));
            }
        }
    }

    // Replay object changes: carry the exact serialized records across.
    for (class, object) in &fx.object_changes {
        let record = prop_view.bucket(*class)?.get(*object)?.ok_or_else(|| {
            Error::Corruption(format!("Changed object {object} missing from proposal"))
        })?;
        cur_view.bucket(*class)?.replace_or_insert(&record)?;
        cur_log.log_object_change(*class, *object)?;
    }
    // Replay data changes: replicate blob content under the (possibly
    // remapped) destination key.
    for data_ref in &fx.data_changes {
        let src_key = prop_view.resolve_key(*data_ref)?;
        let dst_key = cur_view.resolve_key(*data_ref)?;
        copy_file(&prop_view, src_key, &cur_view, dst_key)?;
        cur_log.log_data_change(*data_ref)?;
    }

    // List merging. A list nobody else touched is copied wholesale along
    // with its log entries; a list with concurrent changes is rebuilt by
    // replaying this proposal's operations against the current state.
    let mut builds: HashSet<Reference> = HashSet::new();
    for list in &fx.list_changes {
        for (_, root_log) in root_logs.iter_mut() {
            if root_log.has_list_change(*list)? {
                builds.insert(*list);
                break;
            }
        }
    }
    for list in &fx.list_changes {
        if builds.contains(list) {
            continue;
        }
        let src_key = prop_view.resolve_key(*list)?;
        let dst_key = cur_view.resolve_key(*list)?;
        copy_file(&prop_view, src_key, &cur_view, dst_key)?;
        cur_log.log_list_change(*list)?;
        for (l, object, list_class) in &fx.list_adds {
            if l == list {
                cur_log.append(&LogEntry::ListAdd {
                    list: *l,
                    object: *object,
                    list_class: *list_class,
                })?;
            }
        }
        for (l, object, list_class) in &fx.list_removes {
            if l == list {
                cur_log.append(&LogEntry::ListRemove {
                    list: *l,
                    object: *object,
                    list_class: *list_class,
                })?;
            }
        }
    }
    for (list, object, list_class) in &fx.list_adds {
        if !builds.contains(list) {
            continue;
        }
        let spec = list_spec_in(&mut cur_view, *list_class)?;
        let key = cur_view.resolve_key(*list)?;
        let mut file = RefListFile::new(cur_view.store().file(key)?);
        match list_insert(&mut file, &spec, &mut cur_view, *object) {
            Ok(()) => cur_log.log_list_add(*list, *object, *list_class)?,
            Err(Error::ConstraintViolation(detail)) => {
                return Err(Error::CommitFault(format!(
                    "Duplicate add object to list operation ({detail})"
                )))
            }
            Err(e) => return Err(e),
        }
    }
    for (list, object, list_class) in &fx.list_removes {
        if !builds.contains(list) {
            continue;
        }
        let spec = list_spec_in(&mut cur_view, *list_class)?;
        let key = cur_view.resolve_key(*list)?;
        let mut file = RefListFile::new(cur_view.store().file(key)?);
        if !list_remove(&mut file, &spec, &mut cur_view, *object)? {
            // The entry is already gone: removed concurrently.
            return Err(Error::CommitFault(
                "Duplicate remove object from list operation".into(),
            ));
        }
        cur_log.log_list_remove(*list, *object, *list_class)?;
    }

    let merged = cur_view.flush()?;
    let published = session.publish(merged)?;
    info!(
        path = session.path_name(),
        %proposal,
        %published,
        "merged proposal published"
    );
    Ok(published)
}
