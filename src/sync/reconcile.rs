//! Folding server push events into the local store.
//!
//! Every merge is by id and by value: fields the event names overwrite the
//! local ones, and reapplying an event that is already reflected locally
//! changes nothing. Depth is always derived locally from the parent chain.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::ids::{ListId, TaskId};
use crate::model::store::TaskStore;
use crate::model::task::{Task, TaskPatch};
use crate::ops::{bin, tree};
use crate::sync::events::RemoteEvent;

/// What folding one event did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Applied,
    /// Already reflected locally
    Unchanged,
    /// Names something the store does not hold (a stale or foreign event)
    Skipped,
}

impl Merge {
    pub fn changed(self) -> bool {
        self == Merge::Applied
    }

    fn from_bool(changed: bool) -> Merge {
        if changed { Merge::Applied } else { Merge::Unchanged }
    }

    fn or(self, other: Merge) -> Merge {
        match (self, other) {
            (Merge::Applied, _) | (_, Merge::Applied) => Merge::Applied,
            (Merge::Unchanged, _) | (_, Merge::Unchanged) => Merge::Unchanged,
            _ => Merge::Skipped,
        }
    }
}

pub fn apply_event(store: &mut TaskStore, event: &RemoteEvent, now: DateTime<Utc>) -> Merge {
    match event {
        RemoteEvent::TaskCreated(task) => merge_created(store, task, now),
        RemoteEvent::TaskUpdated {
            id,
            changes,
            children,
        } => {
            let mut result = merge_patch(store, id, changes, now);
            for child in children {
                result = result.or(merge_patch(store, &child.id, &child.changes, now));
            }
            result
        }
        RemoteEvent::TaskDeleted {
            id,
            permanent: true,
            ..
        } => {
            if !store.contains(id) {
                return Merge::Skipped;
            }
            for tid in tree::subtree(store, id) {
                store.remove(&tid);
            }
            Merge::Applied
        }
        RemoteEvent::TaskDeleted { id, deleted_at, .. } => {
            mark_deleted(store, id, deleted_at.unwrap_or(now))
        }
        RemoteEvent::TaskRestored { id } => match store.task(id) {
            None => Merge::Skipped,
            Some(t) if !t.is_deleted() => Merge::Unchanged,
            Some(_) => Merge::from_bool(bin::restore(store, id, now).is_ok()),
        },
        RemoteEvent::ListUpserted(list) => {
            let changed = store.list(&list.id) != Some(list);
            if changed {
                store.upsert_list(list.clone());
            }
            Merge::from_bool(changed)
        }
        RemoteEvent::ListDeleted(id) => {
            let before = store.len();
            let existed = store.remove_list(id).is_some();
            removed(existed || store.len() != before)
        }
        RemoteEvent::GroupUpserted(group) => {
            let changed = store.group(&group.id) != Some(group);
            if changed {
                store.upsert_group(group.clone());
            }
            Merge::from_bool(changed)
        }
        RemoteEvent::GroupDeleted(id) => removed(store.remove_group(id).is_some()),
        RemoteEvent::TagUpserted(tag) => {
            let changed = store.tag(&tag.id) != Some(tag);
            if changed {
                store.upsert_tag(tag.clone());
            }
            Merge::from_bool(changed)
        }
        RemoteEvent::TagDeleted(id) => removed(store.remove_tag(id).is_some()),
        RemoteEvent::Heartbeat | RemoteEvent::Ignored { .. } => Merge::Unchanged,
    }
}

fn removed(existed: bool) -> Merge {
    if existed { Merge::Applied } else { Merge::Skipped }
}

/// Insert a task the store has not seen, or merge it field by field into
/// the one it has. Unknown parents make the task a root.
fn merge_created(store: &mut TaskStore, task: &Task, now: DateTime<Utc>) -> Merge {
    if let Some(existing) = store.task(&task.id) {
        let mut patch = TaskPatch::diff(existing, task);
        patch.updated_at = task.updated_at;
        return merge_patch(store, &task.id, &patch, now);
    }

    let mut task = task.clone();
    let parent_ok = task
        .parent_id
        .as_ref()
        .and_then(|p| store.task(p))
        .is_some_and(|p| p.list_id == task.list_id && (task.is_deleted() || !p.is_deleted()));
    if !parent_ok && let Some(pid) = task.parent_id.take() {
        debug!(task = %task.id, parent = %pid, "remote task has an unknown parent, adding as root");
    }
    task.depth = tree::depth_under(store, task.parent_id.as_ref());

    let index = match &task.parent_id {
        Some(pid) => tree::subtree(store, pid)
            .last()
            .and_then(|l| store.index_of(l))
            .map_or(store.len(), |i| i + 1),
        None => store.len(),
    };
    store.insert_at(index, task);
    Merge::Applied
}

/// Merge a partial update into a known task, then re-derive depths if the
/// parent moved.
///
/// A list change carries the whole subtree and detaches the task unless the
/// update names a valid parent in the new list. `deletedAt` goes through the
/// Bin rules rather than being written directly.
fn merge_patch(store: &mut TaskStore, id: &TaskId, changes: &TaskPatch, now: DateTime<Utc>) -> Merge {
    let Some(task) = store.task(id) else {
        return Merge::Skipped;
    };
    let mut patch = changes.clone();
    patch.depth = None;
    let bin_change = patch.deleted_at.take();
    let list_change = patch.list_id.take().filter(|l| l != &task.list_id);
    let list_id = list_change.as_ref().unwrap_or(&task.list_id);
    let live_after = match bin_change {
        Some(Some(_)) => false,
        Some(None) => true,
        None => !task.is_deleted(),
    };

    // a parent that would break the forest is dropped from the merge
    let bad_parent = match &patch.parent_id {
        Some(Some(pid)) => {
            let valid = pid != id
                && !tree::is_ancestor(store, id, pid)
                && store
                    .task(pid)
                    .is_some_and(|p| &p.list_id == list_id && (!live_after || !p.is_deleted()));
            if !valid {
                debug!(task = %id, parent = %pid, "ignoring remote parent change");
            }
            !valid
        }
        _ => false,
    };
    if bad_parent {
        patch.parent_id = None;
    }
    // the current parent belongs to the old list
    if list_change.is_some() && patch.parent_id.is_none() {
        patch.parent_id = Some(None);
    }

    let mut changed = false;
    if let Some(list) = &list_change {
        move_subtree_to_list(store, id, list);
        changed = true;
    }

    let Some(task) = store.task_mut(id) else {
        return Merge::Skipped;
    };
    changed |= patch.apply_to(task);
    if patch.parent_id.is_some() {
        let depth = tree::depth_under(store, store.task(id).and_then(|t| t.parent_id.as_ref()));
        if let Some(task) = store.task_mut(id)
            && task.depth != depth
        {
            task.depth = depth;
            changed = true;
        }
        tree::recompute_subtree_depths(store, id);
    }

    match bin_change {
        Some(Some(at)) => changed |= mark_deleted(store, id, at).changed(),
        Some(None) if store.task(id).is_some_and(Task::is_deleted) => {
            changed |= bin::restore(store, id, now).is_ok();
        }
        _ => {}
    }
    Merge::from_bool(changed)
}

/// Relabel a subtree with `list`, dropping groups that belong elsewhere
fn move_subtree_to_list(store: &mut TaskStore, id: &TaskId, list: &ListId) {
    for tid in tree::subtree(store, id) {
        let stale_group = store
            .task(&tid)
            .and_then(|t| t.group_id.as_ref())
            .and_then(|g| store.group(g))
            .is_some_and(|g| &g.list_id != list);
        if let Some(t) = store.task_mut(&tid) {
            t.list_id = list.clone();
            if stale_group {
                t.group_id = None;
            }
        }
    }
}

fn mark_deleted(store: &mut TaskStore, id: &TaskId, at: DateTime<Utc>) -> Merge {
    match store.task(id) {
        None => return Merge::Skipped,
        Some(t) if t.is_deleted() => return Merge::Unchanged,
        Some(_) => {}
    }
    for tid in tree::subtree(store, id) {
        if let Some(t) = store.task_mut(&tid)
            && !t.is_deleted()
        {
            t.deleted_at = Some(at);
        }
    }
    Merge::Applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::list::Group;
    use crate::model::tag::Tag;
    use crate::ops::check;
    use crate::sync::events::{ChildUpdate, decode_sse};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn task(id: &str, parent: Option<&str>, depth: u32) -> Task {
        let mut t = Task::new(id.into(), id, "L1".into());
        t.parent_id = parent.map(TaskId::from);
        t.depth = depth;
        t
    }

    fn sample_store() -> TaskStore {
        TaskStore::from_tasks(vec![
            task("a", None, 0),
            task("b", Some("a"), 1),
            task("c", Some("b"), 2),
            task("d", None, 0),
        ])
    }

    #[test]
    fn update_applied_twice_equals_once() {
        let event = decode_sse(
            r#"{"entity":"task","type":"updated","id":"b",
                "changes":{"title":"Renamed","priority":"high","updatedAt":"2025-05-01T13:00:00Z"}}"#,
        )
        .unwrap();
        let mut once = sample_store();
        assert_eq!(apply_event(&mut once, &event, now()), Merge::Applied);
        let mut twice = once.clone();
        assert_eq!(apply_event(&mut twice, &event, now()), Merge::Unchanged);
        assert_eq!(once, twice);
        assert_eq!(once.order(), twice.order());
    }

    #[test]
    fn update_for_unknown_task_is_skipped() {
        let mut store = sample_store();
        let event = RemoteEvent::TaskUpdated {
            id: "ghost".into(),
            changes: TaskPatch {
                title: Some("x".into()),
                ..Default::default()
            },
            children: vec![],
        };
        assert_eq!(apply_event(&mut store, &event, now()), Merge::Skipped);
        assert_eq!(store, sample_store());
    }

    #[test]
    fn cascading_child_updates_are_merged() {
        let mut store = sample_store();
        let done = TaskPatch {
            completed: Some(true),
            ..Default::default()
        };
        let event = RemoteEvent::TaskUpdated {
            id: "a".into(),
            changes: done.clone(),
            children: vec![
                ChildUpdate {
                    id: "b".into(),
                    changes: done.clone(),
                },
                ChildUpdate {
                    id: "c".into(),
                    changes: done,
                },
            ],
        };
        apply_event(&mut store, &event, now());
        for id in ["a", "b", "c"] {
            assert!(store.task(&id.into()).unwrap().completed);
        }
        assert!(!store.task(&"d".into()).unwrap().completed);
    }

    #[test]
    fn remote_reparent_recomputes_depths() {
        let mut store = sample_store();
        let event = RemoteEvent::TaskUpdated {
            id: "b".into(),
            changes: TaskPatch {
                parent_id: Some(Some("d".into())),
                depth: Some(7),
                ..Default::default()
            },
            children: vec![],
        };
        assert_eq!(apply_event(&mut store, &event, now()), Merge::Applied);
        assert_eq!(store.task(&"b".into()).unwrap().depth, 1);
        assert_eq!(store.task(&"c".into()).unwrap().depth, 2);
        assert!(check::check_store(&store).valid);
    }

    #[test]
    fn remote_cycle_is_refused() {
        let mut store = sample_store();
        let event = RemoteEvent::TaskUpdated {
            id: "a".into(),
            changes: TaskPatch {
                parent_id: Some(Some("c".into())),
                ..Default::default()
            },
            children: vec![],
        };
        assert_eq!(apply_event(&mut store, &event, now()), Merge::Unchanged);
        assert!(store.task(&"a".into()).unwrap().parent_id.is_none());
    }

    #[test]
    fn created_child_lands_under_parent() {
        let mut store = sample_store();
        let mut t = task("srv-1", Some("a"), 0);
        t.title = "new".into();
        let event = RemoteEvent::TaskCreated(t);
        assert_eq!(apply_event(&mut store, &event, now()), Merge::Applied);
        let order: Vec<String> = store.order().iter().map(|i| i.to_string()).collect();
        assert_eq!(order, vec!["a", "b", "c", "srv-1", "d"]);
        assert_eq!(store.task(&"srv-1".into()).unwrap().depth, 1);

        // a duplicate create is a no-op
        assert_eq!(apply_event(&mut store, &event, now()), Merge::Unchanged);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn created_with_unknown_parent_becomes_root() {
        let mut store = sample_store();
        let event = RemoteEvent::TaskCreated(task("srv-2", Some("nowhere"), 3));
        apply_event(&mut store, &event, now());
        let t = store.task(&"srv-2".into()).unwrap();
        assert!(t.parent_id.is_none());
        assert_eq!(t.depth, 0);
    }

    #[test]
    fn soft_and_permanent_delete() {
        let mut store = sample_store();
        let soft = RemoteEvent::TaskDeleted {
            id: "b".into(),
            permanent: false,
            deleted_at: None,
        };
        assert_eq!(apply_event(&mut store, &soft, now()), Merge::Applied);
        assert!(store.task(&"c".into()).unwrap().is_deleted());
        assert_eq!(apply_event(&mut store, &soft, now()), Merge::Unchanged);

        let restore = RemoteEvent::TaskRestored { id: "b".into() };
        assert_eq!(apply_event(&mut store, &restore, now()), Merge::Applied);
        assert!(!store.task(&"b".into()).unwrap().is_deleted());

        let hard = RemoteEvent::TaskDeleted {
            id: "a".into(),
            permanent: true,
            deleted_at: None,
        };
        assert_eq!(apply_event(&mut store, &hard, now()), Merge::Applied);
        assert_eq!(store.order(), vec![TaskId::from("d")]);
        assert_eq!(apply_event(&mut store, &hard, now()), Merge::Skipped);
    }

    #[test]
    fn remote_list_change_carries_subtree_and_detaches() {
        let mut store = sample_store();
        store.upsert_group(Group::new("g1", "Errands", "L1"));
        store.task_mut(&"c".into()).unwrap().group_id = Some("g1".into());

        // the event still names the old parent
        let event = decode_sse(
            r#"{"entity":"task","type":"updated","id":"b","changes":{"listId":"L2","parentId":"a"}}"#,
        )
        .unwrap();
        assert_eq!(apply_event(&mut store, &event, now()), Merge::Applied);

        let b = store.task(&"b".into()).unwrap();
        assert_eq!((b.list_id.as_str(), b.parent_id.clone(), b.depth), ("L2", None, 0));
        let c = store.task(&"c".into()).unwrap();
        assert_eq!(c.list_id, ListId::from("L2"));
        assert_eq!(c.parent_id, Some(TaskId::from("b")));
        assert_eq!(c.depth, 1);
        assert_eq!(c.group_id, None);
        assert!(check::check_store(&store).valid);

        assert_eq!(apply_event(&mut store, &event, now()), Merge::Unchanged);
    }

    #[test]
    fn remote_list_change_may_name_a_parent_in_the_new_list() {
        let mut store = sample_store();
        let mut e = task("e", None, 0);
        e.list_id = "L2".into();
        store.upsert(e);

        let event = decode_sse(
            r#"{"entity":"task","type":"updated","id":"b","changes":{"listId":"L2","parentId":"e"}}"#,
        )
        .unwrap();
        apply_event(&mut store, &event, now());
        let b = store.task(&"b".into()).unwrap();
        assert_eq!(b.parent_id, Some(TaskId::from("e")));
        assert_eq!(b.depth, 1);
        assert_eq!(store.task(&"c".into()).unwrap().depth, 2);
        assert!(check::check_store(&store).valid);
    }

    #[test]
    fn deleted_at_in_update_follows_bin_rules() {
        let mut store = sample_store();
        let binned = decode_sse(
            r#"{"entity":"task","type":"updated",
                "data":{"id":"a","title":"a","deletedAt":"2025-05-01T12:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(apply_event(&mut store, &binned, now()), Merge::Applied);
        for id in ["a", "b", "c"] {
            assert!(store.task(&id.into()).unwrap().is_deleted(), "{id} still live");
        }
        assert!(check::check_store(&store).valid);
        assert_eq!(apply_event(&mut store, &binned, now()), Merge::Unchanged);

        // restoring b while a is binned brings it back as a root
        let restored = decode_sse(
            r#"{"entity":"task","type":"updated","id":"b","changes":{"deletedAt":null}}"#,
        )
        .unwrap();
        assert_eq!(apply_event(&mut store, &restored, now()), Merge::Applied);
        let b = store.task(&"b".into()).unwrap();
        assert!(!b.is_deleted());
        assert_eq!((b.parent_id.clone(), b.depth), (None, 0));
        assert!(store.task(&"c".into()).unwrap().is_deleted());
        assert!(check::check_store(&store).valid);
    }

    #[test]
    fn binned_parent_is_refused_for_live_task() {
        let mut store = sample_store();
        store.task_mut(&"d".into()).unwrap().deleted_at = Some(now());
        let event = decode_sse(
            r#"{"entity":"task","type":"updated","id":"c","changes":{"parentId":"d"}}"#,
        )
        .unwrap();
        assert_eq!(apply_event(&mut store, &event, now()), Merge::Unchanged);
        assert_eq!(store.task(&"c".into()).unwrap().parent_id, Some(TaskId::from("b")));
        assert!(check::check_store(&store).valid);
    }

    #[test]
    fn tag_delete_strips_tasks() {
        let mut store = sample_store();
        let tag = RemoteEvent::TagUpserted(Tag::new("home", "Home"));
        assert_eq!(apply_event(&mut store, &tag, now()), Merge::Applied);
        assert_eq!(apply_event(&mut store, &tag, now()), Merge::Unchanged);
        store.task_mut(&"a".into()).unwrap().tags.insert("home".into());

        apply_event(&mut store, &RemoteEvent::TagDeleted("home".into()), now());
        assert!(store.task(&"a".into()).unwrap().tags.is_empty());
    }
}
