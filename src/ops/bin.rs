use chrono::{DateTime, Utc};

use crate::model::ids::TaskId;
use crate::model::store::TaskStore;
use crate::model::task::Task;
use crate::ops::task_ops::TaskError;
use crate::ops::{cascade, tree};

/// Move a task and its live descendants into the Bin. Returns the ids that
/// were stamped.
pub fn soft_delete(
    store: &mut TaskStore,
    id: &TaskId,
    now: DateTime<Utc>,
) -> Result<Vec<TaskId>, TaskError> {
    let task = store.task(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
    if task.is_deleted() {
        return Err(TaskError::InBin(id.clone()));
    }
    let parent = task.parent_id.clone();

    let mut stamped = Vec::new();
    for tid in tree::subtree(store, id) {
        if let Some(t) = store.task_mut(&tid)
            && !t.is_deleted()
        {
            t.deleted_at = Some(now);
            t.touch(now);
            stamped.push(tid);
        }
    }

    if let Some(pid) = parent {
        if let Some(p) = store.task_mut(&pid) {
            p.touch(now);
        }
        cascade::refresh_ancestors_from(store, &pid, now);
    }
    Ok(stamped)
}

/// Take a task out of the Bin. Its descendants stay binned. If its parent is
/// still binned (or gone) the task comes back as a root.
pub fn restore(store: &mut TaskStore, id: &TaskId, now: DateTime<Utc>) -> Result<(), TaskError> {
    let task = store.task(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
    if !task.is_deleted() {
        return Err(TaskError::NotInBin(id.clone()));
    }
    let parent_live = task
        .parent_id
        .as_ref()
        .and_then(|p| store.task(p))
        .is_some_and(|p| !p.is_deleted());
    let parent = task.parent_id.clone();

    if let Some(t) = store.task_mut(id) {
        t.deleted_at = None;
        t.touch(now);
        if !parent_live {
            t.parent_id = None;
            t.depth = 0;
        }
    }
    tree::recompute_subtree_depths(store, id);

    if parent_live && let Some(pid) = parent {
        cascade::refresh_ancestors_from(store, &pid, now);
    }
    Ok(())
}

/// Physically remove a binned task together with all of its descendants.
/// Returns the removed ids.
pub fn hard_delete(store: &mut TaskStore, id: &TaskId) -> Result<Vec<TaskId>, TaskError> {
    let task = store.task(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
    if !task.is_deleted() {
        return Err(TaskError::NotInBin(id.clone()));
    }
    let doomed = tree::subtree(store, id);
    for tid in &doomed {
        store.remove(tid);
    }
    Ok(doomed)
}

/// Hard-delete everything in the Bin.
pub fn empty_bin(store: &mut TaskStore) -> Vec<TaskId> {
    let binned: Vec<TaskId> = bin_tasks(store).map(|t| t.id.clone()).collect();
    let mut removed = Vec::new();
    for id in binned {
        // an ancestor may already have taken it
        if store.contains(&id)
            && let Ok(ids) = hard_delete(store, &id)
        {
            removed.extend(ids);
        }
    }
    removed
}

/// Everything currently in the Bin, in arena order
pub fn bin_tasks(store: &TaskStore) -> impl Iterator<Item = &Task> {
    store.tasks().filter(|t| t.is_deleted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn later() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 2, 9, 30, 0).unwrap()
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
    fn soft_delete_stamps_subtree() {
        let mut store = sample_store();
        let stamped = soft_delete(&mut store, &"b".into(), now()).unwrap();
        assert_eq!(stamped, vec![TaskId::from("b"), TaskId::from("c")]);
        assert_eq!(store.len(), 4);
        let bin: Vec<&str> = bin_tasks(&store).map(|t| t.id.as_str()).collect();
        assert_eq!(bin, vec!["b", "c"]);
        assert_eq!(store.task(&"a".into()).unwrap().updated_at, Some(now()));
    }

    #[test]
    fn delete_then_restore_round_trips() {
        let mut store = sample_store();
        let before = store.task(&"b".into()).unwrap().clone();
        soft_delete(&mut store, &"b".into(), now()).unwrap();
        restore(&mut store, &"b".into(), later()).unwrap();

        let mut after = store.task(&"b".into()).unwrap().clone();
        assert_eq!(after.updated_at, Some(later()));
        after.updated_at = before.updated_at;
        assert_eq!(after, before);
        // the child is not restored with it
        assert!(store.task(&"c".into()).unwrap().is_deleted());
    }

    #[test]
    fn restoring_child_of_binned_parent_makes_root() {
        let mut store = sample_store();
        soft_delete(&mut store, &"a".into(), now()).unwrap();
        restore(&mut store, &"c".into(), later()).unwrap();
        let c = store.task(&"c".into()).unwrap();
        assert!(c.parent_id.is_none());
        assert_eq!(c.depth, 0);
        assert!(!c.is_deleted());
    }

    #[test]
    fn hard_delete_only_from_bin() {
        let mut store = sample_store();
        assert_eq!(
            hard_delete(&mut store, &"a".into()),
            Err(TaskError::NotInBin("a".into()))
        );
        soft_delete(&mut store, &"a".into(), now()).unwrap();
        let removed = hard_delete(&mut store, &"a".into()).unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(store.order(), vec![TaskId::from("d")]);
    }

    #[test]
    fn hard_delete_takes_binned_children() {
        let mut store = sample_store();
        soft_delete(&mut store, &"b".into(), now()).unwrap();
        // c stays attached to b while both are binned
        hard_delete(&mut store, &"b".into()).unwrap();
        assert!(!store.contains(&"c".into()));
    }

    #[test]
    fn empty_bin_clears_everything_binned() {
        let mut store = sample_store();
        soft_delete(&mut store, &"a".into(), now()).unwrap();
        soft_delete(&mut store, &"d".into(), now()).unwrap();
        let removed = empty_bin(&mut store);
        assert_eq!(removed.len(), 4);
        assert!(store.is_empty());
    }

    #[test]
    fn double_delete_is_rejected() {
        let mut store = sample_store();
        soft_delete(&mut store, &"d".into(), now()).unwrap();
        assert_eq!(
            soft_delete(&mut store, &"d".into(), now()),
            Err(TaskError::InBin("d".into()))
        );
    }
}
