use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{GroupId, ListId, TaskId};
use crate::model::store::TaskStore;
use crate::model::task::{NewTask, Task, TaskPatch};
use crate::ops::{cascade, tree};

/// Error type for task operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("task title cannot be empty")]
    EmptyTitle,
    #[error("parent task not found: {0}")]
    ParentNotFound(TaskId),
    #[error("parent task {0} is in the bin")]
    DeletedParent(TaskId),
    #[error("task {task} and {other} belong to different lists")]
    CrossList { task: TaskId, other: TaskId },
    #[error("moving {task} under {target} would make it its own ancestor")]
    WouldCreateCycle { task: TaskId, target: TaskId },
    #[error("group {group} does not belong to list {list}")]
    GroupNotInList { group: GroupId, list: ListId },
    #[error("task {0} is not in the bin")]
    NotInBin(TaskId),
    #[error("task {0} is in the bin")]
    InBin(TaskId),
    #[error("structural fields must be changed through move or reparent")]
    StructuralChange,
    #[error("nothing to change")]
    EmptyChange,
    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

impl TaskError {
    /// Validation conditions the UI may silently ignore
    pub fn is_noop(&self) -> bool {
        matches!(self, TaskError::EmptyChange)
    }
}

/// Where to insert a new root task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InsertPosition {
    /// Append to the end of the arena
    #[default]
    Bottom,
    /// Prepend to the start
    Top,
    /// Insert directly after the task with this ID
    After(TaskId),
}

/// Which tasks a bulk completion touches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionFilter {
    #[default]
    All,
    Completed,
    Uncompleted,
    Overdue,
}

impl CompletionFilter {
    pub fn matches(self, task: &Task, now: DateTime<Utc>) -> bool {
        match self {
            CompletionFilter::All => true,
            CompletionFilter::Completed => task.completed,
            CompletionFilter::Uncompleted => !task.completed,
            CompletionFilter::Overdue => task.is_overdue(now),
        }
    }

    pub fn parse_filter(s: &str) -> Option<Self> {
        match s {
            "all" => Some(CompletionFilter::All),
            "completed" => Some(CompletionFilter::Completed),
            "uncompleted" => Some(CompletionFilter::Uncompleted),
            "overdue" => Some(CompletionFilter::Overdue),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

pub fn find_task<'a>(store: &'a TaskStore, id: &TaskId) -> Result<&'a Task, TaskError> {
    store.task(id).ok_or_else(|| TaskError::NotFound(id.clone()))
}

fn find_live_task<'a>(store: &'a TaskStore, id: &TaskId) -> Result<&'a Task, TaskError> {
    let task = find_task(store, id)?;
    if task.is_deleted() {
        return Err(TaskError::InBin(id.clone()));
    }
    Ok(task)
}

/// Check that `parent` can hold children from `list_id`.
fn validate_parent(
    store: &TaskStore,
    parent: &TaskId,
    child: &TaskId,
    list_id: &ListId,
) -> Result<u32, TaskError> {
    let p = store
        .task(parent)
        .ok_or_else(|| TaskError::ParentNotFound(parent.clone()))?;
    if p.is_deleted() {
        return Err(TaskError::DeletedParent(parent.clone()));
    }
    if &p.list_id != list_id {
        return Err(TaskError::CrossList {
            task: child.clone(),
            other: parent.clone(),
        });
    }
    Ok(p.depth + 1)
}

/// Groups are only checked once the store knows any, the same rule
/// `check::check_store` applies. The task endpoints do not return them.
fn validate_group(store: &TaskStore, group: &GroupId, list_id: &ListId) -> Result<(), TaskError> {
    if store.groups().next().is_none() {
        return Ok(());
    }
    match store.group(group) {
        Some(g) if &g.list_id == list_id => Ok(()),
        _ => Err(TaskError::GroupNotInList {
            group: group.clone(),
            list: list_id.clone(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Add / change
// ---------------------------------------------------------------------------

/// Add a task under the given id. A task with a parent is placed after the
/// parent's last descendant; a root task goes where `position` says.
pub fn add_task(
    store: &mut TaskStore,
    id: TaskId,
    new: NewTask,
    position: &InsertPosition,
    now: DateTime<Utc>,
) -> Result<TaskId, TaskError> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(TaskError::EmptyTitle);
    }
    let depth = match &new.parent_id {
        Some(pid) => validate_parent(store, pid, &id, &new.list_id)?,
        None => 0,
    };
    if let Some(gid) = &new.group_id {
        validate_group(store, gid, &new.list_id)?;
    }

    let mut task = Task::new(id.clone(), title, new.list_id);
    task.description = new.description;
    task.parent_id = new.parent_id.clone();
    task.depth = depth;
    task.group_id = new.group_id;
    task.priority = new.priority;
    task.deadline = new.deadline;
    task.tags = new.tags.into_iter().collect();
    task.created_at = Some(now);
    task.updated_at = Some(now);

    let index = match (&new.parent_id, position) {
        (Some(pid), _) => {
            let last = tree::subtree(store, pid)
                .last()
                .and_then(|l| store.index_of(l))
                .unwrap_or(store.len());
            last + 1
        }
        (None, InsertPosition::Bottom) => store.len(),
        (None, InsertPosition::Top) => 0,
        (None, InsertPosition::After(after)) => {
            store
                .index_of(after)
                .ok_or_else(|| TaskError::InvalidPosition(format!("after target {}", after)))?
                + 1
        }
    };
    store.insert_at(index, task);

    if let Some(pid) = &new.parent_id {
        if let Some(parent) = store.task_mut(pid) {
            parent.touch(now);
        }
        // an open child reopens a completed parent chain
        cascade::refresh_ancestors_from(store, pid, now);
    }
    Ok(id)
}

/// Overwrite the fields named by `patch`. Hierarchy and container fields are
/// refused; completion goes through the cascade.
pub fn change_task(
    store: &mut TaskStore,
    id: &TaskId,
    patch: &TaskPatch,
    now: DateTime<Utc>,
) -> Result<bool, TaskError> {
    find_live_task(store, id)?;
    if patch.is_structural() {
        return Err(TaskError::StructuralChange);
    }
    if patch.is_empty() {
        return Err(TaskError::EmptyChange);
    }
    if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(TaskError::EmptyTitle);
    }

    let mut fields = patch.clone();
    fields.completed = None;
    fields.updated_at = None;
    if fields.is_pinned == Some(true) && fields.pinned_at.is_none() {
        let already = store.task(id).is_some_and(|t| t.is_pinned);
        if !already {
            fields.pinned_at = Some(Some(now));
        }
    } else if fields.is_pinned == Some(false) && fields.pinned_at.is_none() {
        fields.pinned_at = Some(None);
    }

    let mut changed = match store.task_mut(id) {
        Some(task) => fields.apply_to(task),
        None => false,
    };
    if let Some(completed) = patch.completed {
        changed |= !cascade::set_completed(store, id, completed, now)?.is_empty();
    }
    if changed && let Some(task) = store.task_mut(id) {
        task.touch(now);
    }
    Ok(changed)
}

// ---------------------------------------------------------------------------
// Structural moves
// ---------------------------------------------------------------------------

/// Reparent a task (or make it a root with `None`). The subtree's depths
/// follow.
pub fn set_parent(
    store: &mut TaskStore,
    id: &TaskId,
    parent: Option<&TaskId>,
    now: DateTime<Utc>,
) -> Result<(), TaskError> {
    let task = find_live_task(store, id)?;
    let list_id = task.list_id.clone();
    let depth = match parent {
        Some(pid) => {
            if pid == id || tree::is_ancestor(store, id, pid) {
                return Err(TaskError::WouldCreateCycle {
                    task: id.clone(),
                    target: pid.clone(),
                });
            }
            validate_parent(store, pid, id, &list_id)?
        }
        None => 0,
    };
    let old_parent = store.task(id).and_then(|t| t.parent_id.clone());
    if let Some(task) = store.task_mut(id) {
        task.parent_id = parent.cloned();
        task.depth = depth;
        task.touch(now);
    }
    tree::recompute_subtree_depths(store, id);
    // both the old and the new parent may now be (in)complete
    if let Some(op) = old_parent {
        cascade::refresh_ancestors_from(store, &op, now);
    }
    if let Some(np) = parent {
        cascade::refresh_ancestors_from(store, np, now);
    }
    Ok(())
}

/// Move a task and its subtree into a group of the same list. A task whose
/// parent sits in a different group becomes a root.
pub fn move_to_group(
    store: &mut TaskStore,
    id: &TaskId,
    group: Option<&GroupId>,
    now: DateTime<Utc>,
) -> Result<(), TaskError> {
    let task = find_live_task(store, id)?;
    if let Some(gid) = group {
        validate_group(store, gid, &task.list_id)?;
    }
    let parent_group_differs = task
        .parent_id
        .as_ref()
        .and_then(|p| store.task(p))
        .is_some_and(|p| p.group_id.as_ref() != group);
    if parent_group_differs {
        set_parent(store, id, None, now)?;
    }
    for tid in tree::subtree(store, id) {
        if let Some(t) = store.task_mut(&tid) {
            t.group_id = group.cloned();
        }
    }
    if let Some(t) = store.task_mut(id) {
        t.touch(now);
    }
    Ok(())
}

/// Move a task and its subtree to another list, optionally into one of its
/// groups. The task is detached from its parent.
pub fn move_to_list(
    store: &mut TaskStore,
    id: &TaskId,
    list: &ListId,
    group: Option<&GroupId>,
    now: DateTime<Utc>,
) -> Result<(), TaskError> {
    find_live_task(store, id)?;
    if let Some(gid) = group {
        validate_group(store, gid, list)?;
    }
    set_parent(store, id, None, now)?;
    for tid in tree::subtree(store, id) {
        if let Some(t) = store.task_mut(&tid) {
            t.list_id = list.clone();
            t.group_id = group.cloned();
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Bulk operations
// ---------------------------------------------------------------------------

fn in_scope(task: &Task, list: Option<&ListId>) -> bool {
    !task.is_deleted() && list.is_none_or(|l| &task.list_id == l)
}

/// Set `completed` on every live task in scope matching `filter`.
/// Returns the ids whose flag actually flipped. Only matching tasks change:
/// no cascade runs, so `check` may report completion drift on parents.
pub fn complete_all(
    store: &mut TaskStore,
    list: Option<&ListId>,
    filter: CompletionFilter,
    completed: bool,
    now: DateTime<Utc>,
) -> Vec<TaskId> {
    let targets: Vec<TaskId> = store
        .tasks()
        .filter(|t| in_scope(t, list) && filter.matches(t, now) && t.completed != completed)
        .map(|t| t.id.clone())
        .collect();
    for id in &targets {
        if let Some(t) = store.task_mut(id) {
            t.completed = completed;
            t.touch(now);
        }
    }
    targets
}

/// Ids of live, completed tasks in scope whose ancestors are not also
/// completed-and-in-scope (binning an ancestor already bins them).
pub fn completed_roots(store: &TaskStore, list: Option<&ListId>) -> Vec<TaskId> {
    store
        .tasks()
        .filter(|t| in_scope(t, list) && t.completed)
        .filter(|t| {
            !tree::ancestors(store, &t.id)
                .iter()
                .any(|a| store.task(a).is_some_and(|p| p.completed && in_scope(p, list)))
        })
        .map(|t| t.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::list::Group;
    use crate::model::task::Priority;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn task(id: &str, parent: Option<&str>, depth: u32) -> Task {
        let mut t = Task::new(id.into(), id.to_uppercase(), "L1".into());
        t.parent_id = parent.map(TaskId::from);
        t.depth = depth;
        t
    }

    fn sample_store() -> TaskStore {
        let mut store = TaskStore::from_tasks(vec![
            task("a", None, 0),
            task("b", Some("a"), 1),
            task("c", Some("b"), 2),
            task("d", None, 0),
        ]);
        store.upsert_group(Group::new("g1", "Errands", "L1"));
        store.upsert_group(Group::new("g2", "Work", "L2"));
        store
    }

    fn order(store: &TaskStore) -> Vec<String> {
        store.order().iter().map(|i| i.to_string()).collect()
    }

    // --- add ---

    #[test]
    fn add_root_at_bottom() {
        let mut store = sample_store();
        let id = add_task(
            &mut store,
            "tmp-1".into(),
            NewTask::new("buy milk", "L1"),
            &InsertPosition::Bottom,
            now(),
        )
        .unwrap();
        assert_eq!(order(&store).last().unwrap(), "tmp-1");
        let t = store.task(&id).unwrap();
        assert_eq!(t.depth, 0);
        assert_eq!(t.updated_at, Some(now()));
    }

    #[test]
    fn add_child_lands_after_parent_subtree() {
        let mut store = sample_store();
        let mut new = NewTask::new("child", "L1");
        new.parent_id = Some("a".into());
        add_task(&mut store, "tmp-1".into(), new, &InsertPosition::Top, now()).unwrap();
        assert_eq!(order(&store), vec!["a", "b", "c", "tmp-1", "d"]);
        assert_eq!(store.task(&"tmp-1".into()).unwrap().depth, 1);
        assert_eq!(store.task(&"a".into()).unwrap().updated_at, Some(now()));
    }

    #[test]
    fn add_rejects_blank_title_and_bad_parent() {
        let mut store = sample_store();
        let err = add_task(
            &mut store,
            "tmp-1".into(),
            NewTask::new("   ", "L1"),
            &InsertPosition::Bottom,
            now(),
        );
        assert_eq!(err, Err(TaskError::EmptyTitle));

        let mut new = NewTask::new("x", "L2");
        new.parent_id = Some("a".into());
        let err = add_task(&mut store, "tmp-2".into(), new, &InsertPosition::Bottom, now());
        assert!(matches!(err, Err(TaskError::CrossList { .. })));

        let mut new = NewTask::new("x", "L1");
        new.group_id = Some("g2".into());
        let err = add_task(&mut store, "tmp-3".into(), new, &InsertPosition::Bottom, now());
        assert!(matches!(err, Err(TaskError::GroupNotInList { .. })));
        assert_eq!(store.len(), 4);
    }

    // --- change ---

    #[test]
    fn change_updates_fields_and_timestamp() {
        let mut store = sample_store();
        let patch = TaskPatch {
            title: Some("Renamed".into()),
            priority: Some(Priority::High),
            ..Default::default()
        };
        assert!(change_task(&mut store, &"d".into(), &patch, now()).unwrap());
        let t = store.task(&"d".into()).unwrap();
        assert_eq!(t.title, "Renamed");
        assert_eq!(t.priority, Priority::High);
        assert_eq!(t.updated_at, Some(now()));

        // same values again: nothing changes, timestamp stays
        let later = now() + chrono::Duration::hours(1);
        assert!(!change_task(&mut store, &"d".into(), &patch, later).unwrap());
        assert_eq!(store.task(&"d".into()).unwrap().updated_at, Some(now()));
    }

    #[test]
    fn change_refuses_structural_fields() {
        let mut store = sample_store();
        let patch = TaskPatch {
            parent_id: Some(None),
            ..Default::default()
        };
        assert_eq!(
            change_task(&mut store, &"b".into(), &patch, now()),
            Err(TaskError::StructuralChange)
        );
        assert_eq!(
            change_task(&mut store, &"b".into(), &TaskPatch::default(), now()),
            Err(TaskError::EmptyChange)
        );
    }

    #[test]
    fn pinning_stamps_pinned_at() {
        let mut store = sample_store();
        let pin = TaskPatch {
            is_pinned: Some(true),
            ..Default::default()
        };
        change_task(&mut store, &"d".into(), &pin, now()).unwrap();
        assert_eq!(store.task(&"d".into()).unwrap().pinned_at, Some(now()));

        let unpin = TaskPatch {
            is_pinned: Some(false),
            ..Default::default()
        };
        change_task(&mut store, &"d".into(), &unpin, now()).unwrap();
        assert_eq!(store.task(&"d".into()).unwrap().pinned_at, None);
    }

    // --- structure ---

    #[test]
    fn set_parent_rejects_cycles() {
        let mut store = sample_store();
        let err = set_parent(&mut store, &"a".into(), Some(&"c".into()), now());
        assert!(matches!(err, Err(TaskError::WouldCreateCycle { .. })));
        let err = set_parent(&mut store, &"a".into(), Some(&"a".into()), now());
        assert!(matches!(err, Err(TaskError::WouldCreateCycle { .. })));
    }

    #[test]
    fn set_parent_recomputes_subtree_depth() {
        let mut store = sample_store();
        set_parent(&mut store, &"b".into(), Some(&"d".into()), now()).unwrap();
        assert_eq!(store.task(&"b".into()).unwrap().depth, 1);
        assert_eq!(store.task(&"c".into()).unwrap().depth, 2);

        set_parent(&mut store, &"d".into(), Some(&"a".into()), now()).unwrap();
        assert_eq!(store.task(&"d".into()).unwrap().depth, 1);
        assert_eq!(store.task(&"b".into()).unwrap().depth, 2);
        assert_eq!(store.task(&"c".into()).unwrap().depth, 3);
    }

    #[test]
    fn move_to_group_carries_subtree() {
        let mut store = sample_store();
        move_to_group(&mut store, &"b".into(), Some(&"g1".into()), now()).unwrap();
        let b = store.task(&"b".into()).unwrap();
        // parent a is ungrouped, so b is detached
        assert!(b.parent_id.is_none());
        assert_eq!(b.depth, 0);
        assert_eq!(store.task(&"c".into()).unwrap().group_id, Some(GroupId::from("g1")));
        assert_eq!(store.task(&"c".into()).unwrap().depth, 1);

        let err = move_to_group(&mut store, &"d".into(), Some(&"g2".into()), now());
        assert!(matches!(err, Err(TaskError::GroupNotInList { .. })));
    }

    #[test]
    fn unknown_groups_pass_until_groups_are_loaded() {
        let mut store = TaskStore::from_tasks(vec![task("a", None, 0)]);
        move_to_group(&mut store, &"a".into(), Some(&"g9".into()), now()).unwrap();
        assert_eq!(store.task(&"a".into()).unwrap().group_id, Some(GroupId::from("g9")));

        store.upsert_group(Group::new("g1", "Errands", "L1"));
        let err = move_to_group(&mut store, &"a".into(), Some(&"g9".into()), now());
        assert!(matches!(err, Err(TaskError::GroupNotInList { .. })));
    }

    #[test]
    fn move_to_list_detaches_and_carries_subtree() {
        let mut store = sample_store();
        move_to_list(&mut store, &"b".into(), &"L2".into(), Some(&"g2".into()), now()).unwrap();
        let b = store.task(&"b".into()).unwrap();
        assert!(b.parent_id.is_none());
        assert_eq!(b.list_id, ListId::from("L2"));
        let c = store.task(&"c".into()).unwrap();
        assert_eq!(c.list_id, ListId::from("L2"));
        assert_eq!(c.group_id, Some(GroupId::from("g2")));
        assert_eq!(c.depth, 1);
    }

    // --- bulk ---

    #[test]
    fn complete_all_uncompleted_flips_only_open_tasks() {
        let mut t1 = Task::new("1".into(), "one", "L1".into());
        t1.completed = false;
        let mut t2 = Task::new("2".into(), "two", "L1".into());
        t2.completed = true;
        t2.updated_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let t3 = Task::new("3".into(), "three", "L1".into());
        let mut store = TaskStore::from_tasks(vec![t1, t2, t3]);

        let flipped = complete_all(&mut store, None, CompletionFilter::Uncompleted, true, now());
        assert_eq!(flipped, vec![TaskId::from("1"), TaskId::from("3")]);
        assert!(store.tasks().all(|t| t.completed));
        // untouched entry keeps its timestamp
        assert_ne!(store.task(&"2".into()).unwrap().updated_at, Some(now()));
    }

    #[test]
    fn complete_all_overdue_uses_deadline() {
        let mut late = Task::new("late".into(), "late", "L1".into());
        late.deadline = Some(now() - chrono::Duration::days(1));
        let mut future = Task::new("future".into(), "future", "L1".into());
        future.deadline = Some(now() + chrono::Duration::days(1));
        let mut store = TaskStore::from_tasks(vec![late, future]);

        let flipped = complete_all(&mut store, None, CompletionFilter::Overdue, true, now());
        assert_eq!(flipped, vec![TaskId::from("late")]);
    }

    #[test]
    fn completed_roots_skips_descendants_of_completed() {
        let mut store = sample_store();
        for id in ["a", "b", "c"] {
            store.task_mut(&id.into()).unwrap().completed = true;
        }
        assert_eq!(completed_roots(&store, None), vec![TaskId::from("a")]);
    }
}
