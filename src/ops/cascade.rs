//! Completion propagation along parent/child edges.
//!
//! Setting a task's flag pushes the same flag down to every live descendant,
//! then re-derives each ancestor's flag from its direct children, one level
//! at a time up to the root.

use chrono::{DateTime, Utc};

use crate::model::ids::TaskId;
use crate::model::store::TaskStore;
use crate::ops::task_ops::TaskError;
use crate::ops::tree;

/// Set `completed` on `id` and its subtree, then refresh the ancestor chain.
/// Returns every id whose flag flipped.
pub fn set_completed(
    store: &mut TaskStore,
    id: &TaskId,
    completed: bool,
    now: DateTime<Utc>,
) -> Result<Vec<TaskId>, TaskError> {
    let task = store.task(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
    if task.is_deleted() {
        return Err(TaskError::InBin(id.clone()));
    }

    let mut flipped = Vec::new();
    for tid in tree::subtree(store, id) {
        let Some(t) = store.task_mut(&tid) else { continue };
        // binned descendants stay as they were
        if t.is_deleted() && &tid != id {
            continue;
        }
        if t.completed != completed {
            t.completed = completed;
            t.touch(now);
            flipped.push(tid);
        }
    }

    if let Some(parent) = store.task(id).and_then(|t| t.parent_id.clone()) {
        flipped.extend(refresh_ancestors_from(store, &parent, now));
    }
    Ok(flipped)
}

/// Flip the stored flag of a task: the UI's "checkbox" action.
pub fn toggle(store: &mut TaskStore, id: &TaskId, now: DateTime<Utc>) -> Result<bool, TaskError> {
    let current = store
        .task(id)
        .map(|t| t.completed)
        .ok_or_else(|| TaskError::NotFound(id.clone()))?;
    set_completed(store, id, !current, now)?;
    Ok(!current)
}

/// Re-derive `start`'s flag from its live direct children, then its
/// parent's, and so on to the root. A task without live children keeps
/// its own flag and ends the walk.
pub fn refresh_ancestors_from(
    store: &mut TaskStore,
    start: &TaskId,
    now: DateTime<Utc>,
) -> Vec<TaskId> {
    let mut flipped = Vec::new();
    let mut chain = vec![start.clone()];
    chain.extend(tree::ancestors(store, start));

    for id in chain {
        let Some(all_done) = children_all_completed(store, &id) else {
            break;
        };
        if let Some(t) = store.task_mut(&id)
            && t.completed != all_done
        {
            t.completed = all_done;
            t.touch(now);
            flipped.push(id);
        }
    }
    flipped
}

/// `Some(true)` if every live direct child is completed, `None` when there
/// are no live children.
pub fn children_all_completed(store: &TaskStore, id: &TaskId) -> Option<bool> {
    let mut children = store
        .children(id)
        .into_iter()
        .filter(|c| !c.is_deleted())
        .peekable();
    children.peek()?;
    Some(children.all(|c| c.completed))
}

/// A task reads as complete when its own flag is set or all of its live
/// direct children are complete.
pub fn effectively_complete(store: &TaskStore, id: &TaskId) -> bool {
    store.task(id).is_some_and(|t| t.completed) || children_all_completed(store, id) == Some(true)
}
