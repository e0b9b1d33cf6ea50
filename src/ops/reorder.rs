//! Drag-and-drop reordering with implicit reparenting.
//!
//! A drop of `dragged` onto `target` is planned against a copy of the store
//! and produces the complete new task array. The caller commits that array
//! in one replacement so no half-moved tree is ever visible.

use chrono::{DateTime, Utc};

use crate::model::ids::TaskId;
use crate::model::store::TaskStore;
use crate::model::task::Task;
use crate::ops::task_ops::TaskError;
use crate::ops::{cascade, tree};

/// Structural change implied by a drop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropEffect {
    /// Only the linear order changed
    OrderOnly,
    /// The dragged task left its parent and became a root
    Promoted,
    /// The dragged task became a sibling of the target
    Demoted { parent: Option<TaskId>, depth: u32 },
}

/// The outcome of a drop, ready to commit
#[derive(Debug, Clone)]
pub struct ReorderPlan {
    pub dragged: TaskId,
    pub target: TaskId,
    pub effect: DropEffect,
    /// The whole task array after the drop
    pub tasks: Vec<Task>,
}

impl ReorderPlan {
    /// Parent of the dragged task after the drop
    pub fn new_parent(&self) -> Option<&TaskId> {
        self.tasks
            .iter()
            .find(|t| t.id == self.dragged)
            .and_then(|t| t.parent_id.as_ref())
    }

    pub fn order(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }
}

/// Plan dropping `dragged` onto `target`.
///
/// Returns `Ok(None)` for the silent no-ops: dropping onto itself or onto a
/// target that cannot be found. Dropping onto one of its own descendants is
/// refused before anything is computed.
pub fn plan_drop(
    store: &TaskStore,
    dragged: &TaskId,
    target: &TaskId,
    now: DateTime<Utc>,
) -> Result<Option<ReorderPlan>, TaskError> {
    if dragged == target {
        return Ok(None);
    }
    let drag = store
        .task(dragged)
        .ok_or_else(|| TaskError::NotFound(dragged.clone()))?;
    let Some(tgt) = store.task(target) else {
        return Ok(None);
    };
    if drag.is_deleted() {
        return Err(TaskError::InBin(dragged.clone()));
    }
    if tgt.is_deleted() {
        return Err(TaskError::InBin(target.clone()));
    }
    if drag.list_id != tgt.list_id {
        return Err(TaskError::CrossList {
            task: dragged.clone(),
            other: target.clone(),
        });
    }
    if tree::is_ancestor(store, dragged, target) {
        return Err(TaskError::WouldCreateCycle {
            task: dragged.clone(),
            target: target.clone(),
        });
    }

    let effect = if drag.parent_id.is_some() && tgt.parent_id != drag.parent_id {
        DropEffect::Promoted
    } else if (drag.parent_id.is_none() || drag.depth == 0) && tgt.depth > 0 {
        DropEffect::Demoted {
            parent: tgt.parent_id.clone(),
            depth: tgt.depth,
        }
    } else {
        DropEffect::OrderOnly
    };
    let old_parent = drag.parent_id.clone();

    let mut next = store.clone();
    match &effect {
        DropEffect::OrderOnly => {}
        DropEffect::Promoted => reparent(&mut next, dragged, None, 0, now),
        DropEffect::Demoted { parent, depth } => {
            reparent(&mut next, dragged, parent.clone(), *depth, now)
        }
    }
    if effect != DropEffect::OrderOnly {
        if let Some(op) = &old_parent {
            cascade::refresh_ancestors_from(&mut next, op, now);
        }
        if let DropEffect::Demoted {
            parent: Some(np), ..
        } = &effect
        {
            cascade::refresh_ancestors_from(&mut next, np, now);
        }
    }

    // splice: take the dragged entry out and drop it at the target's index
    if let (Some(from), Some(to)) = (next.index_of(dragged), next.index_of(target)) {
        next.move_index(from, to);
    }

    Ok(Some(ReorderPlan {
        dragged: dragged.clone(),
        target: target.clone(),
        effect,
        tasks: next.tasks().cloned().collect(),
    }))
}

fn reparent(store: &mut TaskStore, id: &TaskId, parent: Option<TaskId>, depth: u32, now: DateTime<Utc>) {
    if let Some(t) = store.task_mut(id) {
        t.parent_id = parent;
        t.depth = depth;
        t.touch(now);
    }
    tree::recompute_subtree_depths(store, id);
}
