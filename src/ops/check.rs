use std::collections::HashSet;

use serde::Serialize;

use crate::model::ids::TaskId;
use crate::model::store::TaskStore;
use crate::model::task::Task;
use crate::ops::cascade;

/// Structured result from `tn check`, suitable for --json output.
#[derive(Debug, Default, Serialize)]
pub struct CheckResult {
    pub valid: bool,
    pub errors: Vec<CheckError>,
    pub warnings: Vec<CheckWarning>,
}

/// A broken structural invariant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum CheckError {
    /// A root task with a nonzero depth, or a child whose depth is not its
    /// parent's plus one
    #[serde(rename = "depth_mismatch")]
    DepthMismatch {
        task_id: String,
        expected: u32,
        actual: u32,
    },
    /// `parentId` names a task that is not in the store
    #[serde(rename = "missing_parent")]
    MissingParent { task_id: String, parent_id: String },
    /// Parent lives in another list
    #[serde(rename = "cross_list_parent")]
    CrossListParent { task_id: String, parent_id: String },
    /// A live task hangs under a binned one
    #[serde(rename = "binned_parent")]
    BinnedParent { task_id: String, parent_id: String },
    /// Following parents from this task comes back to it
    #[serde(rename = "cycle")]
    Cycle { task_id: String },
    /// The task's group belongs to another list
    #[serde(rename = "group_not_in_list")]
    GroupNotInList {
        task_id: String,
        group_id: String,
        list_id: String,
    },
}

/// Something odd but harmless
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum CheckWarning {
    /// The stored flag disagrees with the children (a remote update may have
    /// skipped the cascade)
    #[serde(rename = "completion_drift")]
    CompletionDrift { task_id: String, derived: bool },
    /// The task references a tag the store does not know
    #[serde(rename = "unknown_tag")]
    UnknownTag { task_id: String, tag_id: String },
}

// ---------------------------------------------------------------------------
// Main check entry point
// ---------------------------------------------------------------------------

/// Validate the hierarchy invariants of a store. Read-only.
///
/// Errors:
/// 1. depth is 0 for roots and parent depth + 1 for children
/// 2. parents exist, share the child's list, and are live when the child is
/// 3. no task is its own ancestor
/// 4. grouped tasks use a group of their own list
///
/// Warnings cover completion drift and unknown tags. Group and tag checks
/// only run when the store has groups or tags loaded.
pub fn check_store(store: &TaskStore) -> CheckResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let in_cycle = tasks_in_cycles(store);
    let check_groups = store.groups().next().is_some();
    let check_tags = store.tags().next().is_some();

    for task in store.tasks() {
        if in_cycle.contains(&task.id) {
            errors.push(CheckError::Cycle {
                task_id: task.id.to_string(),
            });
        } else {
            check_parent(store, task, &mut errors);
        }

        if check_groups
            && let Some(gid) = &task.group_id
            && store.group(gid).is_none_or(|g| g.list_id != task.list_id)
        {
            errors.push(CheckError::GroupNotInList {
                task_id: task.id.to_string(),
                group_id: gid.to_string(),
                list_id: task.list_id.to_string(),
            });
        }

        if !task.is_deleted()
            && let Some(derived) = cascade::children_all_completed(store, &task.id)
            && derived != task.completed
        {
            warnings.push(CheckWarning::CompletionDrift {
                task_id: task.id.to_string(),
                derived,
            });
        }

        if check_tags {
            for tag in task.tags.iter().filter(|t| store.tag(t).is_none()) {
                warnings.push(CheckWarning::UnknownTag {
                    task_id: task.id.to_string(),
                    tag_id: tag.to_string(),
                });
            }
        }
    }

    CheckResult {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn check_parent(store: &TaskStore, task: &Task, errors: &mut Vec<CheckError>) {
    let id = task.id.to_string();
    let Some(pid) = &task.parent_id else {
        if task.depth != 0 {
            errors.push(CheckError::DepthMismatch {
                task_id: id,
                expected: 0,
                actual: task.depth,
            });
        }
        return;
    };
    let Some(parent) = store.task(pid) else {
        errors.push(CheckError::MissingParent {
            task_id: id,
            parent_id: pid.to_string(),
        });
        return;
    };
    if parent.list_id != task.list_id {
        errors.push(CheckError::CrossListParent {
            task_id: id.clone(),
            parent_id: pid.to_string(),
        });
    }
    if parent.is_deleted() && !task.is_deleted() {
        errors.push(CheckError::BinnedParent {
            task_id: id.clone(),
            parent_id: pid.to_string(),
        });
    }
    if task.depth != parent.depth + 1 {
        errors.push(CheckError::DepthMismatch {
            task_id: id,
            expected: parent.depth + 1,
            actual: task.depth,
        });
    }
}

/// Ids that sit on a parent cycle
fn tasks_in_cycles(store: &TaskStore) -> HashSet<TaskId> {
    store
        .tasks()
        .filter(|t| on_cycle(store, &t.id))
        .map(|t| t.id.clone())
        .collect()
}

fn on_cycle(store: &TaskStore, id: &TaskId) -> bool {
    let mut seen = HashSet::new();
    let mut current = store.task(id).and_then(|t| t.parent_id.clone());
    while let Some(pid) = current {
        if &pid == id {
            return true;
        }
        if !seen.insert(pid.clone()) {
            return false;
        }
        current = store.task(&pid).and_then(|t| t.parent_id.clone());
    }
    false
}
