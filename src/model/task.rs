use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Deserializer, Serialize};

use super::ids::{GroupId, ListId, TagId, TaskId};

/// Task priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn label(self) -> &'static str {
        match self {
            Priority::None => "none",
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn parse_priority(s: &str) -> Option<Priority> {
        match s {
            "none" => Some(Priority::None),
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

/// A task as held in the canonical store and exchanged with the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(alias = "_id")]
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// `None` means root of its list
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    /// Nesting depth (0 = root)
    #[serde(default)]
    pub depth: u32,
    pub list_id: ListId,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: IndexSet<TagId>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub pinned_at: Option<DateTime<Utc>>,
    /// Present while the task sits in the Bin
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a root task with default fields
    pub fn new(id: TaskId, title: impl Into<String>, list_id: ListId) -> Self {
        Task {
            id,
            title: title.into(),
            description: None,
            parent_id: None,
            depth: 0,
            list_id,
            group_id: None,
            completed: false,
            priority: Priority::None,
            deadline: None,
            tags: IndexSet::new(),
            is_pinned: false,
            pinned_at: None,
            deleted_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Past its deadline and still open
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.deadline.is_some_and(|d| d < now)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }
}

/// Fields supplied by the caller when adding a task. Serializes as the
/// body of the create call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    pub list_id: ListId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagId>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, list_id: impl Into<ListId>) -> Self {
        NewTask {
            title: title.into(),
            list_id: list_id.into(),
            ..Default::default()
        }
    }
}

/// A partial update to a task. `None` leaves a field untouched; for nullable
/// fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<TaskId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<ListId>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Option<GroupId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<IndexSet<TagId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub pinned_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    /// True if the patch touches hierarchy or container placement
    pub fn is_structural(&self) -> bool {
        self.parent_id.is_some()
            || self.depth.is_some()
            || self.list_id.is_some()
            || self.group_id.is_some()
            || self.deleted_at.is_some()
    }

    /// The patch that would turn `before` into `after`, field by field.
    pub fn diff(before: &Task, after: &Task) -> TaskPatch {
        fn changed<T: PartialEq + Clone>(a: &T, b: &T) -> Option<T> {
            (a != b).then(|| b.clone())
        }
        TaskPatch {
            title: changed(&before.title, &after.title),
            description: changed(&before.description, &after.description),
            parent_id: changed(&before.parent_id, &after.parent_id),
            depth: changed(&before.depth, &after.depth),
            list_id: changed(&before.list_id, &after.list_id),
            group_id: changed(&before.group_id, &after.group_id),
            completed: changed(&before.completed, &after.completed),
            priority: changed(&before.priority, &after.priority),
            deadline: changed(&before.deadline, &after.deadline),
            tags: changed(&before.tags, &after.tags),
            is_pinned: changed(&before.is_pinned, &after.is_pinned),
            pinned_at: changed(&before.pinned_at, &after.pinned_at),
            deleted_at: changed(&before.deleted_at, &after.deleted_at),
            updated_at: None,
        }
    }

    /// Overwrite every field the patch names. Returns whether any value
    /// actually changed, so reapplying the same patch reports `false`.
    pub fn apply_to(&self, task: &mut Task) -> bool {
        fn set<T: PartialEq + Clone>(slot: &mut T, value: &Option<T>) -> bool {
            match value {
                Some(v) if slot != v => {
                    *slot = v.clone();
                    true
                }
                _ => false,
            }
        }
        let mut changed = false;
        changed |= set(&mut task.title, &self.title);
        changed |= set(&mut task.description, &self.description);
        changed |= set(&mut task.parent_id, &self.parent_id);
        changed |= set(&mut task.depth, &self.depth);
        changed |= set(&mut task.list_id, &self.list_id);
        changed |= set(&mut task.group_id, &self.group_id);
        changed |= set(&mut task.completed, &self.completed);
        changed |= set(&mut task.priority, &self.priority);
        changed |= set(&mut task.deadline, &self.deadline);
        changed |= set(&mut task.tags, &self.tags);
        changed |= set(&mut task.is_pinned, &self.is_pinned);
        changed |= set(&mut task.pinned_at, &self.pinned_at);
        changed |= set(&mut task.deleted_at, &self.deleted_at);
        // updatedAt is bookkeeping and never counts as a change on its own
        if changed && let Some(at) = self.updated_at {
            task.updated_at = Some(at);
        }
        changed
    }
}
