//! User intents and the persistence call each one produces.

use reqwest::Method;
use serde_json::{Value, json};

use crate::model::ids::{GroupId, ListId, TaskId};
use crate::model::task::{NewTask, TaskPatch};
use crate::ops::task_ops::{CompletionFilter, InsertPosition};

/// A state change requested by the user
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Add {
        task: NewTask,
        position: InsertPosition,
    },
    Change {
        id: TaskId,
        patch: TaskPatch,
    },
    Toggle {
        id: TaskId,
        completed: bool,
    },
    /// Soft delete into the Bin
    Delete {
        id: TaskId,
    },
    Restore {
        id: TaskId,
    },
    /// Permanent removal, Bin only
    HardDelete {
        id: TaskId,
    },
    EmptyBin,
    /// Drag `dragged` onto `target`
    Reorder {
        dragged: TaskId,
        target: TaskId,
    },
    SetParent {
        id: TaskId,
        parent: Option<TaskId>,
    },
    CompleteAll {
        list: Option<ListId>,
        filter: CompletionFilter,
        completed: bool,
    },
    DeleteAllCompleted {
        list: Option<ListId>,
    },
    MoveToGroup {
        id: TaskId,
        group: Option<GroupId>,
    },
    MoveToList {
        id: TaskId,
        list: ListId,
        group: Option<GroupId>,
    },
}

impl Intent {
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::Add { .. } => "add",
            Intent::Change { .. } => "change",
            Intent::Toggle { .. } => "toggle",
            Intent::Delete { .. } => "delete",
            Intent::Restore { .. } => "restore",
            Intent::HardDelete { .. } => "hard_delete",
            Intent::EmptyBin => "empty_bin",
            Intent::Reorder { .. } => "reorder",
            Intent::SetParent { .. } => "set_parent",
            Intent::CompleteAll { .. } => "complete_all",
            Intent::DeleteAllCompleted { .. } => "delete_all_completed",
            Intent::MoveToGroup { .. } => "move_to_group",
            Intent::MoveToList { .. } => "move_to_list",
        }
    }
}

/// One call against the persistence API
#[derive(Debug, Clone, PartialEq)]
pub enum PersistCall {
    Create {
        placeholder: TaskId,
        body: NewTask,
    },
    Update {
        id: TaskId,
        patch: TaskPatch,
    },
    SetCompleted {
        id: TaskId,
        completed: bool,
        apply_to_children: bool,
    },
    SoftDelete {
        id: TaskId,
    },
    Restore {
        id: TaskId,
    },
    Purge {
        id: TaskId,
    },
    Reparent {
        id: TaskId,
        parent_id: Option<TaskId>,
        depth: u32,
        position: usize,
    },
    MoveToGroup {
        id: TaskId,
        group_id: Option<GroupId>,
    },
    MoveToList {
        id: TaskId,
        list_id: ListId,
        group_id: Option<GroupId>,
    },
    /// Several calls issued and settled as one unit
    Batch(Vec<PersistCall>),
}

/// A single HTTP request, relative to the server base URL
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    fn new(method: Method, path: String, body: Option<Value>) -> Self {
        ApiRequest { method, path, body }
    }
}

impl PersistCall {
    /// HTTP requests for this call, in issue order
    pub fn requests(&self) -> Vec<ApiRequest> {
        let single = match self {
            PersistCall::Create { body, .. } => ApiRequest::new(
                Method::POST,
                "/todos".to_string(),
                serde_json::to_value(body).ok(),
            ),
            PersistCall::Update { id, patch } => ApiRequest::new(
                Method::PUT,
                format!("/todos/{id}"),
                serde_json::to_value(patch).ok(),
            ),
            PersistCall::SetCompleted {
                id,
                completed,
                apply_to_children,
            } => ApiRequest::new(
                Method::PATCH,
                format!("/todos/{id}/completed"),
                Some(json!({ "completed": completed, "applyToChildren": apply_to_children })),
            ),
            PersistCall::SoftDelete { id } => {
                ApiRequest::new(Method::DELETE, format!("/todos/{id}"), None)
            }
            PersistCall::Restore { id } => {
                ApiRequest::new(Method::POST, format!("/todos/{id}/restore"), None)
            }
            PersistCall::Purge { id } => {
                ApiRequest::new(Method::DELETE, format!("/todos/{id}/permanent"), None)
            }
            PersistCall::Reparent {
                id,
                parent_id,
                depth,
                position,
            } => ApiRequest::new(
                Method::PATCH,
                format!("/todos/{id}/parent"),
                Some(json!({ "parentId": parent_id, "depth": depth, "position": position })),
            ),
            PersistCall::MoveToGroup { id, group_id } => ApiRequest::new(
                Method::PATCH,
                format!("/todos/{id}/move-to-group"),
                Some(json!({ "groupId": group_id })),
            ),
            PersistCall::MoveToList {
                id,
                list_id,
                group_id,
            } => ApiRequest::new(
                Method::PATCH,
                format!("/todos/{id}/move-to-list"),
                Some(json!({ "listId": list_id, "groupId": group_id })),
            ),
            PersistCall::Batch(calls) => {
                return calls.iter().flat_map(PersistCall::requests).collect();
            }
        };
        vec![single]
    }

    /// Every task id the call names, nested batches included
    pub fn task_ids(&self) -> Vec<&TaskId> {
        match self {
            PersistCall::Create { placeholder, body } => {
                let mut ids = vec![placeholder];
                ids.extend(body.parent_id.as_ref());
                ids
            }
            PersistCall::Update { id, patch } => {
                let mut ids = vec![id];
                if let Some(Some(parent)) = &patch.parent_id {
                    ids.push(parent);
                }
                ids
            }
            PersistCall::Reparent { id, parent_id, .. } => {
                let mut ids = vec![id];
                ids.extend(parent_id.as_ref());
                ids
            }
            PersistCall::SetCompleted { id, .. }
            | PersistCall::SoftDelete { id }
            | PersistCall::Restore { id }
            | PersistCall::Purge { id }
            | PersistCall::MoveToGroup { id, .. }
            | PersistCall::MoveToList { id, .. } => vec![id],
            PersistCall::Batch(calls) => calls.iter().flat_map(PersistCall::task_ids).collect(),
        }
    }

    /// Placeholder ids this call depends on. A Create does not depend on
    /// its own placeholder.
    pub fn placeholder_deps(&self) -> Vec<TaskId> {
        let own = match self {
            PersistCall::Create { placeholder, .. } => Some(placeholder),
            _ => None,
        };
        let mut deps: Vec<TaskId> = Vec::new();
        for id in self.task_ids() {
            if id.is_placeholder() && Some(id) != own && !deps.contains(id) {
                deps.push(id.clone());
            }
        }
        deps
    }

    /// Replace every mention of `old` with `new`.
    pub fn rewrite_id(&mut self, old: &TaskId, new: &TaskId) {
        let swap = |id: &mut TaskId| {
            if id == old {
                *id = new.clone();
            }
        };
        match self {
            PersistCall::Create { placeholder, body } => {
                swap(placeholder);
                if let Some(parent) = body.parent_id.as_mut() {
                    swap(parent);
                }
            }
            PersistCall::Update { id, patch } => {
                swap(id);
                if let Some(Some(parent)) = patch.parent_id.as_mut() {
                    swap(parent);
                }
            }
            PersistCall::Reparent { id, parent_id, .. } => {
                swap(id);
                if let Some(parent) = parent_id.as_mut() {
                    swap(parent);
                }
            }
            PersistCall::SetCompleted { id, .. }
            | PersistCall::SoftDelete { id }
            | PersistCall::Restore { id }
            | PersistCall::Purge { id }
            | PersistCall::MoveToGroup { id, .. }
            | PersistCall::MoveToList { id, .. } => swap(id),
            PersistCall::Batch(calls) => {
                for call in calls {
                    call.rewrite_id(old, new);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_maps_to_completed_endpoint() {
        let call = PersistCall::SetCompleted {
            id: "srv-1".into(),
            completed: true,
            apply_to_children: true,
        };
        let reqs = call.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].method, Method::PATCH);
        assert_eq!(reqs[0].path, "/todos/srv-1/completed");
        assert_eq!(
            reqs[0].body,
            Some(json!({ "completed": true, "applyToChildren": true }))
        );
    }

    #[test]
    fn create_body_is_camel_case() {
        let mut body = NewTask::new("buy milk", "L1");
        body.parent_id = Some("srv-7".into());
        let call = PersistCall::Create {
            placeholder: TaskId::placeholder("1"),
            body,
        };
        let req = &call.requests()[0];
        assert_eq!(req.path, "/todos");
        let body = req.body.as_ref().unwrap();
        assert_eq!(body["title"], "buy milk");
        assert_eq!(body["listId"], "L1");
        assert_eq!(body["parentId"], "srv-7");
        assert!(body.get("groupId").is_none());
    }

    #[test]
    fn bin_endpoints() {
        let paths: Vec<(Method, String)> = PersistCall::Batch(vec![
            PersistCall::SoftDelete { id: "a".into() },
            PersistCall::Restore { id: "a".into() },
            PersistCall::Purge { id: "a".into() },
        ])
        .requests()
        .into_iter()
        .map(|r| (r.method, r.path))
        .collect();
        assert_eq!(
            paths,
            vec![
                (Method::DELETE, "/todos/a".to_string()),
                (Method::POST, "/todos/a/restore".to_string()),
                (Method::DELETE, "/todos/a/permanent".to_string()),
            ]
        );
    }

    #[test]
    fn placeholder_dependencies_and_rewrite() {
        let tmp = TaskId::placeholder("p");
        let mut body = NewTask::new("child", "L1");
        body.parent_id = Some(tmp.clone());
        let mut call = PersistCall::Batch(vec![
            PersistCall::Create {
                placeholder: TaskId::placeholder("c"),
                body,
            },
            PersistCall::Update {
                id: tmp.clone(),
                patch: TaskPatch::default(),
            },
        ]);
        let deps = call.placeholder_deps();
        assert!(deps.contains(&tmp));

        call.rewrite_id(&tmp, &"srv-9".into());
        assert!(!call.placeholder_deps().contains(&tmp));
        let paths: Vec<String> = call.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/todos", "/todos/srv-9"]);
    }

    #[test]
    fn create_does_not_depend_on_itself() {
        let call = PersistCall::Create {
            placeholder: TaskId::placeholder("x"),
            body: NewTask::new("t", "L1"),
        };
        assert!(call.placeholder_deps().is_empty());
    }
}
