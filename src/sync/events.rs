//! Push events from the server and their decoding from the SSE and socket
//! payload shapes.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::model::ids::{GroupId, ListId, TagId, TaskId};
use crate::model::list::{Group, TaskList};
use crate::model::tag::Tag;
use crate::model::task::{Task, TaskPatch};

/// Error type for malformed push payloads
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("event is not valid JSON: {0}")]
    Json(String),
    #[error("event has no {0} field")]
    MissingField(&'static str),
    #[error("unknown action {action:?} for entity {entity:?}")]
    UnknownAction { entity: String, action: String },
    #[error("bad {entity} payload: {reason}")]
    BadPayload { entity: String, reason: String },
    #[error("malformed socket frame: {0}")]
    Frame(String),
}

/// A partial update to one child, carried inside a parent's update event
#[derive(Debug, Clone, PartialEq)]
pub struct ChildUpdate {
    pub id: TaskId,
    pub changes: TaskPatch,
}

/// A server-authoritative change
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    TaskCreated(Task),
    TaskUpdated {
        id: TaskId,
        changes: TaskPatch,
        children: Vec<ChildUpdate>,
    },
    TaskDeleted {
        id: TaskId,
        permanent: bool,
        deleted_at: Option<DateTime<Utc>>,
    },
    TaskRestored {
        id: TaskId,
    },
    ListUpserted(TaskList),
    ListDeleted(ListId),
    GroupUpserted(Group),
    GroupDeleted(GroupId),
    TagUpserted(Tag),
    TagDeleted(TagId),
    Heartbeat,
    /// Recognised but irrelevant to the task store (habits)
    Ignored {
        entity: String,
    },
}

impl RemoteEvent {
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, RemoteEvent::Heartbeat)
    }

    /// Short label for logs
    pub fn label(&self) -> String {
        match self {
            RemoteEvent::TaskCreated(t) => format!("task created {}", t.id),
            RemoteEvent::TaskUpdated { id, children, .. } => {
                format!("task updated {} (+{} children)", id, children.len())
            }
            RemoteEvent::TaskDeleted { id, permanent, .. } => {
                if *permanent {
                    format!("task purged {id}")
                } else {
                    format!("task deleted {id}")
                }
            }
            RemoteEvent::TaskRestored { id } => format!("task restored {id}"),
            RemoteEvent::ListUpserted(l) => format!("list {}", l.id),
            RemoteEvent::ListDeleted(id) => format!("list deleted {id}"),
            RemoteEvent::GroupUpserted(g) => format!("group {}", g.id),
            RemoteEvent::GroupDeleted(id) => format!("group deleted {id}"),
            RemoteEvent::TagUpserted(t) => format!("tag {}", t.id),
            RemoteEvent::TagDeleted(id) => format!("tag deleted {id}"),
            RemoteEvent::Heartbeat => "heartbeat".to_string(),
            RemoteEvent::Ignored { entity } => format!("ignored {entity}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Action names
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Created,
    Updated,
    Deleted,
    Purged,
    Restored,
    Heartbeat,
}

fn parse_action(entity: &str, action: &str) -> Result<Action, EventError> {
    let normalized = action.to_ascii_lowercase().replace(['-', ' '], "_");
    let parsed = match normalized.as_str() {
        "created" | "create" | "added" | "add" => Action::Created,
        "updated" | "update" | "changed" | "change" | "moved" | "completed" => Action::Updated,
        "deleted" | "delete" | "removed" | "remove" | "soft_deleted" => Action::Deleted,
        "permanently_deleted" | "permanent_delete" | "purged" | "hard_deleted" => Action::Purged,
        "restored" | "restore" => Action::Restored,
        "heartbeat" | "ping" => Action::Heartbeat,
        _ => {
            return Err(EventError::UnknownAction {
                entity: entity.to_string(),
                action: action.to_string(),
            });
        }
    };
    Ok(parsed)
}

// ---------------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------------

/// Decode one SSE `data:` payload:
/// `{ "entity": "task", "type": "updated", "task": {...} }`, optionally
/// wrapped as `{ "data": {...} }`. `type` and `action` are synonyms; the
/// entity object may sit under its own name, `data`, or `payload`.
pub fn decode_sse(text: &str) -> Result<RemoteEvent, EventError> {
    let value: Value = serde_json::from_str(text).map_err(|e| EventError::Json(e.to_string()))?;
    let value = match value.get("data") {
        Some(inner) if inner.get("entity").is_some() => inner.clone(),
        _ => value,
    };
    let entity = value
        .get("entity")
        .and_then(Value::as_str)
        .ok_or(EventError::MissingField("entity"))?
        .to_ascii_lowercase();
    let action = value
        .get("type")
        .or_else(|| value.get("action"))
        .and_then(Value::as_str)
        .ok_or(EventError::MissingField("type"))?;

    match entity.as_str() {
        "system" => match parse_action(&entity, action)? {
            Action::Heartbeat => Ok(RemoteEvent::Heartbeat),
            _ => Ok(RemoteEvent::Ignored {
                entity: entity.clone(),
            }),
        },
        "habit" | "habits" => Ok(RemoteEvent::Ignored {
            entity: entity.clone(),
        }),
        "task" | "todo" | "tasks" | "todos" => {
            let payload = entity_payload(&value, &["task", "todo"]);
            task_event(parse_action(&entity, action)?, &value, payload)
        }
        "list" | "lists" => {
            let payload = entity_payload(&value, &["list"]);
            named_event(
                &entity,
                parse_action(&entity, action)?,
                &value,
                payload,
                |v| Ok(RemoteEvent::ListUpserted(from_value(&entity, v)?)),
                |id| RemoteEvent::ListDeleted(ListId::new(id)),
            )
        }
        "group" | "groups" => {
            let payload = entity_payload(&value, &["group"]);
            named_event(
                &entity,
                parse_action(&entity, action)?,
                &value,
                payload,
                |v| Ok(RemoteEvent::GroupUpserted(from_value(&entity, v)?)),
                |id| RemoteEvent::GroupDeleted(GroupId::new(id)),
            )
        }
        "tag" | "tags" => {
            let payload = entity_payload(&value, &["tag"]);
            named_event(
                &entity,
                parse_action(&entity, action)?,
                &value,
                payload,
                |v| Ok(RemoteEvent::TagUpserted(from_value(&entity, v)?)),
                |id| RemoteEvent::TagDeleted(TagId::new(id)),
            )
        }
        _ => Ok(RemoteEvent::Ignored {
            entity: entity.clone(),
        }),
    }
}

fn entity_payload<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .chain(["data", "payload"].iter())
        .find_map(|k| value.get(*k))
        .filter(|v| !v.is_null())
}

fn from_value<T: DeserializeOwned>(entity: &str, value: &Value) -> Result<T, EventError> {
    T::deserialize(value).map_err(|e| EventError::BadPayload {
        entity: entity.to_string(),
        reason: e.to_string(),
    })
}

/// `id`, then `_id`, on the payload first and the envelope second. A bare
/// string payload is itself the id.
fn find_id(envelope: &Value, payload: Option<&Value>) -> Option<String> {
    let pick = |v: &Value| {
        v.get("id")
            .or_else(|| v.get("_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    payload
        .and_then(|p| p.as_str().map(str::to_string).or_else(|| pick(p)))
        .or_else(|| pick(envelope))
}

fn named_event(
    entity: &str,
    action: Action,
    envelope: &Value,
    payload: Option<&Value>,
    upsert: impl FnOnce(&Value) -> Result<RemoteEvent, EventError>,
    delete: impl FnOnce(String) -> RemoteEvent,
) -> Result<RemoteEvent, EventError> {
    match action {
        Action::Created | Action::Updated | Action::Restored => {
            upsert(payload.ok_or(EventError::MissingField("payload"))?)
        }
        Action::Deleted | Action::Purged => find_id(envelope, payload)
            .map(delete)
            .ok_or(EventError::MissingField("id")),
        Action::Heartbeat => Ok(RemoteEvent::Ignored {
            entity: entity.to_string(),
        }),
    }
}

fn task_event(
    action: Action,
    envelope: &Value,
    payload: Option<&Value>,
) -> Result<RemoteEvent, EventError> {
    match action {
        Action::Created => {
            let payload = payload.ok_or(EventError::MissingField("task"))?;
            Ok(RemoteEvent::TaskCreated(from_value("task", payload)?))
        }
        Action::Updated => {
            let id = find_id(envelope, payload).ok_or(EventError::MissingField("id"))?;
            // partial updates may carry their fields under `changes`
            let fields = envelope
                .get("changes")
                .or_else(|| payload.and_then(|p| p.get("changes")))
                .or(payload)
                .ok_or(EventError::MissingField("changes"))?;
            let changes: TaskPatch = from_value("task", fields)?;
            let mut children = Vec::new();
            for key in ["children", "updatedChildren"] {
                let list = envelope
                    .get(key)
                    .or_else(|| payload.and_then(|p| p.get(key)))
                    .and_then(Value::as_array);
                for child in list.into_iter().flatten() {
                    let Some(child_id) = find_id(&Value::Null, Some(child)) else {
                        continue;
                    };
                    children.push(ChildUpdate {
                        id: TaskId::new(child_id),
                        changes: from_value("task", child)?,
                    });
                }
            }
            Ok(RemoteEvent::TaskUpdated {
                id: TaskId::new(id),
                changes,
                children,
            })
        }
        Action::Deleted | Action::Purged => {
            let id = find_id(envelope, payload).ok_or(EventError::MissingField("id"))?;
            let permanent = action == Action::Purged
                || envelope
                    .get("permanent")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
            let deleted_at = payload
                .and_then(|p| p.get("deletedAt"))
                .and_then(|v| serde_json::from_value(v.clone()).ok());
            Ok(RemoteEvent::TaskDeleted {
                id: TaskId::new(id),
                permanent,
                deleted_at,
            })
        }
        Action::Restored => {
            let id = find_id(envelope, payload).ok_or(EventError::MissingField("id"))?;
            Ok(RemoteEvent::TaskRestored { id: TaskId::new(id) })
        }
        Action::Heartbeat => Ok(RemoteEvent::Heartbeat),
    }
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// Decode a socket event such as `task:updated` with its first argument.
pub fn decode_socket(name: &str, payload: &Value) -> Result<RemoteEvent, EventError> {
    let (entity, action) = name
        .split_once(':')
        .ok_or_else(|| EventError::Frame(format!("event name {name:?} has no entity")))?;
    let envelope = match payload {
        Value::Object(_) => payload.clone(),
        Value::String(id) => serde_json::json!({ "id": id }),
        other => {
            return Err(EventError::BadPayload {
                entity: entity.to_string(),
                reason: format!("unexpected payload {other}"),
            });
        }
    };
    // socket payloads are the entity itself, or an envelope holding it
    let inner = entity_payload(&envelope, &[entity]).unwrap_or(&envelope);
    match entity {
        "task" | "todo" => task_event(parse_action(entity, action)?, &envelope, Some(inner)),
        _ => Ok(RemoteEvent::Ignored {
            entity: entity.to_string(),
        }),
    }
}
