use serde::{Deserialize, Serialize};

use super::ids::{GroupId, ListId};

/// A named container owning groups and tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    #[serde(alias = "_id")]
    pub id: ListId,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// A sub-grouping within exactly one list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(alias = "_id")]
    pub id: GroupId,
    pub name: String,
    pub list_id: ListId,
}

impl TaskList {
    pub fn new(id: impl Into<ListId>, name: impl Into<String>) -> Self {
        TaskList {
            id: id.into(),
            name: name.into(),
            color: None,
        }
    }
}

impl Group {
    pub fn new(id: impl Into<GroupId>, name: impl Into<String>, list_id: impl Into<ListId>) -> Self {
        Group {
            id: id.into(),
            name: name.into(),
            list_id: list_id.into(),
        }
    }
}
