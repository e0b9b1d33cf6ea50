use serde::{Deserialize, Serialize};

use super::ids::TagId;

/// A tag. Tags form their own tree through `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    #[serde(alias = "_id")]
    pub id: TagId,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<TagId>,
    #[serde(default)]
    pub color: Option<String>,
}

impl Tag {
    pub fn new(id: impl Into<TagId>, name: impl Into<String>) -> Self {
        Tag {
            id: id.into(),
            name: name.into(),
            parent_id: None,
            color: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<TagId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }
}
