use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix carried by every client-generated placeholder task id.
pub const PLACEHOLDER_PREFIX: &str = "tmp-";

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

id_type!(
    /// Identifier of a task. Either server-issued or a local placeholder.
    TaskId
);
id_type!(
    /// Identifier of a list
    ListId
);
id_type!(
    /// Identifier of a group inside a list
    GroupId
);
id_type!(
    /// Identifier of a tag
    TagId
);

impl TaskId {
    /// Build a placeholder id from a locally unique suffix.
    pub fn placeholder(suffix: &str) -> Self {
        TaskId(format!("{}{}", PLACEHOLDER_PREFIX, suffix))
    }

    /// True when the server has not yet assigned this task a real id.
    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(PLACEHOLDER_PREFIX)
    }
}

/// Source of placeholder ids for locally created tasks.
pub trait IdGenerator: Send + Sync {
    fn placeholder_id(&self) -> TaskId;
}

/// Random v4 uuid placeholders.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn placeholder_id(&self) -> TaskId {
        TaskId::placeholder(&uuid::Uuid::new_v4().to_string())
    }
}
