use serde::{Deserialize, Serialize};

/// A partial, provider-emitted fragment of an in-progress assistant message.
///
/// Only meaningful as an input to [`crate::accumulate`].  Absent fields are omitted on the wire
/// rather than sent as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Partial role text; usually set once, on the first delta of a turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Partial content text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Delta {
    /// Create a delta carrying only a role fragment.
    pub fn role(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            content: None,
        }
    }

    /// Create a delta carrying only a content fragment.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            role: None,
            content: Some(content.into()),
        }
    }
}
