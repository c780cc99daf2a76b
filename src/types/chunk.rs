use serde::{Deserialize, Serialize};

use crate::types::Delta;

/// The normalized, provider-agnostic unit emitted by a provider adapter.
///
/// Provider-specific event types never appear past the adapter boundary; this is the whole
/// vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Chunk {
    /// A partial message fragment.
    Delta {
        /// The fragment to fold into the in-flight message.
        delta: Delta,
    },

    /// The terminal chunk of a completion.
    Done,
}

impl Chunk {
    /// Create a delta chunk.
    pub fn delta(delta: Delta) -> Self {
        Chunk::Delta { delta }
    }

    /// Returns true if this is the terminal chunk.
    pub fn is_done(&self) -> bool {
        matches!(self, Chunk::Done)
    }
}

impl From<Delta> for Chunk {
    fn from(delta: Delta) -> Self {
        Chunk::delta(delta)
    }
}
