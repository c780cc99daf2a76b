//! Wire shapes of OpenAI-style chat completion streaming.

use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Request body for a streaming chat completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest<'a> {
    /// The model identifier.
    pub model: &'a str,

    /// The conversation, passed through unchanged.
    pub messages: &'a [Message],

    /// Always true for the relay.
    pub stream: bool,

    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

/// One `data:` frame of an OpenAI-style completion stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatCompletionChunk {
    /// The choices; the relay only ever requests one.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// A choice within a [`ChatCompletionChunk`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChunkChoice {
    /// The incremental role/content fragment.
    #[serde(default)]
    pub delta: ChoiceDelta,

    /// Unset while the choice is still generating.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The delta carried by a [`ChunkChoice`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChoiceDelta {
    /// Set on the first frame only.
    #[serde(default)]
    pub role: Option<String>,

    /// Content fragment; null on role-only and terminal frames.
    #[serde(default)]
    pub content: Option<String>,
}
