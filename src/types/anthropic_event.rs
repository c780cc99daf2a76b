//! Wire shapes of the Anthropic messages API, restricted to what a text relay needs.

use serde::{Deserialize, Serialize};

/// Request body for a streaming messages call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicRequest {
    /// The model identifier.
    pub model: String,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// The out-of-band system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The conversation without its leading system message.
    pub messages: Vec<AnthropicMessage>,

    /// Always true for the relay.
    pub stream: bool,
}

/// A message as the Anthropic API accepts it: only user and assistant roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnthropicMessage {
    /// The role.
    pub role: AnthropicRole,

    /// The text content.
    pub content: String,
}

/// Roles the Anthropic API accepts in `messages`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnthropicRole {
    /// User role.
    User,

    /// Assistant role.
    Assistant,
}

/// An event in an Anthropic message stream.
///
/// Events are delivered as message_start, then content block events, then message_stop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    /// Start of the message; carries the role.
    MessageStart {
        /// The message shell.
        message: MessageStart,
    },

    /// Start of a content block.
    ContentBlockStart {
        /// Index of the block.
        #[serde(default)]
        index: usize,
    },

    /// Incremental update to a content block.
    ContentBlockDelta {
        /// Index of the block.
        #[serde(default)]
        index: usize,
        /// The update.
        delta: ContentDelta,
    },

    /// End of a content block.
    ContentBlockStop {
        /// Index of the block.
        #[serde(default)]
        index: usize,
    },

    /// Stop reason and usage updates.
    MessageDelta,

    /// End of the message.
    MessageStop,

    /// Keep-alive.
    Ping,

    /// An error reported in-band.
    Error {
        /// The error details.
        error: StreamError,
    },

    /// Any event type this relay does not know about.
    #[serde(other)]
    Unknown,
}

/// The message shell carried by `message_start`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageStart {
    /// Always "assistant" in practice.
    pub role: String,
}

/// The delta carried by `content_block_delta`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /// A text fragment.
    TextDelta {
        /// The text.
        text: String,
    },

    /// Tool input, thinking, signatures and anything else.
    #[serde(other)]
    Other,
}

/// An error event payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamError {
    /// The error type, e.g. "overloaded_error".
    #[serde(rename = "type")]
    pub error_type: String,

    /// Human-readable error message.
    #[serde(default)]
    pub message: String,
}
