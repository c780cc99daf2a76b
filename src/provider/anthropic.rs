//! Adapter for the Anthropic messages protocol.

use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::observability::ADAPTER_CHUNKS;
use crate::provider::{
    ChunkStream, Completion, http_client, log_upstream_error, open_event_stream, parse_base_url,
};
use crate::sse::SseFrame;
use crate::types::{
    AnthropicMessage, AnthropicRequest, AnthropicRole, AnthropicStreamEvent, Chunk, ContentDelta,
    Delta, Message, Role,
};

/// Anthropic's public endpoint.
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";
/// Completion length cap sent when none is configured.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const PROVIDER: &str = "anthropic";

/// The persona substituted when [`SystemPreamble::DefaultPersona`] is selected.
pub const DEFAULT_PERSONA: &str = "You are a helpful, concise assistant. Answer directly and \
use Markdown for code and lists.";

/// What to send as the system prompt when the conversation has no leading system message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SystemPreamble {
    /// Send no system prompt.
    #[default]
    Off,

    /// Send the given persona text.
    DefaultPersona(String),
}

impl SystemPreamble {
    /// The built-in persona.
    pub fn default_persona() -> Self {
        SystemPreamble::DefaultPersona(DEFAULT_PERSONA.to_string())
    }

    fn text(&self) -> Option<String> {
        match self {
            SystemPreamble::Off => None,
            SystemPreamble::DefaultPersona(text) => Some(text.clone()),
        }
    }
}

/// Streams completions from an Anthropic-style endpoint.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    max_tokens: u32,
    preamble: SystemPreamble,
}

impl AnthropicAdapter {
    /// Create an adapter for Anthropic's public endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_options(api_key, None, None)
    }

    /// Create an adapter with a custom endpoint and connect timeout.
    pub fn with_options(
        api_key: impl Into<String>,
        base_url: Option<&str>,
        connect_timeout: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))?,
            base_url: parse_base_url(base_url.unwrap_or(ANTHROPIC_API_URL))?,
            api_key: api_key.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            preamble: SystemPreamble::Off,
        })
    }

    /// Sets the system preamble policy.
    pub fn with_preamble(mut self, preamble: SystemPreamble) -> Self {
        self.preamble = preamble;
        self
    }

    /// Sets the maximum tokens per response.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Build the request body for `messages`.
    pub fn request(&self, model: &str, messages: &[Message]) -> AnthropicRequest {
        let (system, messages) = to_anthropic_messages(messages, &self.preamble);
        AnthropicRequest {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            system,
            messages,
            stream: true,
        }
    }
}

#[async_trait::async_trait]
impl Completion for AnthropicAdapter {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<ChunkStream> {
        let url = self.base_url.join("messages")?;
        let body = self.request(model, messages);
        debug!(model, messages = body.messages.len(), "opening completion stream");
        let request = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&body);
        let frames = open_event_stream(PROVIDER, request).await?;
        Ok(Box::pin(chunks_from_frames(frames)))
    }
}

/// Split the conversation into an out-of-band system prompt and Anthropic messages.
///
/// A leading system message becomes the system prompt.  Without one, the preamble policy
/// decides.  Any later system message is downgraded to a user message because the protocol
/// has a single system channel.
pub fn to_anthropic_messages(
    messages: &[Message],
    preamble: &SystemPreamble,
) -> (Option<String>, Vec<AnthropicMessage>) {
    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => (Some(first.content.clone()), rest),
        _ => (preamble.text(), messages),
    };
    let messages = rest
        .iter()
        .map(|message| AnthropicMessage {
            role: match message.role {
                Role::Assistant => AnthropicRole::Assistant,
                Role::User | Role::System => AnthropicRole::User,
            },
            content: message.content.clone(),
        })
        .collect();
    (system, messages)
}

/// Translate a single upstream event into a normalized chunk.
///
/// Returns `Ok(None)` for event types that carry nothing for a text relay.
///
/// # Errors
///
/// In-band `error` events become [`Error::UpstreamTransport`].
pub fn translate_event(event: AnthropicStreamEvent) -> Result<Option<Chunk>> {
    match event {
        AnthropicStreamEvent::MessageStart { message } => {
            Ok(Some(Chunk::delta(Delta::role(message.role))))
        }
        AnthropicStreamEvent::ContentBlockDelta {
            delta: ContentDelta::TextDelta { text },
            ..
        } => Ok(Some(Chunk::delta(Delta::content(text)))),
        AnthropicStreamEvent::MessageStop => Ok(Some(Chunk::Done)),
        AnthropicStreamEvent::Error { error } => Err(Error::upstream(
            format!("{}: {}", error.error_type, error.message),
            None,
        )),
        AnthropicStreamEvent::ContentBlockStart { .. }
        | AnthropicStreamEvent::ContentBlockDelta { .. }
        | AnthropicStreamEvent::ContentBlockStop { .. }
        | AnthropicStreamEvent::MessageDelta
        | AnthropicStreamEvent::Ping
        | AnthropicStreamEvent::Unknown => Ok(None),
    }
}

/// Turn an upstream frame stream into a normalized chunk stream.
///
/// The stream ends after the terminal chunk or after the first error.
pub fn chunks_from_frames<S>(frames: S) -> impl Stream<Item = Result<Chunk>> + Send
where
    S: Stream<Item = Result<SseFrame>> + Send + 'static,
{
    stream::unfold(Some(Box::pin(frames)), |state| async move {
        let mut frames = state?;
        loop {
            let frame = match frames.next().await? {
                Ok(frame) => frame,
                Err(err) => return Some((Err(log_upstream_error(PROVIDER, err)), None)),
            };
            let Some(data) = frame.data else {
                continue;
            };
            let translated = serde_json::from_str::<AnthropicStreamEvent>(&data)
                .map_err(|e| {
                    Error::upstream(format!("Unparseable message event: {e}"), Some(Box::new(e)))
                })
                .and_then(translate_event);
            match translated {
                Ok(Some(chunk)) => {
                    ADAPTER_CHUNKS.click();
                    let next = if chunk.is_done() { None } else { Some(frames) };
                    return Some((Ok(chunk), next));
                }
                Ok(None) => continue,
                Err(err) => return Some((Err(log_upstream_error(PROVIDER, err)), None)),
            }
        }
    })
}
