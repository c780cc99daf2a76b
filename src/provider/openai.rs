//! Adapter for OpenAI's chat completions protocol.
//!
//! The same adapter serves OpenAI itself and any third party speaking the same protocol; they
//! differ only in base URL, credential and fixed decoding parameters.

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
use crate::types::{ChatCompletionChunk, ChatCompletionRequest, Chunk, Delta, Message};

/// OpenAI's public endpoint.
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/";

/// Hyperbolic's OpenAI-compatible endpoint.
pub const HYPERBOLIC_API_URL: &str = "https://api.hyperbolic.xyz/v1/";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const PROVIDER: &str = "openai";

/// Fixed per-provider sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecodingParams {
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling value.
    pub top_p: Option<f32>,
}

impl DecodingParams {
    /// Leave every parameter at the provider's default.
    pub fn provider_defaults() -> Self {
        Self::default()
    }

    /// The parameters used for Hyperbolic-hosted models.
    pub fn hyperbolic() -> Self {
        Self {
            max_tokens: Some(2048),
            temperature: Some(0.7),
            top_p: Some(0.9),
        }
    }
}

/// Streams completions from an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    params: DecodingParams,
}

impl OpenAiAdapter {
    /// Create an adapter for an arbitrary OpenAI-compatible endpoint.
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        params: DecodingParams,
        connect_timeout: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))?,
            base_url: parse_base_url(base_url)?,
            api_key: api_key.into(),
            params,
        })
    }

    /// Create an adapter for OpenAI itself.
    pub fn openai(api_key: impl Into<String>) -> Result<Self> {
        Self::new(
            OPENAI_API_URL,
            api_key,
            DecodingParams::provider_defaults(),
            None,
        )
    }

    /// Create an adapter for Hyperbolic.
    pub fn hyperbolic(api_key: impl Into<String>) -> Result<Self> {
        Self::new(HYPERBOLIC_API_URL, api_key, DecodingParams::hyperbolic(), None)
    }

    /// The decoding parameters sent with every request.
    pub fn params(&self) -> &DecodingParams {
        &self.params
    }
}

#[async_trait::async_trait]
impl Completion for OpenAiAdapter {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<ChunkStream> {
        let url = self.base_url.join("chat/completions")?;
        let body = ChatCompletionRequest {
            model,
            messages,
            stream: true,
            max_tokens: self.params.max_tokens,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
        };
        debug!(model, messages = messages.len(), "opening completion stream");
        let request = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body);
        let frames = open_event_stream(PROVIDER, request).await?;
        Ok(Box::pin(chunks_from_frames(frames)))
    }
}

/// Translate a single upstream frame's choice into a normalized chunk.
///
/// An unset stop indicator yields a delta carrying whatever fragment the event provides; a
/// "stop" indicator yields the terminal chunk.  Any other stop indicator yields nothing.
pub fn translate_chunk(chunk: ChatCompletionChunk) -> Option<Chunk> {
    let choice = chunk.choices.into_iter().next()?;
    match choice.finish_reason.as_deref() {
        None => Some(Chunk::delta(Delta {
            role: choice.delta.role,
            content: choice.delta.content,
        })),
        Some("stop") => Some(Chunk::Done),
        Some(_) => None,
    }
}

/// Turn an upstream frame stream into a normalized chunk stream.
///
/// The stream ends after the terminal chunk, after the `[DONE]` sentinel, or after the first
/// error, whichever comes first.
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
            if data.trim() == "[DONE]" {
                return None;
            }
            let chunk = match serde_json::from_str::<ChatCompletionChunk>(&data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    let err = Error::upstream(
                        format!("Unparseable completion event: {e}"),
                        Some(Box::new(e)),
                    );
                    return Some((Err(log_upstream_error(PROVIDER, err)), None));
                }
            };
            if let Some(chunk) = translate_chunk(chunk) {
                ADAPTER_CHUNKS.click();
                let next = if chunk.is_done() { None } else { Some(frames) };
                return Some((Ok(chunk), next));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> ChatCompletionChunk {
        serde_json::from_value(value).unwrap()
    }

    fn data_frame(value: serde_json::Value) -> Result<SseFrame> {
        Ok(SseFrame {
            event: None,
            data: Some(value.to_string()),
        })
    }

    #[test]
    fn role_frame_becomes_role_delta() {
        let chunk = translate_chunk(parse(json!({
            "choices": [{ "delta": { "role": "assistant" }, "finish_reason": null }]
        })));
        assert_eq!(chunk, Some(Chunk::delta(Delta::role("assistant"))));
    }

    #[test]
    fn null_content_stays_absent() {
        let chunk = translate_chunk(parse(json!({
            "choices": [{ "delta": { "content": null }, "finish_reason": null }]
        })));
        assert_eq!(chunk, Some(Chunk::delta(Delta::default())));
    }

    #[test]
    fn stop_becomes_done() {
        let chunk = translate_chunk(parse(json!({
            "choices": [{ "delta": {}, "finish_reason": "stop" }]
        })));
        assert_eq!(chunk, Some(Chunk::Done));
    }

    #[test]
    fn other_stop_reasons_emit_nothing() {
        let chunk = translate_chunk(parse(json!({
            "choices": [{ "delta": {}, "finish_reason": "length" }]
        })));
        assert_eq!(chunk, None);
        assert_eq!(translate_chunk(parse(json!({ "choices": [] }))), None);
    }

    #[tokio::test]
    async fn stream_ends_after_done() {
        let frames = stream::iter(vec![
            data_frame(json!({ "choices": [{ "delta": { "role": "assistant" }, "finish_reason": null }] })),
            data_frame(json!({ "choices": [{ "delta": { "content": "Hel" }, "finish_reason": null }] })),
            data_frame(json!({ "choices": [{ "delta": { "content": "lo" }, "finish_reason": null }] })),
            data_frame(json!({ "choices": [{ "delta": {}, "finish_reason": "stop" }] })),
            data_frame(json!({ "choices": [{ "delta": { "content": "late" }, "finish_reason": null }] })),
        ]);
        let chunks: Vec<Chunk> = chunks_from_frames(frames)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(
            chunks,
            vec![
                Chunk::delta(Delta::role("assistant")),
                Chunk::delta(Delta::content("Hel")),
                Chunk::delta(Delta::content("lo")),
                Chunk::Done,
            ]
        );
    }

    #[tokio::test]
    async fn done_sentinel_ends_stream() {
        let frames = stream::iter(vec![
            data_frame(json!({ "choices": [{ "delta": { "content": "x" }, "finish_reason": null }] })),
            Ok(SseFrame {
                event: None,
                data: Some("[DONE]".to_string()),
            }),
        ]);
        let chunks: Vec<Result<Chunk>> = chunks_from_frames(frames).collect().await;
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn transport_error_propagates() {
        let frames = stream::iter(vec![
            data_frame(json!({ "choices": [{ "delta": { "content": "x" }, "finish_reason": null }] })),
            Err(Error::upstream("connection reset", None)),
            data_frame(json!({ "choices": [{ "delta": { "content": "y" }, "finish_reason": null }] })),
        ]);
        let chunks: Vec<Result<Chunk>> = chunks_from_frames(frames).collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(chunks[1].as_ref().unwrap_err().is_upstream());
    }

    #[tokio::test]
    async fn garbage_frame_is_an_upstream_error() {
        let frames = stream::iter(vec![Ok(SseFrame {
            event: None,
            data: Some("{not json".to_string()),
        })]);
        let chunks: Vec<Result<Chunk>> = chunks_from_frames(frames).collect().await;
        assert!(chunks[0].as_ref().unwrap_err().is_upstream());
    }

    #[test]
    fn hyperbolic_uses_fixed_parameters() {
        let adapter = OpenAiAdapter::hyperbolic("key").unwrap();
        assert_eq!(adapter.params().max_tokens, Some(2048));
        assert_eq!(adapter.params().temperature, Some(0.7));
    }
}
