//! Provider adapters.
//!
//! Each adapter translates one upstream streaming protocol into the normalized [`Chunk`]
//! vocabulary.  Adapters are selected per model through the static registry in
//! [`crate::types::model_def`]; an unknown model fails before any network call is made.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use tracing::error;
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{ADAPTER_ERRORS, ADAPTER_STREAMS};
use crate::sse::{SseFrame, process_sse};
use crate::types::{Chunk, Message, ProviderKind, provider_for_model};

pub mod anthropic;
pub mod openai;

pub use anthropic::{AnthropicAdapter, DEFAULT_PERSONA, SystemPreamble};
pub use openai::{DecodingParams, OpenAiAdapter};

/// A lazy, non-restartable sequence of normalized chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk>> + Send>>;

/// The single capability every provider offers.
///
/// Each call opens one fresh upstream stream.  Errors opening the stream are returned
/// directly; errors mid-stream are yielded as the last item of the stream.
#[async_trait::async_trait]
pub trait Completion: Send + Sync {
    /// Stream a completion of `messages` from `model`.
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<ChunkStream>;
}

/// A configured adapter.  Dispatch is by variant.
#[derive(Debug, Clone)]
pub enum Provider {
    /// OpenAI and OpenAI-protocol-compatible endpoints.
    OpenAi(OpenAiAdapter),

    /// Anthropic-style endpoints.
    Anthropic(AnthropicAdapter),
}

#[async_trait::async_trait]
impl Completion for Provider {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<ChunkStream> {
        match self {
            Provider::OpenAi(adapter) => adapter.complete(model, messages).await,
            Provider::Anthropic(adapter) => adapter.complete(model, messages).await,
        }
    }
}

/// The set of adapters the relay can reach, keyed by provider kind.
#[derive(Debug, Clone, Default)]
pub struct Providers {
    adapters: HashMap<ProviderKind, Provider>,
}

impl Providers {
    /// Create an empty set of providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the adapter serving `kind`, replacing any previous one.
    pub fn with(mut self, kind: ProviderKind, provider: Provider) -> Self {
        self.adapters.insert(kind, provider);
        self
    }

    /// Returns the adapter registered for `kind`, if any.
    pub fn get(&self, kind: ProviderKind) -> Option<&Provider> {
        self.adapters.get(&kind)
    }

    /// Resolve the adapter that serves `model`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownModel`] for identifiers missing from the registry and
    /// [`Error::Configuration`] when the provider has no credentials configured.
    pub fn provider_for(&self, model: &str) -> Result<&Provider> {
        let kind = provider_for_model(model)?;
        self.get(kind)
            .ok_or_else(|| Error::configuration(format!("provider {kind} is not configured")))
    }
}

#[async_trait::async_trait]
impl Completion for Providers {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<ChunkStream> {
        self.provider_for(model)?.complete(model, messages).await
    }
}

/// Build the HTTP client shared by adapters.
pub(crate) fn http_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| {
            Error::http_client(
                format!("Failed to build HTTP client: {}", e),
                Some(Box::new(e)),
            )
        })
}

/// Parse a base URL, guaranteeing a trailing slash so relative joins append.
pub(crate) fn parse_base_url(base_url: &str) -> Result<Url> {
    if base_url.ends_with('/') {
        Ok(Url::parse(base_url)?)
    } else {
        Ok(Url::parse(&format!("{base_url}/"))?)
    }
}

/// Send a streaming request and frame its body as server-sent events.
pub(crate) async fn open_event_stream(
    provider: &'static str,
    request: RequestBuilder,
) -> Result<impl Stream<Item = Result<SseFrame>> + Send + 'static> {
    let response = request
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| log_upstream_error(provider, e.into()))?;

    if !response.status().is_success() {
        return Err(log_upstream_error(
            provider,
            process_error_response(response).await,
        ));
    }

    ADAPTER_STREAMS.click();
    Ok(process_sse(response.bytes_stream()))
}

/// Log an upstream failure and hand it back for propagation.
pub(crate) fn log_upstream_error(provider: &'static str, err: Error) -> Error {
    ADAPTER_ERRORS.click();
    error!(provider, error = %err, "upstream completion failed");
    err
}

/// Convert a non-success upstream response into an error.
async fn process_error_response(response: Response) -> Error {
    let status_code = response.status().as_u16();

    #[derive(Deserialize)]
    struct ErrorResponse {
        error: Option<ErrorDetail>,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
    }

    let error_body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            return Error::http_client(
                format!("Failed to read error response: {}", e),
                Some(Box::new(e)),
            );
        }
    };

    let message = serde_json::from_str::<ErrorResponse>(&error_body)
        .ok()
        .and_then(|e| e.error)
        .and_then(|e| e.message)
        .unwrap_or(error_body);
    Error::api(status_code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_model_fails_before_lookup() {
        let providers = Providers::new();
        let err = match providers.complete("gpt-2", &[Message::user("hi")]).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(err.is_unknown_model());
    }

    #[tokio::test]
    async fn unconfigured_provider_is_a_configuration_error() {
        let providers = Providers::new();
        let err = match providers
            .complete("claude-3-opus-20240229", &[Message::user("hi")])
            .await
        {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn providers_dispatch_by_kind() {
        let adapter = OpenAiAdapter::openai("sk-test").unwrap();
        let providers = Providers::new().with(ProviderKind::OpenAi, Provider::OpenAi(adapter));
        assert!(matches!(
            providers.provider_for("gpt-4o-2024-05-13"),
            Ok(Provider::OpenAi(_))
        ));
        assert!(providers.provider_for("claude-3-opus-20240229").is_err());
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let url = parse_base_url("https://api.openai.com/v1").unwrap();
        assert_eq!(
            url.join("chat/completions").unwrap().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
