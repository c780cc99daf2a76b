//! HTTP wiring for the relay endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use futures::Stream;
use tracing::{info, warn};

use crate::error::Error;
use crate::observability::{RELAY_REQUESTS, RELAY_UNAUTHORIZED, RELAY_UNKNOWN_MODEL};
use crate::provider::Completion;
use crate::relay::auth::{BasicAuth, challenge};
use crate::relay::encoder::{DEFAULT_IDLE_TIMEOUT, error_stream, relay_stream};
use crate::types::{RelayRequest, provider_for_model};

/// The path the relay is served on.
pub const RELAY_PATH: &str = "/api/message";

/// Shared state for relay handlers.
#[derive(Clone)]
pub struct RelayState {
    completion: Arc<dyn Completion>,
    auth: Option<BasicAuth>,
    idle_timeout: Duration,
}

impl RelayState {
    /// Serve completions from `completion`, requiring `auth` when set.
    pub fn new(completion: Arc<dyn Completion>, auth: Option<BasicAuth>) -> Self {
        Self {
            completion,
            auth,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Abandon upstream streams that go quiet for longer than `idle_timeout`.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Build the relay router.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route(RELAY_PATH, post(relay_message))
        .with_state(state)
}

async fn relay_message(
    State(state): State<RelayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    RELAY_REQUESTS.click();
    if let Some(auth) = &state.auth
        && !auth.is_authorized(&headers)
    {
        RELAY_UNAUTHORIZED.click();
        warn!("rejecting unauthenticated relay request");
        return unauthorized();
    }

    let request: RelayRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, format!("invalid request body: {err}"))
                .into_response();
        }
    };

    if let Err(err) = provider_for_model(&request.model) {
        RELAY_UNKNOWN_MODEL.click();
        warn!(model = %request.model, "rejecting request for unknown model");
        return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
    }

    info!(
        model = %request.model,
        messages = request.messages.len(),
        "relaying completion"
    );
    let opened = state
        .completion
        .complete(&request.model, &request.messages)
        .await;
    match opened {
        Ok(chunks) => sse_response(relay_stream(request.model, chunks, state.idle_timeout)),
        Err(err @ Error::Configuration { .. }) => {
            warn!(model = %request.model, error = %err, "provider not configured");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
        }
        Err(err) => sse_response(error_stream(&request.model, err)),
    }
}

fn unauthorized() -> Response {
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, challenge());
    response
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, std::convert::Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    (headers, Body::from_stream(stream)).into_response()
}
