//! Client side of the relay protocol.
//!
//! [`decode_events`] interprets relay frames; [`TurnHandle`] moves the decoded events onto a
//! channel the session reads from, and owns the cancellation signal for the turn.

use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::relay::encoder::{DELTA_EVENT, DONE_EVENT, ERROR_EVENT};
use crate::sse::{SseFrame, process_sse};
use crate::types::{Delta, RelayRequest};

/// The default relay endpoint.
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000/api/message";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TURN_CHANNEL_CAPACITY: usize = 64;

/// A decoded relay event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A fragment to fold into the in-flight message.
    Delta(Delta),

    /// The logical end of the stream.
    Done,
}

/// Decode a relay frame stream.
///
/// The stream ends after `done`, after an `error` event, after a malformed delta, or after a
/// transport error.  A stream that closes without `done` is treated as done.
pub fn decode_events<S>(frames: S) -> impl Stream<Item = Result<RelayEvent>> + Send
where
    S: Stream<Item = Result<SseFrame>> + Send + 'static,
{
    stream::unfold(Some(Box::pin(frames)), |state| async move {
        let mut frames = state?;
        loop {
            let frame = match frames.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => return Some((Err(err), None)),
                None => return Some((Ok(RelayEvent::Done), None)),
            };
            match frame.event_name() {
                DONE_EVENT => return Some((Ok(RelayEvent::Done), None)),
                DELTA_EVENT => {
                    return match parse_delta(frame.data.as_deref()) {
                        Ok(delta) => Some((Ok(RelayEvent::Delta(delta)), Some(frames))),
                        Err(err) => Some((Err(err), None)),
                    };
                }
                ERROR_EVENT => {
                    return Some((
                        Err(Error::upstream("relay reported an upstream error", None)),
                        None,
                    ));
                }
                other => {
                    debug!(event = other, "ignoring relay event");
                }
            }
        }
    })
}

/// Parse and validate a delta payload.
pub fn parse_delta(data: Option<&str>) -> Result<Delta> {
    let Some(data) = data else {
        return Err(Error::malformed_delta("delta event without data", None));
    };
    serde_json::from_str(data)
        .map_err(|e| Error::malformed_delta(format!("{e}: {data}"), Some(Box::new(e))))
}

/// One event delivered to the session for an open turn.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// A delta arrived.
    Delta(Delta),

    /// The stream ended, gracefully or by abort.
    Done,

    /// The stream failed.
    Failed(Error),
}

/// The receiving end of one open turn.
///
/// Events are pumped from the decoded stream by a background task.  Cancelling the handle stops
/// delivery immediately and reports [`TurnEvent::Done`], exactly as a graceful end would.
#[derive(Debug)]
pub struct TurnHandle {
    events: mpsc::Receiver<TurnEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl TurnHandle {
    /// Start pumping `stream` into a new handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<RelayEvent>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(TURN_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        tokio::spawn(pump(Box::pin(stream), tx, cancel.clone()));
        Self {
            events: rx,
            cancel,
            finished: false,
        }
    }

    /// The next event, or `None` once a terminal event has been delivered.
    pub async fn next(&mut self) -> Option<TurnEvent> {
        if self.finished {
            return None;
        }
        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => TurnEvent::Done,
            event = self.events.recv() => event.unwrap_or(TurnEvent::Done),
        };
        if !matches!(event, TurnEvent::Delta(_)) {
            self.finished = true;
            self.events.close();
        }
        Some(event)
    }

    /// Request cancellation of the turn.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Returns true once [`TurnHandle::abort`] has been called on this handle or a clone of
    /// its token.
    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A token that aborts this turn when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for TurnHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump<S>(mut stream: S, tx: mpsc::Sender<TurnEvent>, cancel: CancellationToken)
where
    S: Stream<Item = Result<RelayEvent>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("turn aborted; closing relay stream");
                return;
            }
            next = stream.next() => next,
        };
        let (event, terminal) = match next {
            Some(Ok(RelayEvent::Delta(delta))) => (TurnEvent::Delta(delta), false),
            Some(Ok(RelayEvent::Done)) | None => (TurnEvent::Done, true),
            Some(Err(err)) => (TurnEvent::Failed(err), true),
        };
        if tx.send(event).await.is_err() || terminal {
            return;
        }
    }
}

/// Something that can open a streaming turn for a conversation.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a turn answering `request`.
    async fn open(&self, request: RelayRequest) -> Result<TurnHandle>;
}

/// Opens turns against a relay endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    url: Url,
    credentials: Option<(String, String)>,
}

impl RelayClient {
    /// Create a client for the relay at `url`.
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self {
            client,
            url: Url::parse(url)?,
            credentials: None,
        })
    }

    /// Send Basic credentials with every request.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// The relay endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// POST `request` and decode the response as relay events.
    ///
    /// # Errors
    ///
    /// A 401 response becomes [`Error::Unauthorized`]; any other non-success status becomes
    /// [`Error::Api`].
    pub async fn stream(
        &self,
        request: &RelayRequest,
    ) -> Result<impl Stream<Item = Result<RelayEvent>> + Send + 'static + use<>> {
        let mut builder = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request);
        if let Some((username, password)) = &self.credentials {
            builder = builder.basic_auth(username, Some(password));
        }
        let response = builder.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!(url = %self.url, "relay rejected credentials");
            return Err(Error::unauthorized("relay rejected the credentials"));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), body));
        }
        Ok(decode_events(process_sse(response.bytes_stream())))
    }
}

#[async_trait::async_trait]
impl Transport for RelayClient {
    async fn open(&self, request: RelayRequest) -> Result<TurnHandle> {
        let events = self.stream(&request).await?;
        Ok(TurnHandle::spawn(events))
    }
}
