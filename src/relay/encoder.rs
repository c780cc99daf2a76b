//! Server side of the relay protocol.
//!
//! Every chunk becomes one text event: `delta` events carry the JSON-encoded [`Delta`],
//! `done` and `error` events carry no data.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, error};

use crate::error::Error;
use crate::observability::{RELAY_STREAM_ERRORS, RELAY_STREAMS_CLOSED};
use crate::provider::ChunkStream;
use crate::types::{Chunk, Delta};

/// Event name for a partial message fragment.
pub const DELTA_EVENT: &str = "delta";
/// Event name for graceful termination.
pub const DONE_EVENT: &str = "done";
/// Event name for upstream failure.
pub const ERROR_EVENT: &str = "error";

/// How long an upstream stream may go without producing a chunk before it is abandoned.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Encode a single chunk as a text event.
pub fn encode_chunk(chunk: &Chunk) -> Bytes {
    match chunk {
        Chunk::Delta { delta } => encode_delta(delta),
        Chunk::Done => encode_done(),
    }
}

/// Encode a delta event.
///
/// A delta that cannot be serialized is reported as an `error` event instead.
pub fn encode_delta(delta: &Delta) -> Bytes {
    match serde_json::to_string(delta) {
        Ok(json) => Bytes::from(format!("event: {DELTA_EVENT}\ndata: {json}\n\n")),
        Err(err) => {
            error!(error = %err, "could not serialize delta");
            encode_error()
        }
    }
}

/// Encode the terminal `done` event.
pub fn encode_done() -> Bytes {
    Bytes::from(format!("event: {DONE_EVENT}\n\n"))
}

/// Encode the `error` event.
pub fn encode_error() -> Bytes {
    Bytes::from(format!("event: {ERROR_EVENT}\n\n"))
}

/// Owns the adapter stream for the lifetime of one relayed response.
///
/// Dropping the guard drops the adapter stream, which releases the upstream connection.  This
/// happens on completion, on upstream error, and when the client disconnects and the response
/// body is dropped mid-stream.
struct StreamGuard {
    model: String,
    chunks: ChunkStream,
    relayed: usize,
    finished: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        RELAY_STREAMS_CLOSED.click();
        if self.finished {
            debug!(model = %self.model, chunks = self.relayed, "relay stream closed");
        } else {
            debug!(
                model = %self.model,
                chunks = self.relayed,
                "relay stream dropped before completion; cancelling upstream"
            );
        }
    }
}

/// Relay an adapter's chunks as an encoded event stream.
///
/// The stream ends after `done`, after the first adapter error (encoded as an `error` event),
/// or when the adapter stream ends on its own.  An adapter that produces nothing for
/// `idle_timeout` is treated as failed.
pub fn relay_stream(
    model: impl Into<String>,
    chunks: ChunkStream,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    let guard = StreamGuard {
        model: model.into(),
        chunks,
        relayed: 0,
        finished: false,
    };
    stream::unfold(Some(guard), move |state| async move {
        let mut guard = state?;
        let next = match tokio::time::timeout(idle_timeout, guard.chunks.next()).await {
            Ok(next) => next,
            Err(_) => Some(Err(Error::upstream(
                format!("upstream produced nothing for {}s", idle_timeout.as_secs()),
                None,
            ))),
        };
        match next {
            Some(Ok(chunk)) => {
                guard.relayed += 1;
                let bytes = encode_chunk(&chunk);
                if chunk.is_done() {
                    guard.finished = true;
                    Some((Ok(bytes), None))
                } else {
                    Some((Ok(bytes), Some(guard)))
                }
            }
            Some(Err(err)) => {
                guard.finished = true;
                Some((Ok(relay_error(&guard.model, err)), None))
            }
            None => {
                guard.finished = true;
                None
            }
        }
    })
}

/// An event stream that reports `err` and closes.
pub fn error_stream(
    model: &str,
    err: Error,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + use<> {
    stream::once(futures::future::ready(Ok(relay_error(model, err))))
}

fn relay_error(model: &str, err: Error) -> Bytes {
    RELAY_STREAM_ERRORS.click();
    error!(model, error = %err, "relaying upstream failure");
    encode_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn relayed(chunks: ChunkStream) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        relay_stream("gpt-4o-2024-05-13", chunks, DEFAULT_IDLE_TIMEOUT)
    }

    async fn collect(stream: impl Stream<Item = Result<Bytes, Infallible>>) -> String {
        let parts: Vec<Bytes> = stream.map(|b| b.unwrap()).collect().await;
        parts
            .iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn delta_encoding() {
        assert_eq!(
            encode_chunk(&Chunk::delta(Delta::content("Hel"))),
            Bytes::from("event: delta\ndata: {\"content\":\"Hel\"}\n\n")
        );
        assert_eq!(encode_chunk(&Chunk::Done), Bytes::from("event: done\n\n"));
        assert_eq!(encode_error(), Bytes::from("event: error\n\n"));
    }

    #[tokio::test]
    async fn relays_until_done() {
        let items: Vec<crate::Result<Chunk>> = vec![
            Ok(Chunk::delta(Delta::role("assistant"))),
            Ok(Chunk::delta(Delta::content("Hi"))),
            Ok(Chunk::Done),
            Ok(Chunk::delta(Delta::content("late"))),
        ];
        let chunks: ChunkStream = Box::pin(stream::iter(items));
        let body = collect(relayed(chunks)).await;
        assert_eq!(
            body,
            "event: delta\ndata: {\"role\":\"assistant\"}\n\n\
             event: delta\ndata: {\"content\":\"Hi\"}\n\n\
             event: done\n\n"
        );
    }

    #[tokio::test]
    async fn adapter_error_becomes_error_event() {
        let items: Vec<crate::Result<Chunk>> = vec![
            Ok(Chunk::delta(Delta::content("Par"))),
            Err(Error::upstream("reset", None)),
        ];
        let chunks: ChunkStream = Box::pin(stream::iter(items));
        let body = collect(relayed(chunks)).await;
        assert_eq!(
            body,
            "event: delta\ndata: {\"content\":\"Par\"}\n\nevent: error\n\n"
        );
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_the_body_releases_the_adapter() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(released.clone());
        let items: Vec<crate::Result<Chunk>> = vec![Ok(Chunk::delta(Delta::content("a")))];
        let chunks: ChunkStream = Box::pin(
            stream::iter(items)
                .chain(stream::pending())
                .map(move |c| {
                    let _ = &flag;
                    c
                }),
        );
        let mut body = Box::pin(relayed(chunks));
        assert!(body.next().await.is_some());
        assert!(!released.load(Ordering::SeqCst));
        drop(body);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_adapter_times_out_with_error_event() {
        let items: Vec<crate::Result<Chunk>> = vec![Ok(Chunk::delta(Delta::content("a")))];
        let chunks: ChunkStream = Box::pin(stream::iter(items).chain(stream::pending()));
        let started = tokio::time::Instant::now();
        let body = collect(relay_stream(
            "gpt-4o-2024-05-13",
            chunks,
            Duration::from_secs(5),
        ))
        .await;
        assert_eq!(
            body,
            "event: delta\ndata: {\"content\":\"a\"}\n\nevent: error\n\n"
        );
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_but_steady_adapter_is_not_cut_off() {
        let chunks: ChunkStream = Box::pin(stream::unfold(0, |n| async move {
            if n == 3 {
                return None;
            }
            tokio::time::sleep(Duration::from_secs(4)).await;
            Some((Ok(Chunk::delta(Delta::content("."))), n + 1))
        }));
        let body = collect(relay_stream(
            "gpt-4o-2024-05-13",
            chunks,
            Duration::from_secs(5),
        ))
        .await;
        assert!(!body.contains("event: error"));
        assert_eq!(body.matches("event: delta").count(), 3);
    }

    #[tokio::test]
    async fn error_stream_is_a_single_event() {
        let body = collect(error_stream("gpt-4o-2024-05-13", Error::upstream("x", None))).await;
        assert_eq!(body, "event: error\n\n");
    }
}
