//! Server-Sent Events (SSE) framing.
//!
//! This module turns a raw byte stream into a stream of [`SseFrame`]s.  It is shared by the
//! upstream provider adapters (which read provider event streams) and by the relay decoder
//! (which reads the relay's own event stream).  Interpretation of the frames is left to the
//! caller.

use std::error;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::error::{Error, Result};
use crate::observability::SSE_FRAMES;

/// One event of a text event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// The `event:` field, if present.
    pub event: Option<String>,

    /// The `data:` field(s) joined by newlines, or `None` when the frame carried no data.
    pub data: Option<String>,
}

impl SseFrame {
    /// The event name, defaulting to "message" as the SSE standard does.
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Process a stream of bytes into a stream of server-sent event frames.
///
/// Frames may be split across chunks arbitrarily, including inside a multi-byte character.
/// Errors from the byte stream are surfaced as [`Error::UpstreamTransport`] and the stream
/// ends after yielding them.
///
/// ```
/// use bytes::Bytes;
/// use futures::StreamExt;
///
/// # tokio_test::block_on(async {
/// let body: Vec<Result<Bytes, std::io::Error>> = vec![
///     Ok(Bytes::from_static(b"event: delta\ndata: {\"content\":\"Hel")),
///     Ok(Bytes::from_static(b"lo\"}\n\nevent: done\n\n")),
/// ];
/// let frames: Vec<_> = relaychat::sse::process_sse(futures::stream::iter(body))
///     .collect()
///     .await;
/// assert_eq!(frames.len(), 2);
/// let first = frames[0].as_ref().unwrap();
/// assert_eq!(first.event_name(), "delta");
/// assert_eq!(first.data.as_deref(), Some("{\"content\":\"Hello\"}"));
/// # })
/// ```
pub fn process_sse<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseFrame>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: error::Error + Send + Sync + 'static,
{
    let stream = Box::pin(byte_stream);
    let buffer: Vec<u8> = Vec::new();

    stream::unfold(
        Some((stream, buffer)),
        move |state| async move {
            let (mut stream, mut buffer) = state?;
            loop {
                // First check if we have a complete frame in the buffer
                if let Some(frame) = extract_frame(&mut buffer) {
                    match frame {
                        Ok(Some(frame)) => {
                            SSE_FRAMES.click();
                            return Some((Ok(frame), Some((stream, buffer))));
                        }
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), Some((stream, buffer)))),
                    }
                }

                // Read more data
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
                    }
                    Some(Err(e)) => {
                        let err = Error::upstream(
                            format!("Error in HTTP stream: {e}"),
                            Some(Box::new(e)),
                        );
                        return Some((Err(err), None));
                    }
                    None => {
                        // End of stream; a trailing frame need not be blank-line terminated.
                        if buffer.iter().all(|b| b.is_ascii_whitespace()) {
                            return None;
                        }
                        buffer.extend_from_slice(b"\n\n");
                        return match extract_frame(&mut buffer) {
                            Some(Ok(Some(frame))) => {
                                SSE_FRAMES.click();
                                Some((Ok(frame), None))
                            }
                            Some(Err(e)) => Some((Err(e), None)),
                            _ => None,
                        };
                    }
                }
            }
        },
    )
}

/// Remove the first blank-line terminated frame from `buffer` and parse it.
///
/// Returns `None` when no complete frame is buffered, and `Some(Ok(None))` for frames that
/// carry no fields (comments, keep-alives).
fn extract_frame(buffer: &mut Vec<u8>) -> Option<Result<Option<SseFrame>>> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let raw: Vec<u8> = buffer.drain(..end + 2).take(end).collect();
    let text = match std::str::from_utf8(&raw) {
        Ok(text) => text,
        Err(e) => return Some(Err(e.into())),
    };
    Some(Ok(parse_frame(text)))
}

/// Parse the lines of a single frame.
pub(crate) fn parse_frame(text: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut saw_field = false;
    for line in text.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                frame.event = Some(value.to_string());
                saw_field = true;
            }
            "data" => {
                match frame.data.as_mut() {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => frame.data = Some(value.to_string()),
                }
                saw_field = true;
            }
            // id and retry carry nothing the relay uses
            _ => {}
        }
    }
    if saw_field { Some(frame) } else { None }
}
