//! Server-sent events decoding.
//!
//! [`SseDecoder`] turns text chunks into [`SseEvent`]s, holding partial
//! lines across chunk boundaries. [`sse_events`] drives it over any byte
//! stream (normally `reqwest::Response::bytes_stream`), and
//! [`activity_stream`] narrows events to activities, ending at the
//! `end` event.

use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::activity::RawActivity;
use crate::error::TransportError;

/// Event name carrying one activity as JSON.
pub const ACTIVITY_EVENT: &str = "activity";

/// Event name marking the end of the turn.
pub const END_EVENT: &str = "end";

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental line-oriented decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line = self.buffer[..newline].trim_end_matches('\r').to_owned();
            self.buffer.drain(..=newline);

            if line.is_empty() {
                events.extend(self.dispatch());
            } else {
                self.field(&line);
            }
        }
        events
    }

    /// Flush whatever is pending at end of input.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim_end_matches('\r');
        if !rest.is_empty() {
            self.field(rest);
        }
        self.dispatch()
    }

    fn field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            "id" => self.id = Some(value.to_owned()),
            other => tracing::trace!(field = other, "ignoring unknown SSE field"),
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let event = SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.take(),
        };
        Some(event)
    }
}

struct DecodeState<S> {
    bytes: std::pin::Pin<Box<S>>,
    decoder: SseDecoder,
    pending: Vec<u8>,
    ready: std::collections::VecDeque<SseEvent>,
    done: bool,
}

/// Decode a byte stream into events.
pub fn sse_events<S, B, E>(bytes: S) -> impl Stream<Item = Result<SseEvent, TransportError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: Vec::new(),
        ready: std::collections::VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.pending.extend_from_slice(chunk.as_ref());
                    let text = take_utf8(&mut state.pending);
                    state.ready.extend(state.decoder.push(&text));
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((
                        Err(TransportError::Stream {
                            reason: e.to_string(),
                        }),
                        state,
                    ));
                }
                None => {
                    state.done = true;
                    let rest = String::from_utf8_lossy(&state.pending).into_owned();
                    state.ready.extend(state.decoder.push(&rest));
                    state.ready.extend(state.decoder.finish());
                }
            }
        }
    })
}

/// Drain the decodable prefix of `pending`, replacing invalid bytes with
/// U+FFFD. A code point cut off at the end stays behind for the next chunk.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut start = 0;
    while start < pending.len() {
        match std::str::from_utf8(&pending[start..]) {
            Ok(valid) => {
                text.push_str(valid);
                start = pending.len();
            }
            Err(e) => {
                let valid_end = start + e.valid_up_to();
                text.push_str(std::str::from_utf8(&pending[start..valid_end]).unwrap_or_default());
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        start = valid_end + len;
                    }
                    None => {
                        start = valid_end;
                        break;
                    }
                }
            }
        }
    }
    pending.drain(..start);
    text
}

/// Narrow an event stream to activities, stopping at [`END_EVENT`].
pub fn activity_stream<S>(events: S) -> BoxStream<'static, Result<RawActivity, TransportError>>
where
    S: Stream<Item = Result<SseEvent, TransportError>> + Send + 'static,
{
    stream::unfold(Some(Box::pin(events)), |state| async move {
        let mut events = state?;
        loop {
            let event = match events.next().await? {
                Ok(event) => event,
                Err(e) => return Some((Err(e), None)),
            };
            match event.event.as_deref() {
                Some(END_EVENT) => {
                    tracing::debug!("end of turn");
                    return None;
                }
                Some(ACTIVITY_EVENT) | None => {
                    let item = serde_json::from_str::<RawActivity>(&event.data).map_err(|e| {
                        TransportError::Decode {
                            reason: format!("{e}: {}", event.data),
                        }
                    });
                    return Some((item, Some(events)));
                }
                Some(other) => tracing::trace!(event = other, "skipping non-activity event"),
            }
        }
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
