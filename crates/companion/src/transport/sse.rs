//! Server-Sent Events (SSE) frame parser.
//!
//! This module turns the raw byte stream of a `text/event-stream` response
//! into a stream of [`SseEvent`]s. Frames are separated by a blank line;
//! comment lines (starting with `:`) are skipped and multi-line `data`
//! fields are joined with `\n`.

use docbridge_types::CompanionError;
use futures_util::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;

use super::EventStream;

/// Event name used when a frame has no `event:` field.
const DEFAULT_EVENT: &str = "message";

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, or `message` when absent.
    pub event: String,
    /// The joined `data:` lines.
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }
}

/// Adapt a chunked byte stream into an [`EventStream`].
///
/// A chunk error yields one `Network` error item and ends the stream. A
/// trailing frame without its terminating blank line is discarded.
pub(crate) fn event_stream<S, B, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = FrameReader {
        bytes: Box::pin(bytes),
        buffer: FrameBuffer::default(),
        ready: VecDeque::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut reader| async move {
        loop {
            if let Some(event) = reader.ready.pop_front() {
                return Some((Ok(event), reader));
            }
            if reader.finished {
                return None;
            }
            match reader.bytes.next().await {
                Some(Ok(chunk)) => {
                    reader.buffer.extend(chunk.as_ref());
                    reader.buffer.drain_frames(&mut reader.ready);
                }
                Some(Err(error)) => {
                    reader.finished = true;
                    return Some((Err(CompanionError::network(format!("event stream error: {error}"))), reader));
                }
                None => return None,
            }
        }
    })
    .boxed()
}

struct FrameReader<S> {
    bytes: std::pin::Pin<Box<S>>,
    buffer: FrameBuffer,
    ready: VecDeque<SseEvent>,
    finished: bool,
}

/// Bytes not yet split into frames, plus how far they were already searched.
#[derive(Debug, Default)]
struct FrameBuffer {
    bytes: Vec<u8>,
    scanned: usize,
}

impl FrameBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Move every complete frame into `ready`.
    fn drain_frames(&mut self, ready: &mut VecDeque<SseEvent>) {
        while let Some((end, separator_len)) = find_frame_end(&self.bytes, self.scanned) {
            if let Ok(text) = std::str::from_utf8(&self.bytes[..end]) {
                if let Some(event) = parse_frame(text) {
                    ready.push_back(event);
                }
            } else {
                tracing::debug!(target: "companion_transport", "dropping non UTF-8 SSE frame");
            }
            self.bytes.drain(..end + separator_len);
            self.scanned = 0;
        }
        // A separator may straddle the next chunk boundary.
        self.scanned = self.bytes.len().saturating_sub(3);
    }
}

/// Locate the first blank-line separator at or after `from`, returning its
/// offset and length.
fn find_frame_end(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    for index in from..buffer.len() {
        let rest = &buffer[index..];
        if rest.starts_with(b"\r\n\r\n") {
            return Some((index, 4));
        }
        if rest.starts_with(b"\n\n") {
            return Some((index, 2));
        }
    }
    None
}

/// Parse a frame's lines into an event. Comment-only frames yield `None`.
fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut data_lines = Vec::new();
    let mut event: Option<String> = None;
    let mut id: Option<String> = None;

    for line in frame.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event = Some(value.trim().to_string()),
            "id" => id = Some(value.trim().to_string()),
            // retry hints are not used; reconnect timing is owned by the client
            _ => {}
        }
    }

    if data_lines.is_empty() && event.is_none() {
        return None;
    }
    Some(SseEvent {
        event: event.filter(|name| !name.is_empty()).unwrap_or_else(|| DEFAULT_EVENT.to_string()),
        data: data_lines.join("\n"),
        id,
    })
}
