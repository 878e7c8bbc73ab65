//! Frame decoder for the chat completion event stream.
//!
//! The endpoint answers with SSE-style records separated by a blank line:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":[{"text":"Hel"}]}}]}
//!
//! : keep-alive
//!
//! data: {"choices":[{"delta":{"content":[{"text":"lo"}]}}]}
//!
//! data: [DONE]
//!
//! ```
//!
//! HTTP gives no guarantee about where chunk boundaries fall, so [`FrameDecoder`]
//! keeps a single byte buffer and only hands out a record once its separator has
//! actually been seen. Records are decoded from bytes only when complete, which also
//! keeps multi-byte UTF-8 sequences split across chunks intact.
//!
//! Decoding rules for a complete record:
//!
//! - the record is trimmed; anything not starting with `data:` is metadata and skipped
//! - `data: [DONE]` ends decoding and is never parsed as JSON
//! - malformed JSON is dropped and decoding continues
//!
//! [`decode_stream`] wraps the decoder around any byte stream (in practice
//! `reqwest::Response::bytes_stream()`).

use crate::{Error, Result};
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;

/// Marker the server sends after the last record.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

/// Decoded JSON payloads in arrival order.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Incremental record splitter.
///
/// Feed it chunks with [`push`](FrameDecoder::push); it returns the payloads of every
/// record completed by that chunk and keeps the trailing partial record buffered.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    done: bool,
}

enum Record {
    Payload(Value),
    Done,
    Skip,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been seen. Further input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Appends `chunk` and returns the payloads of all records it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        let mut payloads = Vec::new();
        if self.done {
            return payloads;
        }

        self.buffer.extend_from_slice(chunk);

        while let Some((end, separator_len)) = find_separator(&self.buffer) {
            let record: Vec<u8> = self.buffer.drain(..end + separator_len).collect();
            match decode_record(&record[..end]) {
                Record::Payload(value) => payloads.push(value),
                Record::Done => {
                    self.done = true;
                    self.buffer.clear();
                    break;
                }
                Record::Skip => {}
            }
        }

        payloads
    }

    /// Signals the transport ended. A trailing record without its separator is
    /// incomplete and gets discarded.
    pub fn finish(&mut self) {
        if !self.done && !self.buffer.iter().all(u8::is_ascii_whitespace) {
            log::debug!(
                "Discarding {} bytes of unterminated trailing record",
                self.buffer.len()
            );
        }
        self.buffer.clear();
        self.done = true;
    }
}

/// Position and length of the earliest blank-line separator.
fn find_separator(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = find_subslice(buffer, b"\n\n").map(|pos| (pos, 2));
    let crlf = find_subslice(buffer, b"\r\n\r\n").map(|pos| (pos, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn decode_record(bytes: &[u8]) -> Record {
    let text = String::from_utf8_lossy(bytes);
    let record = text.trim();

    let Some(payload) = record.strip_prefix(DATA_PREFIX) else {
        if !record.is_empty() {
            log::trace!("Skipping non-data record: {}", record);
        }
        return Record::Skip;
    };

    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Record::Done;
    }

    match serde_json::from_str(payload) {
        Ok(value) => Record::Payload(value),
        Err(e) => {
            let err = Error::decode(e.to_string());
            log::trace!("Dropping malformed record ({}): {}", err, payload);
            Record::Skip
        }
    }
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: FrameDecoder,
    pending: VecDeque<Value>,
    finished: bool,
}

/// Turns a raw byte stream into a stream of decoded JSON payloads.
///
/// The stream ends at the `[DONE]` sentinel or when `body` ends. A transport error is
/// yielded once as [`Error::Stream`] and terminates the stream; decode errors never
/// surface.
pub fn decode_stream<S, B, E>(body: S) -> FrameStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(value) = state.pending.pop_front() {
                return Some((Ok(value), state));
            }
            if state.finished || state.decoder.is_done() {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let payloads = state.decoder.push(chunk.as_ref());
                    state.pending.extend(payloads);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(Error::stream(e.to_string())), state));
                }
                None => {
                    state.decoder.finish();
                    state.finished = true;
                }
            }
        }
    });

    Box::pin(stream)
}
