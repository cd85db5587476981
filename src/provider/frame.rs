//! Frame decoding for the line-delimited streaming protocol.
//!
//! Each frame is a `data:` line carrying a JSON chunk; a literal `[DONE]` payload ends
//! the stream. Bytes arrive in arbitrary pieces, so both an unfinished UTF-8 sequence
//! and an unfinished line are carried over to the next read.

use crate::error::{ProviderError, ProviderErrorKind};
use crate::provider::FragmentStream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::fmt::Display;
use tracing::debug;

pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

/// What one complete line decoded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameLine {
    Fragment(String),
    Done,
    Skip,
}

/// Incremental decoder; feed it byte chunks in arrival order.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending_bytes: Vec<u8>,
    pending_line: String,
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the terminator frame was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode one chunk and return the fragments completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.decode_utf8(chunk);
        self.pending_line.push_str(&text);

        let mut fragments = Vec::new();
        while let Some(pos) = self.pending_line.find('\n') {
            let line: String = self.pending_line.drain(..=pos).collect();
            self.accept_line(line.trim_end_matches(['\n', '\r']), &mut fragments);
        }
        fragments
    }

    /// Flush a trailing line that never got its newline.
    pub fn finish(&mut self) -> Vec<String> {
        let mut fragments = Vec::new();
        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.pending_bytes.clear();
            self.pending_line.push_str(&tail);
        }
        let line = std::mem::take(&mut self.pending_line);
        self.accept_line(line.trim_end_matches('\r'), &mut fragments);
        fragments
    }

    fn accept_line(&mut self, line: &str, fragments: &mut Vec<String>) {
        if self.done {
            return;
        }
        match parse_frame_line(line) {
            FrameLine::Fragment(text) => fragments.push(text),
            FrameLine::Done => self.done = true,
            FrameLine::Skip => {}
        }
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.pending_bytes.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending_bytes.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end: keep it for the next chunk.
                        None => {
                            self.pending_bytes.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

/// Decode one complete protocol line.
pub fn parse_frame_line(line: &str) -> FrameLine {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return FrameLine::Skip;
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return FrameLine::Done;
    }
    if payload.is_empty() {
        return FrameLine::Skip;
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "Skipping malformed stream frame");
            return FrameLine::Skip;
        }
    };

    let choice = value.get("choices").and_then(|c| c.get(0));
    let content = choice
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .or_else(|| {
            choice
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
        })
        .and_then(Value::as_str);

    match content {
        Some(text) if !text.is_empty() => FrameLine::Fragment(text.to_string()),
        _ => FrameLine::Skip,
    }
}

/// Turn a byte stream into a lazy stream of content fragments.
///
/// Every call builds a fresh decoder, so the returned stream is independent of any
/// other. A read error ends the stream with that error; malformed frames never do.
pub fn decode_fragments<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut decoder = FrameDecoder::new();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for fragment in decoder.push(chunk.as_ref()) {
                        yield Ok(fragment);
                    }
                    if decoder.is_done() {
                        return;
                    }
                }
                Err(err) => {
                    yield Err(ProviderError::new(
                        ProviderErrorKind::ServerError,
                        format!("Stream read failed: {}", err),
                    ));
                    return;
                }
            }
        }
        for fragment in decoder.finish() {
            yield Ok(fragment);
        }
    })
}
