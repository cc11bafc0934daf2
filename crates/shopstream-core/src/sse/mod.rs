//! Incremental decoder for the `id`/`event`/`data` event-stream protocol.
//!
//! Transports deliver bytes in arbitrary chunks: a boundary may fall inside a
//! line, a field marker, or a multi-byte UTF-8 code point. [`FrameDecoder`]
//! buffers text until a blank line closes a frame and only then yields it.
//! [`FrameStream`] drives a decoder from an async byte stream.

mod stream;

use std::borrow::Cow;

use serde::Serialize;
use serde_json::Value;
pub use stream::FrameStream;

/// Frame separator once line endings are normalized to LF.
const FRAME_DELIMITER: &str = "\n\n";

/// One complete protocol record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Frame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Parsed JSON payload, or the raw joined `data:` text when it is not JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Frame {
    /// Returns the event name, if the frame carried one.
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }
}

/// Push-based frame decoder for one stream.
///
/// Not restartable: a new connection needs a new decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Leading bytes of a code point whose remaining bytes have not arrived.
    partial_utf8: Vec<u8>,
    /// Decoded, LF-normalized text not yet resolved into a frame.
    buffer: String,
    /// Byte offset before which `buffer` holds no frame boundary.
    scan_from: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a complete byte slice as one stream.
    pub fn decode_all(bytes: &[u8]) -> Vec<Frame> {
        let mut decoder = Self::new();
        let frames = decoder.push(bytes).collect();
        decoder.finish();
        frames
    }

    /// Appends a chunk and returns the frames it completed.
    ///
    /// The iterator is lazy; frames not pulled stay buffered and are returned
    /// by the next call to [`FrameDecoder::next_frame`] or `push`.
    pub fn push(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.feed(chunk);
        Frames { decoder: self }
    }

    /// Appends a chunk without extracting frames.
    pub fn feed(&mut self, chunk: &[u8]) {
        // A CR at the end of the previous chunk may pair with an LF in this one.
        let normalize_from = if self.buffer.ends_with('\r') {
            self.buffer.len() - 1
        } else {
            self.buffer.len()
        };

        self.decode_utf8(chunk);

        if self.buffer[normalize_from..].contains("\r\n") {
            let tail = self.buffer[normalize_from..].replace("\r\n", "\n");
            self.buffer.truncate(normalize_from);
            self.buffer.push_str(&tail);
            // A rewritten CR may now complete a boundary with the LF before it.
            self.scan_from = self.scan_from.min(normalize_from.saturating_sub(1));
        }
    }

    /// Extracts the next complete frame, if a boundary is buffered.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let Some(pos) = self.find_delimiter() else {
                // The delimiter may straddle the end of the buffer.
                self.scan_from = self.buffer.len().saturating_sub(FRAME_DELIMITER.len() - 1);
                return None;
            };
            let frame = parse_frame(&self.buffer[..pos]);
            self.buffer.drain(..pos + FRAME_DELIMITER.len());
            self.scan_from = 0;
            if frame.is_some() {
                return frame;
            }
        }
    }

    /// Finds the next frame boundary at or after `scan_from`.
    ///
    /// Searches bytes, since `scan_from` may sit inside a multi-byte code
    /// point; a match is ASCII and so always lands on a char boundary.
    fn find_delimiter(&self) -> Option<usize> {
        let delimiter = FRAME_DELIMITER.as_bytes();
        self.buffer
            .as_bytes()
            .get(self.scan_from..)?
            .windows(delimiter.len())
            .position(|window| window == delimiter)
            .map(|offset| self.scan_from + offset)
    }

    /// Ends the stream, discarding any incomplete frame.
    ///
    /// Returns the number of discarded bytes (0 when the stream ended cleanly).
    pub fn finish(&mut self) -> usize {
        let discarded = if self.buffer.trim().is_empty() {
            self.partial_utf8.len()
        } else {
            self.buffer.len() + self.partial_utf8.len()
        };
        if discarded > 0 {
            tracing::debug!(bytes = discarded, "discarding incomplete frame at end of stream");
        }
        self.buffer.clear();
        self.partial_utf8.clear();
        self.scan_from = 0;
        discarded
    }

    /// Returns true when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.partial_utf8.is_empty()
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        let joined;
        let mut input: &[u8] = if self.partial_utf8.is_empty() {
            chunk
        } else {
            joined = [std::mem::take(&mut self.partial_utf8).as_slice(), chunk].concat();
            &joined
        };

        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, rest) = input.split_at(err.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(invalid) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[invalid..];
                        }
                        None => {
                            self.partial_utf8 = rest.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Lazy iterator over the frames buffered in a [`FrameDecoder`].
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.decoder.next_frame()
    }
}

/// Parses the text between two frame boundaries.
///
/// Returns `None` when no recognized field is present (keep-alives, comments).
fn parse_frame(raw: &str) -> Option<Frame> {
    let mut frame = Frame::default();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut recognized = false;

    for line in raw.split('\n') {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(value) = line.strip_prefix("id:") {
            frame.id = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("event:") {
            frame.event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim_start());
        } else {
            continue;
        }
        recognized = true;
    }

    if !recognized {
        return None;
    }
    if !data_lines.is_empty() {
        frame.data = Some(decode_payload(data_lines.join("\n")));
    }
    Some(frame)
}

/// Parses a payload as JSON, keeping the raw text when it is not.
pub fn decode_payload(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text))
}

/// Returns a payload as display text: strings verbatim, other values as JSON.
pub(crate) fn payload_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(text) => Cow::Borrowed(text),
        Value::Null => Cow::Borrowed(""),
        other => Cow::Owned(other.to_string()),
    }
}
