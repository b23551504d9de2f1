//! Frame splitting and event decoding for the chat wire format.
//!
//! Chunks arrive with no alignment guarantees: a frame may span several
//! chunks and one chunk may hold several frames. Frames are separated by a
//! blank line; each non-empty line inside a frame is either a `data: <json>`
//! payload, a bare JSON object, or a `:` comment used as a heartbeat.

use tracing::debug;

use crate::protocol::ProtocolEvent;

#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one transport chunk and returns every event completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<ProtocolEvent> {
        self.pending.push_str(chunk);
        let mut events = Vec::new();
        while let Some((frame_end, separator_len)) = frame_boundary(&self.pending) {
            let frame: String = self.pending.drain(..frame_end + separator_len).collect();
            decode_frame(&frame[..frame_end], &mut events);
        }
        events
    }

    /// Decodes whatever is still pending. Call once when the transport
    /// closes; a final frame is valid without its blank-line terminator.
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        let rest = std::mem::take(&mut self.pending);
        let mut events = Vec::new();
        decode_frame(&rest, &mut events);
        events
    }
}

fn frame_boundary(pending: &str) -> Option<(usize, usize)> {
    let lf = pending.find("\n\n").map(|at| (at, 2));
    let crlf = pending.find("\r\n\r\n").map(|at| (at, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (found, None) => found,
        (None, found) => found,
    }
}

fn decode_frame(frame: &str, events: &mut Vec<ProtocolEvent>) {
    for line in frame.lines() {
        if let Some(event) = decode_line(line) {
            events.push(event);
        }
    }
}

fn decode_line(line: &str) -> Option<ProtocolEvent> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let payload = line
        .strip_prefix("data:")
        .map(str::trim_start)
        .unwrap_or(line);
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(error) => {
            // Malformed payloads are dropped without surfacing an error.
            debug!(%error, "dropping undecodable stream payload");
            None
        }
    }
}
