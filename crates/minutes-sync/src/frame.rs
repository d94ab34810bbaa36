//! Incremental decoder for the `event:`/`data:` text stream.
//!
//! Bytes are buffered until a `\n` arrives, so chunk boundaries may fall
//! anywhere (inside a field name, between `\r` and `\n`, or in the middle of a
//! multi-byte UTF-8 sequence). A blank line ends a frame.

use tracing::debug;

/// Event name used when a frame carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// One decoded unit of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    /// All `data:` values of the frame joined with `\n`.
    pub data: String,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Line-buffering frame parser. One instance per stream.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
    pending_event: Option<String>,
    pending_data: Vec<String>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every frame completed by it, in order.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk.as_ref());

        let mut consumed = 0;
        let mut lines = Vec::new();
        while let Some(offset) = self.buf[consumed..].iter().position(|b| *b == b'\n') {
            let line = &self.buf[consumed..consumed + offset];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            lines.push(String::from_utf8_lossy(line).into_owned());
            consumed += offset + 1;
        }
        self.buf.drain(..consumed);

        lines
            .iter()
            .filter_map(|line| self.process_line(line))
            .collect()
    }

    /// Ends the stream.
    ///
    /// A trailing lone `\r` counts as the blank line that closes the pending
    /// frame. Anything else still buffered (an unterminated line, or fields
    /// with no closing blank line) is a truncated frame and is dropped.
    pub fn flush(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.buf.as_slice() == b"\r" {
            self.buf.clear();
            frames.extend(self.process_line(""));
        }
        if self.has_partial() {
            debug!(
                buffered_bytes = self.buf.len() as u64,
                pending_data_lines = self.pending_data.len() as u64,
                has_event = self.pending_event.is_some(),
                "discarding truncated trailing frame"
            );
        }
        self.buf.clear();
        self.pending_event = None;
        self.pending_data.clear();
        frames
    }

    /// True when bytes or fields are buffered that no blank line has closed yet.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty() || self.pending_event.is_some() || !self.pending_data.is_empty()
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.pending_event = Some(value.to_string()),
            "data" => self.pending_data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.pending_event.take();
        if event.is_none() && self.pending_data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.pending_data).join("\n");
        let event = event
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT.to_string());
        Some(Frame { event, data })
    }
}
