//! Inline `<think>` tag splitting.
//!
//! Upstream interleaves reasoning into text parts between `<think>` and
//! `</think>` markers, and a marker can be split across two SSE payloads.
//! The splitter therefore holds back the longest possible partial tag
//! (6 chars in normal mode, 7 inside a reasoning segment) until more input
//! or end-of-stream resolves it.

use super::StreamEvent;

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Thinking,
}

pub struct ThinkTagSplitter {
    buffer: String,
    mode: Mode,
}

impl Default for ThinkTagSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkTagSplitter {
    pub fn new() -> Self {
        Self { buffer: String::new(), mode: Mode::Normal }
    }

    /// Feed more text and emit everything that is unambiguous.
    pub fn push(&mut self, text: &str, out: &mut (dyn FnMut(StreamEvent) + Send)) {
        self.buffer.push_str(text);
        self.drain(out);
    }

    /// Emit whatever is still buffered, typed by the current mode. Called on
    /// end-of-stream and before a `thought` part is emitted, so ordering
    /// between tagged and flagged reasoning is preserved.
    pub fn flush(&mut self, out: &mut (dyn FnMut(StreamEvent) + Send)) {
        if self.buffer.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.buffer);
        out(self.event_for_mode(text));
    }

    fn event_for_mode(&self, text: String) -> StreamEvent {
        match self.mode {
            Mode::Normal => StreamEvent::Text(text),
            Mode::Thinking => StreamEvent::Thinking(text),
        }
    }

    fn drain(&mut self, out: &mut (dyn FnMut(StreamEvent) + Send)) {
        loop {
            let (tag, holdback) = match self.mode {
                Mode::Normal => (OPEN_TAG, OPEN_TAG.len() - 1),
                Mode::Thinking => (CLOSE_TAG, CLOSE_TAG.len() - 1),
            };

            match self.buffer.find(tag) {
                Some(pos) => {
                    if pos > 0 {
                        let before: String = self.buffer[..pos].to_string();
                        out(self.event_for_mode(before));
                    }
                    self.buffer.drain(..pos + tag.len());
                    self.mode = match self.mode {
                        Mode::Normal => Mode::Thinking,
                        Mode::Thinking => Mode::Normal,
                    };
                },
                None => {
                    // Keep the trailing chars that could still become a tag.
                    let split = trailing_split_point(&self.buffer, holdback);
                    if split > 0 {
                        let ready: String = self.buffer.drain(..split).collect();
                        out(self.event_for_mode(ready));
                    }
                    return;
                },
            }
        }
    }
}

/// Byte index where the trailing `keep_chars` characters begin, or 0 when
/// the string is that short.
fn trailing_split_point(s: &str, keep_chars: usize) -> usize {
    s.char_indices()
        .rev()
        .nth(keep_chars.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
