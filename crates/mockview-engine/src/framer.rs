//! Marker framing of the AI token stream.
//!
//! The AI is instructed to open every reply with a control marker that
//! classifies the question as a new main question or a follow-up. Tokens
//! arrive in arbitrary fragments, so the marker may be split across chunks.
//! [`MarkerFramer`] buffers the head of the stream until the marker is
//! recognized (or cannot appear any more), then relays the rest as content.
//!
//! Recognition depends only on the bytes of the stream, never on how they
//! were chunked:
//! - a marker counts only if leading whitespace plus the marker fit in the
//!   buffer limit;
//! - without a marker, nothing is emitted until the buffer reaches the limit,
//!   at which point the text (whitespace included) is classified as a main
//!   question verbatim;
//! - a reply that ends before the limit with only whitespace emits nothing;
//! - the single newline after a marker is stripped once the next character
//!   (or end of stream) is seen, with `\r\n` counting as one newline.

use crate::wire::{Progress, WireEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Looking for a marker.
    Detecting,
    /// Marker consumed; a newline may follow.
    AfterMarker,
    /// Relaying content.
    Streaming,
}

/// Incremental marker detector for one AI reply.
#[derive(Debug, Clone)]
pub struct MarkerFramer {
    main_marker: String,
    follow_up_marker: String,
    limit: usize,
    main_questions_before: u32,
    total: Option<u32>,
    state: State,
    buffer: String,
    is_follow_up: Option<bool>,
}

impl MarkerFramer {
    /// Creates a framer.
    ///
    /// `main_questions_before` and `total` feed the progress event emitted
    /// alongside the classification.
    #[must_use]
    pub fn new(
        main_marker: impl Into<String>,
        follow_up_marker: impl Into<String>,
        limit: usize,
        main_questions_before: u32,
        total: Option<u32>,
    ) -> Self {
        Self {
            main_marker: main_marker.into(),
            follow_up_marker: follow_up_marker.into(),
            limit,
            main_questions_before,
            total,
            state: State::Detecting,
            buffer: String::new(),
            is_follow_up: None,
        }
    }

    /// Classification, once known.
    #[must_use]
    pub const fn is_follow_up(&self) -> Option<bool> {
        self.is_follow_up
    }

    /// Feeds the next fragment and returns the events it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<WireEvent> {
        if chunk.is_empty() {
            return Vec::new();
        }
        match self.state {
            State::Streaming => vec![WireEvent::content(chunk)],
            State::AfterMarker => {
                self.buffer.push_str(chunk);
                self.strip_newline(false)
            }
            State::Detecting => {
                self.buffer.push_str(chunk);
                self.detect(false)
            }
        }
    }

    /// Ends the stream and flushes anything still buffered.
    pub fn finish(&mut self) -> Vec<WireEvent> {
        match self.state {
            State::Streaming => Vec::new(),
            State::AfterMarker => self.strip_newline(true),
            State::Detecting => self.detect(true),
        }
    }

    fn detect(&mut self, eof: bool) -> Vec<WireEvent> {
        let trimmed = self.buffer.trim_start();
        let leading = self.buffer.len() - trimmed.len();

        let matched = [
            (self.main_marker.as_str(), false),
            (self.follow_up_marker.as_str(), true),
        ]
        .into_iter()
        .find(|(marker, _)| trimmed.starts_with(marker) && leading + marker.len() <= self.limit)
        .map(|(marker, follow_up)| (leading + marker.len(), follow_up));

        if let Some((consumed, follow_up)) = matched {
            self.buffer.drain(..consumed);
            self.state = State::AfterMarker;
            let mut events = self.classify(follow_up);
            events.extend(self.strip_newline(eof));
            return events;
        }

        if !eof && self.buffer.len() < self.limit {
            return Vec::new();
        }

        if eof && self.buffer.trim().is_empty() {
            // Nothing but whitespace (or nothing at all) arrived.
            self.buffer.clear();
            self.state = State::Streaming;
            return Vec::new();
        }

        self.state = State::Streaming;
        let mut events = self.classify(false);
        events.push(WireEvent::content(std::mem::take(&mut self.buffer)));
        events
    }

    fn strip_newline(&mut self, eof: bool) -> Vec<WireEvent> {
        if !eof && (self.buffer.is_empty() || self.buffer == "\r") {
            return Vec::new();
        }

        if self.buffer.starts_with("\r\n") {
            self.buffer.drain(..2);
        } else if self.buffer.starts_with('\n') {
            self.buffer.drain(..1);
        }

        self.state = State::Streaming;
        if self.buffer.is_empty() {
            Vec::new()
        } else {
            vec![WireEvent::content(std::mem::take(&mut self.buffer))]
        }
    }

    fn classify(&mut self, follow_up: bool) -> Vec<WireEvent> {
        self.is_follow_up = Some(follow_up);
        let current = self.main_questions_before + u32::from(!follow_up);
        vec![
            WireEvent::Classification {
                is_follow_up: follow_up,
            },
            WireEvent::Progress {
                progress: Progress {
                    current,
                    total: self.total,
                },
            },
        ]
    }
}
