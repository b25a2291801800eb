//! Server-sent event decoding.

use mockview_engine::{WireEvent, DONE_SENTINEL};

use crate::{ClientError, Result};

/// One decoded `data:` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A turn event.
    Event(WireEvent),
    /// The `[DONE]` terminator.
    Done,
}

/// Incremental decoder for a `text/event-stream` body.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes and returns every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseFrame>> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(frame) = decode_line(&line)? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// Decodes a final line left without a trailing newline.
    pub fn finish(&mut self) -> Result<Option<SseFrame>> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line)
    }
}

fn decode_line(raw: &[u8]) -> Result<Option<SseFrame>> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| ClientError::Decode(format!("invalid UTF-8: {e}")))?
        .trim_end_matches(['\r', '\n']);

    // Blank lines separate events; `:` lines are keep-alive comments.
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data == DONE_SENTINEL {
        return Ok(Some(SseFrame::Done));
    }
    serde_json::from_str(data)
        .map(|event| Some(SseFrame::Event(event)))
        .map_err(|e| ClientError::Decode(format!("{e}: {data}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mockview_engine::{ErrorCode, Progress};

    use super::*;

    #[test]
    fn test_decodes_turn_stream() {
        let body = "data: {\"isFollowUp\":false}\n\n\
                    data: {\"progress\":{\"current\":2,\"total\":5}}\n\n\
                    :\n\n\
                    data: {\"content\":\"Hello\"}\n\n\
                    data: [DONE]\n\n";
        let frames = SseDecoder::new().push(body.as_bytes()).unwrap();
        assert_eq!(
            frames,
            vec![
                SseFrame::Event(WireEvent::Classification {
                    is_follow_up: false
                }),
                SseFrame::Event(WireEvent::Progress {
                    progress: Progress {
                        current: 2,
                        total: Some(5)
                    }
                }),
                SseFrame::Event(WireEvent::content("Hello")),
                SseFrame::Done,
            ]
        );
    }

    #[test]
    fn test_split_utf8_and_lines() {
        let body = "data: {\"content\":\"caf\u{e9}\"}\r\n\r\n".as_bytes();
        let mut decoder = SseDecoder::new();
        let mut frames = Vec::new();
        for byte in body {
            frames.extend(decoder.push(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(frames, vec![SseFrame::Event(WireEvent::content("caf\u{e9}"))]);
    }

    #[test]
    fn test_error_event_and_unterminated_tail() {
        let mut decoder = SseDecoder::new();
        let frames = decoder
            .push(b"data: {\"error\":\"slow\",\"code\":\"timeout\"}\n\ndata: [DO")
            .unwrap();
        assert_eq!(frames, vec![SseFrame::Event(WireEvent::error(ErrorCode::Timeout, "slow"))]);
        assert!(decoder.push(b"NE]").unwrap().is_empty());
        assert_eq!(decoder.finish().unwrap(), Some(SseFrame::Done));
    }

    #[test]
    fn test_malformed_frame() {
        let err = SseDecoder::new().push(b"data: {not json}\n").unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }
}
