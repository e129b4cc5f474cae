use futures::StreamExt;
use std::collections::VecDeque;
use threadline_types::Event;

use crate::client::EventStream;
use crate::transport::ByteStream;

const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Splits a byte stream into event frames.
///
/// Understands both SSE (`data:` lines, a blank line ends the frame) and
/// NDJSON (one JSON object per line). SSE comments and `event:`/`id:`/
/// `retry:` fields are ignored. Lines and frames longer than the maximum
/// frame length are dropped with a warning.
pub struct FrameDecoder {
    buffer: VecDeque<u8>,
    /// Leading bytes of `buffer` already known to hold no newline.
    scanned: usize,
    max_frame_len: usize,
    /// Skipping the rest of an oversized line.
    discarding_line: bool,
    data_lines: Vec<String>,
    data_len: usize,
    /// Skipping the remaining `data:` lines of an oversized frame.
    discarding_frame: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_capacity(8192)
    }
}

impl FrameDecoder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            scanned: 0,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            discarding_line: false,
            data_lines: Vec::new(),
            data_len: 0,
            discarding_frame: false,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len.max(1);
        self
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes);
    }

    /// Next complete frame, if the buffered bytes contain one.
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            let Some(offset) = self.buffer.range(self.scanned..).position(|&b| b == b'\n') else {
                self.scanned = self.buffer.len();
                if self.scanned > self.max_frame_len {
                    tracing::warn!(
                        bytes = self.scanned,
                        limit = self.max_frame_len,
                        "dropping oversized event line"
                    );
                    self.buffer.clear();
                    self.scanned = 0;
                    self.discarding_line = true;
                }
                return None;
            };

            let newline_pos = self.scanned + offset;
            let line_bytes: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            self.scanned = 0;

            if std::mem::take(&mut self.discarding_line) {
                continue;
            }
            if newline_pos > self.max_frame_len {
                tracing::warn!(
                    bytes = newline_pos,
                    limit = self.max_frame_len,
                    "dropping oversized event line"
                );
                continue;
            }

            let line = String::from_utf8_lossy(&line_bytes);
            if let Some(frame) = self.accept_line(line.trim_end_matches(['\n', '\r'])) {
                return Some(frame);
            }
        }
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if std::mem::take(&mut self.discarding_line) {
            self.buffer.clear();
        }
        if !self.buffer.is_empty() {
            let rest: Vec<u8> = self.buffer.drain(..).collect();
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.accept_line(line.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.take_data_frame()
    }

    fn accept_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            self.discarding_frame = false;
            return self.take_data_frame();
        }

        if let Some(data) = line.strip_prefix("data:") {
            if self.discarding_frame {
                return None;
            }
            let data = data.strip_prefix(' ').unwrap_or(data);
            self.data_len += data.len();
            if self.data_len > self.max_frame_len {
                tracing::warn!(
                    bytes = self.data_len,
                    limit = self.max_frame_len,
                    "dropping oversized event frame"
                );
                self.data_lines.clear();
                self.data_len = 0;
                self.discarding_frame = true;
                return None;
            }
            self.data_lines.push(data.to_string());
            return None;
        }

        if line.starts_with(':')
            || line.starts_with("event:")
            || line.starts_with("id:")
            || line.starts_with("retry:")
        {
            return None;
        }

        if line.trim_start().starts_with('{') && self.data_lines.is_empty() {
            return Some(line.trim().to_string());
        }

        tracing::trace!(line, "ignoring non-frame line");
        None
    }

    fn take_data_frame(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let frame = self.data_lines.join("\n");
        self.data_lines.clear();
        self.data_len = 0;
        Some(frame)
    }
}

/// Decode one frame. Malformed frames are logged and skipped.
pub fn decode_event(frame: &str) -> Option<Event> {
    let frame = frame.trim();
    if frame.is_empty() || frame == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<Event>(frame) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed event frame");
            None
        }
    }
}

/// Turn a raw body stream into a stream of decoded events.
pub fn event_stream(body: ByteStream) -> EventStream {
    Box::pin(async_stream::stream! {
        let mut chunks = body;
        let mut decoder = FrameDecoder::default();
        let mut failed = false;

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    decoder.push(&bytes);
                    while let Some(frame) = decoder.next_frame() {
                        if let Some(event) = decode_event(&frame) {
                            yield Ok(event);
                        }
                    }
                }
                Err(e) => {
                    failed = true;
                    yield Err(e);
                    break;
                }
            }
        }

        // The partial tail of a broken stream is dropped.
        if !failed {
            if let Some(frame) = decoder.finish() {
                if let Some(event) = decode_event(&frame) {
                    yield Ok(event);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use threadline_types::{Result, TransportError};

    #[test]
    fn test_sse_frames_across_chunks() {
        let mut decoder = FrameDecoder::default();

        decoder.push(b": keep-alive\n\nevent: message\ndata: {\"type\":\"text_message_end\",");
        assert!(decoder.next_frame().is_none());

        decoder.push(b"\"message_id\":\"m1\"}\r\n\r\n");
        assert_eq!(
            decoder.next_frame().unwrap(),
            r#"{"type":"text_message_end","message_id":"m1"}"#
        );
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let mut decoder = FrameDecoder::default();
        decoder.push(b"data: {\"type\":\ndata: \"unknown\"}\n\n");
        assert_eq!(decoder.next_frame().unwrap(), "{\"type\":\n\"unknown\"}");
    }

    #[test]
    fn test_ndjson_lines_and_trailing_frame() {
        let mut decoder = FrameDecoder::default();
        decoder.push(b"{\"a\":1}\n{\"b\":2}");

        assert_eq!(decoder.next_frame().unwrap(), r#"{"a":1}"#);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.finish().unwrap(), r#"{"b":2}"#);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_oversized_line_is_dropped_and_decoding_resumes() {
        let mut decoder = FrameDecoder::default().with_max_frame_len(16);

        decoder.push(&[b'x'; 40]);
        assert!(decoder.next_frame().is_none());

        decoder.push(b"tail of the long line\n{\"a\":1}\n");
        assert_eq!(decoder.next_frame().unwrap(), r#"{"a":1}"#);
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_oversized_data_frame_is_dropped() {
        let mut decoder = FrameDecoder::default().with_max_frame_len(16);
        decoder.push(b"data: 0123456789\ndata: 0123456789\ndata: 01\n\ndata: {\"b\":2}\n\n");

        assert_eq!(decoder.next_frame().unwrap(), r#"{"b":2}"#);
        assert!(decoder.next_frame().is_none());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_line_split_over_many_chunks() {
        let mut decoder = FrameDecoder::default();
        let mut frames = Vec::new();
        for chunk in ["da", "ta: {\"c\"", ":", "3}", "\r", "\n", "\n"] {
            decoder.push(chunk.as_bytes());
            frames.extend(decoder.next_frame());
        }
        assert_eq!(frames, vec![r#"{"c":3}"#.to_string()]);
    }

    #[test]
    fn test_decode_event_skips_garbage() {
        assert!(decode_event("[DONE]").is_none());
        assert!(decode_event("{not json").is_none());
        assert_eq!(
            decode_event(r#"{"type":"run_started","thread_id":"t","run_id":"r"}"#),
            Some(Event::RunStarted {
                thread_id: "t".to_string(),
                run_id: "r".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_event_stream_stops_at_error() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from("data: {\"type\":\"text_message_end\",\"message_id\":\"m1\"}\n\n")),
            Err(TransportError::network("reset")),
            Ok(Bytes::from("data: {\"type\":\"text_message_end\",\"message_id\":\"m2\"}\n\n")),
        ];
        let mut events = event_stream(Box::pin(futures::stream::iter(chunks)));

        assert!(matches!(
            events.next().await,
            Some(Ok(Event::TextMessageEnd { .. }))
        ));
        assert!(matches!(
            events.next().await,
            Some(Err(TransportError::Network { .. }))
        ));
        assert!(events.next().await.is_none());
    }
}
