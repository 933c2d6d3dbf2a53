//! Event-stream framing.
//!
//! Frames are separated by a blank line. Each frame carries an optional
//! `event:` line (default `"message"`) and one or more `data:` lines whose
//! values are concatenated without a separator. The data is a JSON object
//! whose `type` field selects a [`StreamEvent`] variant; when `type` is absent
//! the frame's event name is used instead.

use std::sync::atomic::{AtomicU64, Ordering};

use agent_dispatch_core::{ErrorKind, StreamEvent};
use serde_json::Value;
use thiserror::Error;
use tracing::{trace, warn};

const DEFAULT_EVENT: &str = "message";
const DELIMITER: &[u8] = b"\n\n";

/// A frame that could not be turned into a [`StreamEvent`].
///
/// Recovered locally: the frame is dropped and decoding continues.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("Frame payload is not JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Frame payload is not a JSON object")]
    NotAnObject,
    #[error("Unrecognized {event_type:?} event: {source}")]
    UnknownEvent {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Decode
    }
}

/// One delimited unit of the stream, before JSON decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

impl Frame {
    /// Parse the lines of one frame.
    ///
    /// Returns `None` for frames without `data:` lines (keep-alives, comments).
    #[must_use]
    pub fn parse(segment: &str) -> Option<Self> {
        let mut event: Option<&str> = None;
        let mut data: Option<String> = None;

        for line in segment.lines() {
            if let Some(value) = line.strip_prefix("event:") {
                event = Some(value.trim());
            } else if let Some(value) = line.strip_prefix("data:") {
                let value = value.strip_prefix(' ').unwrap_or(value);
                data.get_or_insert_with(String::new).push_str(value);
            }
        }

        data.map(|data| Self {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or(DEFAULT_EVENT)
                .to_string(),
            data,
        })
    }

    /// Decode the payload into a [`StreamEvent`].
    ///
    /// # Errors
    /// Returns error if the payload is not a JSON object of a known type.
    pub fn decode(&self) -> Result<StreamEvent, DecodeError> {
        let mut value: Value = serde_json::from_str(&self.data).map_err(DecodeError::InvalidJson)?;
        let Value::Object(map) = &mut value else {
            return Err(DecodeError::NotAnObject);
        };
        if !map.contains_key("type") {
            map.insert("type".to_string(), Value::String(self.event.clone()));
        }
        let event_type = map
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        serde_json::from_value(value).map_err(|source| DecodeError::UnknownEvent { event_type, source })
    }
}

/// Incremental decoder from raw byte chunks to stream events.
///
/// Bytes are buffered until a frame delimiter is seen; the trailing,
/// possibly incomplete segment is kept for the next chunk.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Offset up to which `buffer` is known not to contain a delimiter.
    scanned: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the complete frames it finished, in order.
    ///
    /// Frames without `data:` lines are skipped; a frame that is not UTF-8
    /// yields an `Err` in its position.
    pub fn push_frames(&mut self, chunk: &[u8]) -> Vec<Result<Frame, DecodeError>> {
        // Carriage returns are dropped so CRLF streams frame the same way.
        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut frames = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;

        while let Some(pos) = find(&self.buffer[search_from..], DELIMITER) {
            let end = search_from + pos;
            let segment = &self.buffer[start..end];
            match std::str::from_utf8(segment) {
                Ok(text) => match Frame::parse(text) {
                    Some(frame) => frames.push(Ok(frame)),
                    None => trace!(len = segment.len(), "skipping frame without data"),
                },
                Err(e) => frames.push(Err(DecodeError::InvalidUtf8(e))),
            }
            start = end + DELIMITER.len();
            search_from = start;
        }

        self.buffer.drain(..start);
        // The last byte may be the first half of a delimiter.
        self.scanned = self.buffer.len().saturating_sub(DELIMITER.len() - 1);
        frames
    }

    /// Feed one chunk and decode every frame it finished.
    ///
    /// A frame that fails to decode yields an `Err` in its position; later
    /// frames are unaffected.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, DecodeError>> {
        self.push_frames(chunk)
            .into_iter()
            .map(|frame| frame.and_then(|f| f.decode()))
            .collect()
    }

    /// Number of bytes retained for the next chunk.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the decoder, returning any unterminated trailing bytes.
    #[must_use]
    pub fn into_remainder(self) -> Vec<u8> {
        self.buffer
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Observability hook for dropped frames.
pub trait DecodeObserver: Send + Sync {
    fn frame_dropped(&self, session_id: &str, error: &DecodeError);
}

/// Logs dropped frames at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl DecodeObserver for LogObserver {
    fn frame_dropped(&self, session_id: &str, error: &DecodeError) {
        warn!(session_id = %session_id, error = %error, "dropping undecodable frame");
    }
}

/// Counts dropped frames, logging each one like [`LogObserver`].
#[derive(Debug, Default)]
pub struct DecodeCounter {
    dropped: AtomicU64,
}

impl DecodeCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DecodeObserver for DecodeCounter {
    fn frame_dropped(&self, session_id: &str, error: &DecodeError) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        LogObserver.frame_dropped(session_id, error);
    }
}

#[cfg(test)]
mod tests {
    use agent_dispatch_core::{TodoItem, TodoStatus};

    use super::*;

    const STREAM: &str = concat!(
        "event: progress\ndata: {\"message\":\"planning\"}\n\n",
        ": keep-alive\n\n",
        "data: {\"type\":\"content\",\"text\":\"Hello, \"}\n\n",
        "data: {\"type\":\"content\",\n",
        "data: \"text\":\"wörld!\"}\n\n",
        "data: {\"type\":\"todo_update\",\"items\":[{\"content\":\"a\",\"status\":\"pending\"}]}\n\n",
        "data: {\"type\":\"step_complete\",\"step\":\"build\"}\n\n",
        "data: {\"type\":\"complete\"}\n\n",
    );

    fn expected() -> Vec<StreamEvent> {
        vec![
            StreamEvent::Progress {
                message: "planning".into(),
            },
            StreamEvent::Content {
                text: "Hello, ".into(),
            },
            StreamEvent::Content {
                text: "wörld!".into(),
            },
            StreamEvent::TodoUpdate {
                items: vec![TodoItem::new("a", TodoStatus::Pending)],
            },
            StreamEvent::StepComplete {
                step: "build".into(),
            },
            StreamEvent::Complete {},
        ]
    }

    fn decode_chunks(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut decoder = FrameDecoder::new();
        chunks
            .iter()
            .flat_map(|chunk| decoder.push(chunk))
            .map(|r| r.expect("frame decodes"))
            .collect()
    }

    #[test]
    fn decodes_whole_stream() {
        assert_eq!(decode_chunks(&[STREAM.as_bytes()]), expected());
    }

    #[test]
    fn every_single_split_point_gives_same_events() {
        let bytes = STREAM.as_bytes();
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_chunks(&[a, b]), expected(), "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time_gives_same_events() {
        let chunks: Vec<&[u8]> = STREAM.as_bytes().chunks(1).collect();
        assert_eq!(decode_chunks(&chunks), expected());
    }

    #[test]
    fn incomplete_frame_is_retained() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"complete\"}\n").is_empty());
        assert_eq!(decoder.buffered(), 26);
        let events = decoder.push(b"\n");
        assert_eq!(events.len(), 1);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn crlf_frames_are_delimited() {
        let events = decode_chunks(&[b"data: {\"type\":\"complete\"}\r\n\r\n"]);
        assert_eq!(events, vec![StreamEvent::Complete {}]);
    }

    #[test]
    fn invalid_json_is_dropped_and_decoding_continues() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.push(b"data: {not json\n\ndata: {\"type\":\"complete\"}\n\n");
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(DecodeError::InvalidJson(_))));
        assert_eq!(results[1].as_ref().unwrap(), &StreamEvent::Complete {});
    }

    #[test]
    fn unknown_type_and_non_object_are_errors() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.push(b"data: {\"type\":\"heartbeat\"}\n\ndata: [1,2]\n\n");
        assert!(matches!(
            &results[0],
            Err(DecodeError::UnknownEvent { event_type, .. }) if event_type == "heartbeat"
        ));
        assert!(matches!(results[1], Err(DecodeError::NotAnObject)));
    }

    #[test]
    fn missing_type_without_event_line_is_unknown_message() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.push(b"data: {\"text\":\"x\"}\n\n");
        assert!(matches!(
            &results[0],
            Err(DecodeError::UnknownEvent { event_type, .. }) if event_type == "message"
        ));
    }

    #[test]
    fn frame_parse_defaults_event_name() {
        let frame = Frame::parse("data:{\"a\":1}").unwrap();
        assert_eq!(frame.event, "message");
        assert_eq!(frame.data, "{\"a\":1}");
        assert!(Frame::parse("event: ping").is_none());
    }

    #[test]
    fn counter_counts_drops() {
        let counter = DecodeCounter::new();
        let mut decoder = FrameDecoder::new();
        for result in decoder.push(b"data: nope\n\ndata: nope\n\n") {
            if let Err(e) = result {
                counter.frame_dropped("s-1", &e);
            }
        }
        assert_eq!(counter.dropped(), 2);
    }

    #[test]
    fn invalid_utf8_frame_is_an_error() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.push(b"data: \xff\xfe\n\ndata: {\"type\":\"complete\"}\n\n");
        assert!(matches!(results[0], Err(DecodeError::InvalidUtf8(_))));
        assert!(results[1].is_ok());
    }

    #[test]
    fn remainder_is_returned() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: {\"type\":\"complete\"}\n\ndata: partial");
        assert_eq!(decoder.into_remainder(), b"data: partial".to_vec());
    }

    mod proptest_chunking {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Arbitrary chunkings of a valid stream decode to the same events
            /// as the unsplit stream.
            #[test]
            fn arbitrary_chunking_preserves_events(mut cuts in proptest::collection::vec(0usize..STREAM.len(), 0..12)) {
                let bytes = STREAM.as_bytes();
                cuts.sort_unstable();
                cuts.dedup();

                let mut chunks = Vec::new();
                let mut last = 0;
                for cut in cuts {
                    chunks.push(&bytes[last..cut]);
                    last = cut;
                }
                chunks.push(&bytes[last..]);

                prop_assert_eq!(decode_chunks(&chunks), expected());
            }

            #[test]
            fn content_text_survives_framing(text in "[a-zA-Z0-9 ,.!?]{0,40}") {
                let frame = format!("data: {}\n\n", serde_json::json!({"type": "content", "text": text}));
                let events = decode_chunks(&[frame.as_bytes()]);
                prop_assert_eq!(events, vec![StreamEvent::Content { text }]);
            }
        }
    }
}
