//! Reply segmentation
//!
//! A model reply is delivered to the chat as several short messages rather
//! than one long one. The model marks message boundaries either with an
//! explicit `[send]` marker or by ending a line. [`StreamSegmenter`] buffers
//! streamed deltas and cuts them into segments as soon as a boundary is seen.

use std::pin::Pin;

use async_stream::stream;
use futures::StreamExt;
use tokio_stream::Stream;

use crate::error::{Error, Result};

/// Explicit boundary marker the model may emit between messages
pub const SEND_MARKER: &str = "[send]";

/// Lifecycle of a segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Accepting deltas
    Buffering,
    /// The remaining buffer has been flushed; further input is ignored
    Drained,
}

/// Incremental splitter from text deltas to deliverable segments
#[derive(Debug)]
pub struct StreamSegmenter {
    buffer: String,
    state: SegmenterState,
}

impl Default for StreamSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSegmenter {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            state: SegmenterState::Buffering,
        }
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    /// Text received but not yet emitted
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Append a delta and return every segment it completes.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        if self.state == SegmenterState::Drained || delta.is_empty() {
            return Vec::new();
        }

        self.buffer.push_str(delta);
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut segments = Vec::new();
        loop {
            let (at, delimiter_len) = if let Some(idx) = self.buffer.find(SEND_MARKER) {
                (idx, SEND_MARKER.len())
            } else if self.buffer.ends_with('\n') {
                match self.buffer.find('\n') {
                    Some(idx) => (idx, 1),
                    None => break,
                }
            } else {
                break;
            };

            let rest = self.buffer.split_off(at + delimiter_len);
            self.buffer.truncate(at);
            let part = std::mem::replace(&mut self.buffer, rest);
            let part = part.trim();
            if !part.is_empty() {
                segments.push(part.to_string());
            }
        }
        segments
    }

    /// Flush whatever is left at the end of the stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.state == SegmenterState::Drained {
            return None;
        }
        self.state = SegmenterState::Drained;
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

/// Output of [`segment_stream`]
#[derive(Debug)]
pub enum SegmentEvent {
    /// A complete, trimmed, non-empty message
    Segment(String),
    /// The underlying delta stream failed; nothing follows
    Error(Error),
}

/// A stream of segment events
pub type SegmentStream = Pin<Box<dyn Stream<Item = SegmentEvent> + Send>>;

/// Segment a stream of text deltas.
///
/// The trailing buffer is only flushed when the delta stream ends normally.
/// After an error the buffer is discarded and the stream ends.
pub fn segment_stream<S>(deltas: S) -> SegmentStream
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    Box::pin(stream! {
        let mut deltas = Box::pin(deltas);
        let mut segmenter = StreamSegmenter::new();

        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(delta) => {
                    for segment in segmenter.push(&delta) {
                        yield SegmentEvent::Segment(segment);
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        pending = segmenter.pending().len(),
                        "Delta stream failed, discarding buffer"
                    );
                    yield SegmentEvent::Error(e);
                    return;
                }
            }
        }

        if let Some(rest) = segmenter.finish() {
            yield SegmentEvent::Segment(rest);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_all(deltas: &[&str]) -> Vec<String> {
        let mut segmenter = StreamSegmenter::new();
        let mut out = Vec::new();
        for delta in deltas {
            out.extend(segmenter.push(delta));
        }
        out.extend(segmenter.finish());
        out
    }

    async fn collect(deltas: Vec<Result<String>>) -> (Vec<String>, Option<Error>) {
        let mut events = segment_stream(tokio_stream::iter(deltas));
        let mut segments = Vec::new();
        let mut error = None;
        while let Some(event) = events.next().await {
            match event {
                SegmentEvent::Segment(s) => segments.push(s),
                SegmentEvent::Error(e) => error = Some(e),
            }
        }
        (segments, error)
    }

    #[test]
    fn test_marker_takes_precedence_over_newline() {
        assert_eq!(split_all(&["a\nb", "[send]c\n"]), vec!["a\nb", "c"]);
    }

    #[test]
    fn test_trailing_newline_splits_before_marker() {
        assert_eq!(split_all(&["a\n", "b[send]c\n"]), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_no_delimiter_emits_once_at_end() {
        let mut segmenter = StreamSegmenter::new();
        assert!(segmenter.push("Hello").is_empty());
        assert!(segmenter.push(", world").is_empty());
        assert_eq!(segmenter.finish().as_deref(), Some("Hello, world"));
        assert_eq!(segmenter.state(), SegmenterState::Drained);
    }

    #[test]
    fn test_whitespace_only_emits_nothing() {
        assert!(split_all(&["  ", "\n", " [send] ", "\t"]).is_empty());
    }

    #[test]
    fn test_mid_buffer_newline_waits_for_more() {
        let mut segmenter = StreamSegmenter::new();
        assert!(segmenter.push("first\nsec").is_empty());
        assert_eq!(segmenter.push("ond\n"), vec!["first", "second"]);
    }

    #[test]
    fn test_marker_split_across_deltas() {
        assert_eq!(split_all(&["one[se", "nd]two"]), vec!["one", "two"]);
    }

    #[test]
    fn test_character_deltas_match_single_delta() {
        let text = "I'm fine[send]thanks[send] and you?";
        let chars: Vec<String> = text.chars().map(String::from).collect();
        let per_char: Vec<&str> = chars.iter().map(String::as_str).collect();
        assert_eq!(split_all(&per_char), split_all(&[text]));
        assert_eq!(split_all(&[text]), vec!["I'm fine", "thanks", "and you?"]);
    }

    #[test]
    fn test_marker_never_in_output() {
        let segments = split_all(&["[send][send]x[send]", "\n[send]y\n", "z[send]"]);
        assert_eq!(segments, vec!["x", "y", "z"]);
        assert!(segments.iter().all(|s| !s.contains(SEND_MARKER)));
    }

    #[test]
    fn test_crlf_normalized() {
        assert_eq!(split_all(&["a\r\n", "b\r\nc\r\n"]), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_push_after_drain_is_noop() {
        let mut segmenter = StreamSegmenter::new();
        segmenter.push("tail");
        assert_eq!(segmenter.finish().as_deref(), Some("tail"));
        assert!(segmenter.push("more\n").is_empty());
        assert_eq!(segmenter.finish(), None);
    }

    #[tokio::test]
    async fn test_stream_flushes_tail_on_normal_end() {
        let (segments, error) =
            collect(vec![Ok("I'm".into()), Ok("[send]".into()), Ok("good".into())]).await;
        assert_eq!(segments, vec!["I'm", "good"]);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_stream_error_discards_buffer() {
        let (segments, error) = collect(vec![
            Ok("done\n".into()),
            Ok("half a thou".into()),
            Err(Error::transport(500, "boom")),
            Ok("never seen\n".into()),
        ])
        .await;
        assert_eq!(segments, vec!["done"]);
        assert!(matches!(error, Some(Error::Transport { status: 500, .. })));
    }
}
