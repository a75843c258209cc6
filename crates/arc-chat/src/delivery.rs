//! Handing reply segments to a chat transport

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::error::Result;
use crate::history::ChatId;

/// Outbound side of a chat transport
#[async_trait]
pub trait SegmentSink: Send + Sync {
    /// Send one message to the chat
    async fn deliver(&self, chat: &ChatId, text: &str) -> Result<()>;

    /// Show a "typing" indicator, where the transport has one
    async fn typing(&self, _chat: &ChatId) -> Result<()> {
        Ok(())
    }
}

/// Random delay between consecutive segments, so a multi-part reply reads
/// like someone typing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min_ms: 1000,
            max_ms: 3000,
        }
    }
}

impl Pacing {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: min_ms.max(max_ms),
        }
    }

    /// No delay at all
    pub fn none() -> Self {
        Self::new(0, 0)
    }

    /// Pick the next delay
    pub fn delay(&self) -> Duration {
        if self.max_ms == 0 {
            return Duration::ZERO;
        }
        let ms = rand::rng().random_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Deliver segments in order as they arrive, returning how many were
/// delivered. Failed deliveries are logged and skipped.
pub async fn deliver_reply<S>(
    sink: &dyn SegmentSink,
    chat: &ChatId,
    segments: S,
    pacing: Pacing,
) -> usize
where
    S: Stream<Item = String> + Send,
{
    let mut segments = std::pin::pin!(segments);
    let mut delivered = 0;
    let mut first = true;

    while let Some(segment) = segments.next().await {
        // The indicator stays up for the whole pause before the segment.
        if chat.is_private() {
            if let Err(e) = sink.typing(chat).await {
                debug!(chat = %chat, error = %e, "Typing indicator failed");
            }
        }

        if !first {
            let delay = pacing.delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        first = false;

        match sink.deliver(chat, &segment).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(chat = %chat, error = %e, "Failed to deliver segment"),
        }
    }

    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        log: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl SegmentSink for RecordingSink {
        async fn deliver(&self, chat: &ChatId, text: &str) -> Result<()> {
            if self.fail_on == Some(text) {
                return Err(Error::Delivery("socket closed".into()));
            }
            self.log.lock().push(format!("{chat} say {text}"));
            Ok(())
        }

        async fn typing(&self, chat: &ChatId) -> Result<()> {
            self.log.lock().push(format!("{chat} typing"));
            Ok(())
        }
    }

    fn segments(items: &[&str]) -> tokio_stream::Iter<std::vec::IntoIter<String>> {
        tokio_stream::iter(items.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_private_chat_types_before_each_segment() {
        let sink = RecordingSink::default();
        let chat = ChatId::private("7");
        let n = deliver_reply(&sink, &chat, segments(&["I'm", "good"]), Pacing::none()).await;
        assert_eq!(n, 2);
        assert_eq!(
            *sink.log.lock(),
            vec![
                "private:7 typing",
                "private:7 say I'm",
                "private:7 typing",
                "private:7 say good",
            ]
        );
    }

    #[tokio::test]
    async fn test_group_chat_has_no_typing() {
        let sink = RecordingSink::default();
        let chat = ChatId::group("9");
        deliver_reply(&sink, &chat, segments(&["a", "b"]), Pacing::none()).await;
        assert_eq!(*sink.log.lock(), vec!["group:9 say a", "group:9 say b"]);
    }

    #[tokio::test]
    async fn test_failed_segment_does_not_stop_delivery() {
        let sink = RecordingSink {
            fail_on: Some("b"),
            ..Default::default()
        };
        let chat = ChatId::group("9");
        let n = deliver_reply(&sink, &chat, segments(&["a", "b", "c"]), Pacing::none()).await;
        assert_eq!(n, 2);
        assert_eq!(*sink.log.lock(), vec!["group:9 say a", "group:9 say c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_segments_only() {
        let sink = RecordingSink::default();
        let chat = ChatId::group("9");
        let started = tokio::time::Instant::now();
        let pacing = Pacing::new(1000, 1000);
        deliver_reply(&sink, &chat, segments(&["a", "b", "c"]), pacing).await;
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_precedes_pause() {
        struct TimedSink {
            started: tokio::time::Instant,
            log: Mutex<Vec<(String, u128)>>,
        }

        #[async_trait]
        impl SegmentSink for TimedSink {
            async fn deliver(&self, _chat: &ChatId, text: &str) -> Result<()> {
                let at = self.started.elapsed().as_millis();
                self.log.lock().push((format!("say {text}"), at));
                Ok(())
            }

            async fn typing(&self, _chat: &ChatId) -> Result<()> {
                let at = self.started.elapsed().as_millis();
                self.log.lock().push(("typing".to_string(), at));
                Ok(())
            }
        }

        let sink = TimedSink {
            started: tokio::time::Instant::now(),
            log: Mutex::new(Vec::new()),
        };
        let chat = ChatId::private("7");
        let pacing = Pacing::new(1000, 1000);
        deliver_reply(&sink, &chat, segments(&["a", "b"]), pacing).await;

        assert_eq!(
            *sink.log.lock(),
            vec![
                ("typing".to_string(), 0),
                ("say a".to_string(), 0),
                ("typing".to_string(), 0),
                ("say b".to_string(), 1000),
            ]
        );
    }

    #[test]
    fn test_pacing_delay_in_range() {
        let pacing = Pacing::new(3000, 1000);
        assert_eq!(pacing, Pacing { min_ms: 1000, max_ms: 3000 });
        for _ in 0..100 {
            let d = pacing.delay();
            assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(3000));
        }
        assert_eq!(Pacing::none().delay(), Duration::ZERO);
    }
}
