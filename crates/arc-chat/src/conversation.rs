//! Conversation orchestration
//!
//! [`Conversation::converse`] runs one exchange for a chat: it loads the
//! stored history, refreshes the system turn, selects a context window,
//! streams the model reply as segments and persists both new turns.

use std::pin::Pin;
use std::sync::Arc;

use arc_ai::segment::segment_stream;
use arc_ai::{CompletionClient, SegmentEvent, Turn};
use async_stream::stream;
use futures::StreamExt;
use tokio_stream::Stream;
use tracing::{debug, error, info};

use crate::context::build_context;
use crate::error::Result;
use crate::history::{ChatId, HistoryStore};
use crate::locks::ChatLocks;
use crate::prompt::SystemPrompt;

/// Default context budget in estimated tokens
pub const DEFAULT_MAX_CONTEXT_TOKENS: u32 = 15000;

/// Prefix of the segment shown to the user when the completion call fails
pub const ERROR_PREFIX: &str = "AI response error";

/// Stream of reply segments for one exchange
pub type ReplyStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Tunables for a [`Conversation`]
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub max_context_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
        }
    }
}

/// Runs exchanges against a completion client and a history store
#[derive(Clone)]
pub struct Conversation {
    client: Arc<dyn CompletionClient>,
    store: Arc<dyn HistoryStore>,
    system_prompt: Arc<SystemPrompt>,
    config: ChatConfig,
    locks: ChatLocks,
}

impl Conversation {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        store: Arc<dyn HistoryStore>,
        system_prompt: SystemPrompt,
        config: ChatConfig,
    ) -> Self {
        Self {
            client,
            store,
            system_prompt: Arc::new(system_prompt),
            config,
            locks: ChatLocks::new(),
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Run one exchange and stream the reply segments.
    ///
    /// The chat stays locked until the exchange has been persisted, which
    /// happens once the returned stream is drained. Dropping the stream early
    /// abandons the exchange without saving it.
    pub fn converse(&self, chat: ChatId, user_text: impl Into<String>) -> ReplyStream {
        let this = self.clone();
        let user_text = user_text.into();

        Box::pin(stream! {
            let _guard = this.locks.acquire(&chat).await;

            let mut history = match this.store.load(&chat).await {
                Ok(history) => history.unwrap_or_default(),
                Err(e) => {
                    // Saving over a history we could not read would lose it.
                    error!(chat = %chat, error = %e, "Failed to load history");
                    yield format!("{ERROR_PREFIX}: {e}");
                    return;
                }
            };

            let system = this.system_prompt.render().await;
            seed_history(&mut history, system);
            history.push(Turn::user(user_text));

            let window = build_context(&history, this.config.max_context_tokens);
            debug!(
                chat = %chat,
                context_turns = window.included(),
                estimated_tokens = window.estimated_tokens,
                "Requesting completion"
            );

            let mut segments: Vec<String> = Vec::new();
            let mut failure = None;

            match this.client.stream(&window.turns).await {
                Ok(deltas) => {
                    let mut events = segment_stream(deltas);
                    while let Some(event) = events.next().await {
                        match event {
                            SegmentEvent::Segment(segment) => {
                                segments.push(segment.clone());
                                yield segment;
                            }
                            SegmentEvent::Error(e) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => failure = Some(e),
            }

            let mut reply = segments.join("\n");
            if let Some(e) = failure {
                error!(chat = %chat, error = %e, delivered = segments.len(), "Completion failed");
                let notice = format!("{ERROR_PREFIX}: {e}");
                if segments.is_empty() {
                    reply = notice.clone();
                }
                yield notice;
            }

            history.push(Turn::assistant(reply));
            match this.store.save(&chat, &history).await {
                Ok(()) => info!(chat = %chat, segments = segments.len(), "Exchange complete"),
                Err(e) => error!(chat = %chat, error = %e, "Failed to save history"),
            }
        })
    }

    /// Forget a chat's history. Waits for any running exchange of that chat.
    pub async fn reset(&self, chat: &ChatId) -> Result<bool> {
        let _guard = self.locks.acquire(chat).await;
        let removed = self.store.remove(chat).await?;
        info!(chat = %chat, removed, "History reset");
        Ok(removed)
    }
}

/// Put the current system prompt at the head of `history`, replacing any
/// stored system turns.
pub fn seed_history(history: &mut Vec<Turn>, system: String) {
    history.retain(|turn| !turn.is_system());
    if !system.is_empty() {
        history.insert(0, Turn::system(system));
    }
}
