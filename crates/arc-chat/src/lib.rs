//! arc-chat: conversation runtime
//!
//! Ties a completion client to per-chat histories: loads the history for a
//! chat, selects what fits in the token budget, streams the reply as
//! segments and persists the exchange.

pub mod context;
pub mod conversation;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod locks;
pub mod prompt;

pub use context::{ContextWindow, build_context, estimate_tokens};
pub use conversation::{ChatConfig, Conversation, ReplyStream};
pub use delivery::{Pacing, SegmentSink, deliver_reply};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use history::{ChatId, HistoryStore, JsonHistoryStore, MemoryHistoryStore};
pub use prompt::{Note, Notebook, PromptSource, SystemPrompt};

// Re-export arc-ai for convenience
pub use arc_ai;
