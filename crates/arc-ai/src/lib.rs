//! arc-ai: chat-completion client layer
//!
//! This crate provides the conversation turn types, a streaming client for
//! OpenAI-compatible chat-completion endpoints, and the segmenter that turns a
//! token stream into separately deliverable chat messages.

pub mod error;
pub mod providers;
pub mod segment;
pub mod types;

pub use error::{Error, Result};
pub use providers::{CompletionClient, DeltaStream};
pub use segment::{SegmentEvent, SegmentStream, StreamSegmenter};
pub use types::*;
