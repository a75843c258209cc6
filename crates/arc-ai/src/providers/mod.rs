//! Completion client implementations

pub mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::{Error, Result, Turn};

pub use openai::{OpenAICompatProvider, ProviderConfig};

/// A stream of raw text deltas from a completion endpoint
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Anything that can turn a conversation into a streamed reply
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Start a streamed completion for the given turns
    async fn stream(&self, turns: &[Turn]) -> Result<DeltaStream>;
}

/// Get an API key from environment or provided value
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}
