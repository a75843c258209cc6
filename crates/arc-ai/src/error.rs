//! Error types for arc-ai

use std::time::Duration;

use thiserror::Error;

/// Result type alias using arc-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a completion endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Endpoint answered with a non-success status
    #[error("Completion API returned {status}: {body}")]
    Transport { status: u16, body: String },

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// No data arrived within the idle window
    #[error("Stream idle for {0:?}")]
    Timeout(Duration),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,
}

impl Error {
    /// Create a transport error from a status code and response body
    pub fn transport(status: u16, body: impl Into<String>) -> Self {
        Self::Transport {
            status,
            body: body.into(),
        }
    }

    /// Check if this error came from the network or the remote endpoint,
    /// as opposed to local configuration
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Transport { .. } | Error::Sse(_) | Error::Timeout(_)
        )
    }
}
