//! Error types for arc-chat

use thiserror::Error;

/// Result type alias using arc-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a conversation
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the completion layer
    #[error(transparent)]
    Ai(#[from] arc_ai::Error),

    /// Reading or writing history or notebook files failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// History or notebook contents could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A chat identity that cannot be used as a storage key
    #[error("Invalid chat id: {0}")]
    InvalidChatId(String),

    /// Handing a segment to the chat transport failed
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

impl Error {
    /// Check if this error is a network/endpoint failure of the completion call
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Ai(e) => e.is_transport(),
            _ => false,
        }
    }
}
