/// Error types for the messaging core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Dedup protocol violation: {0}")]
    Dedup(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Send error: {0}")]
    Send(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChatError {
    /// Whether retrying the same call can reasonably succeed.
    /// Transport and subscription failures are transient; a create-or-get
    /// response without a usable id is a protocol violation and is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Transport(_) | ChatError::Subscription(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
