/// Error types for the chat client core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Conversation error: {0}")]
    Conversation(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;
