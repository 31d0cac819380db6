//! Fundflow error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FundflowError>;

#[derive(Debug, Error)]
pub enum FundflowError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
