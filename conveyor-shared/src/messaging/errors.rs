//! Messaging error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MessagingError {
    #[error("queue backend error: {0}")]
    Backend(String),
    #[error("message serialization error: {0}")]
    Serialization(String),
    #[error("invalid receipt: {0}")]
    InvalidReceipt(String),
}

pub type MessagingResult<T> = Result<T, MessagingError>;

impl From<String> for MessagingError {
    fn from(message: String) -> Self {
        MessagingError::Backend(message)
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(error: serde_json::Error) -> Self {
        MessagingError::Serialization(error.to_string())
    }
}

impl From<pgmq::errors::PgmqError> for MessagingError {
    fn from(error: pgmq::errors::PgmqError) -> Self {
        MessagingError::Backend(error.to_string())
    }
}
