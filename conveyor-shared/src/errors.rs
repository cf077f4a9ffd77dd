//! Error types for the conveyor queue core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Infrastructure-level errors raised by the store, queues and event bus.
///
/// These never reach callers directly; handlers translate them into
/// [`ApiError::InternalError`] at the operation boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConveyorError {
    #[error("Store error: {0}")]
    StoreError(String),
    #[error("Row version conflict: {0}")]
    VersionConflict(String),
    #[error("Messaging error: {0}")]
    MessagingError(String),
    #[error("Event error: {0}")]
    EventError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ConveyorResult<T> = anyhow::Result<T, ConveyorError>;

impl From<serde_json::Error> for ConveyorError {
    fn from(error: serde_json::Error) -> Self {
        ConveyorError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for ConveyorError {
    fn from(err: sqlx::Error) -> Self {
        ConveyorError::StoreError(err.to_string())
    }
}

impl From<crate::messaging::MessagingError> for ConveyorError {
    fn from(error: crate::messaging::MessagingError) -> Self {
        ConveyorError::MessagingError(error.to_string())
    }
}

/// Caller-facing errors for the operation surface.
///
/// Every user-visible operation resolves to one of these kinds. The
/// distinction matters for retry behavior: `InputError` and
/// `RequestConflict` are non-retryable, `InternalError` may be retried.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "PascalCase")]
pub enum ApiError {
    /// The request payload fails validation.
    #[error("Invalid request: {message}")]
    InputError { message: String },

    /// The referenced task, run, or worker does not exist.
    #[error("{message}")]
    ResourceNotFound { message: String },

    /// The operation conflicts with current state: idempotency collision
    /// with a different definition, past-deadline operation, or a run not
    /// in the expected state.
    #[error("Request conflict: {message}")]
    RequestConflict {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },

    /// The caller lacks a satisfying scope.
    #[error("Authorization failed: {message}")]
    AuthorizationError { message: String },

    /// A dependency of the service failed permanently.
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

pub type ApiResult<T> = anyhow::Result<T, ApiError>;

impl ApiError {
    pub fn input(message: impl Into<String>) -> Self {
        ApiError::InputError {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::ResourceNotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::RequestConflict {
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        ApiError::RequestConflict {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::InternalError {
            message: message.into(),
        }
    }
}

impl From<ConveyorError> for ApiError {
    fn from(err: ConveyorError) -> Self {
        match err {
            ConveyorError::ValidationError(m) | ConveyorError::InvalidInput(m) => {
                ApiError::InputError { message: m }
            }
            other => ApiError::InternalError {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_surface_as_input_errors() {
        let err: ApiError = ConveyorError::InvalidInput("bad slug".to_string()).into();
        assert!(matches!(err, ApiError::InputError { .. }));
    }

    #[test]
    fn infrastructure_errors_surface_as_internal() {
        let err: ApiError = ConveyorError::StoreError("connection reset".to_string()).into();
        assert!(matches!(err, ApiError::InternalError { .. }));
    }

    #[test]
    fn conflict_details_round_trip() {
        let err = ApiError::conflict_with(
            "task already exists with different definition",
            serde_json::json!({"requested": {"retries": 5}, "existing": {"retries": 1}}),
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "RequestConflict");
        assert!(json["details"]["requested"].is_object());
    }
}
