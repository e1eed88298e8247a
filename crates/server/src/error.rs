//! Service error types.

use serde::Serialize;
use stowage_storage::StorageError;
use stowage_tasks::TaskError;

/// Error body handed to the caller-facing API layer.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// Service error type.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// The referenced storage configuration is missing, inactive or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("task error: {0}")]
    Task(TaskError),

    /// The worker queue refused the submission.
    #[error("task queue is full")]
    QueueFull,

    #[error("metadata error: {0}")]
    Metadata(#[from] stowage_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] stowage_core::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) | Self::Core(_) => "bad_request",
            Self::Configuration(_) => "configuration_error",
            Self::Storage(_) => "storage_error",
            Self::Task(_) | Self::QueueFull => "task_error",
            Self::Metadata(_) | Self::Internal(_) => "internal_error",
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Config(msg) => Self::Configuration(msg),
            StorageError::Metadata(e) => Self::Metadata(e),
            other => Self::Storage(other),
        }
    }
}

impl From<TaskError> for ServiceError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::BadRequest(msg) => Self::BadRequest(msg),
            TaskError::NotFound(msg) => Self::NotFound(msg),
            TaskError::Storage(e) => e.into(),
            other => Self::Task(other),
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_errors_are_configuration_errors() {
        let err = ServiceError::from(StorageError::Config("storage config 9 not found".into()));
        assert_eq!(err.code(), "configuration_error");

        let err = ServiceError::from(StorageError::Unreachable("host".into()));
        assert_eq!(err.code(), "storage_error");
    }

    #[test]
    fn test_task_errors_keep_their_class() {
        let err = ServiceError::from(TaskError::BadRequest("prefix must not be empty".into()));
        assert_eq!(err.code(), "bad_request");

        let err = ServiceError::from(TaskError::Timeout(5));
        assert_eq!(err.code(), "task_error");
    }

    #[test]
    fn test_response_body() {
        let body = ServiceError::Forbidden("Write access denied to bucket 'b1'".into()).to_response();
        assert_eq!(body.code, "forbidden");
        assert_eq!(body.message, "forbidden: Write access denied to bucket 'b1'");
    }
}
