//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid permission level: {0}")]
    InvalidPermission(String),

    #[error("invalid task id: {0}")]
    InvalidTaskId(String),

    #[error("invalid task status: {0}")]
    InvalidTaskStatus(String),

    #[error("invalid task action: {0}")]
    InvalidTaskAction(String),

    #[error("invalid storage config: {0}")]
    InvalidStorageConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
