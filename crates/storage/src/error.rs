//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
///
/// Remote failures fall into a small closed set so callers can decide what to
/// retry without inspecting provider-specific codes: see [`StorageError::is_transient`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("service error (HTTP {status}): {message}")]
    Service { status: u16, message: String },

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid continuation token: {0}")]
    InvalidContinuationToken(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] stowage_metadata::MetadataError),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    ///
    /// Network failures, throttling, timeouts and server-side 5xx responses
    /// are transient. Credential, configuration and not-found errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) | Self::Throttled(_) | Self::Io(_) => true,
            Self::Service { status, .. } => *status >= 500,
            Self::S3(_) => true,
            _ => false,
        }
    }

    /// Short classification used in logs and task failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::BucketNotEmpty(_) => "bucket_not_empty",
            Self::AccessDenied(_) => "access_denied",
            Self::Unreachable(_) => "unreachable",
            Self::Timeout(_) => "timeout",
            Self::Throttled(_) => "throttled",
            Self::Service { .. } => "service",
            Self::S3(_) => "s3",
            Self::Io(_) => "io",
            Self::InvalidKey(_) => "invalid_key",
            Self::Config(_) => "configuration",
            Self::InvalidContinuationToken(_) => "invalid_continuation_token",
            Self::Metadata(_) => "metadata",
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
