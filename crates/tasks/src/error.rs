//! Task error types.

use serde_json::{Value, json};
use stowage_core::TaskFailure;
use stowage_storage::StorageError;
use thiserror::Error;

/// How many failed keys a partial-delete failure reports.
pub const FAILED_KEY_SAMPLE: usize = 5;

/// Task tracking and job execution errors.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid task request: {0}")]
    BadRequest(String),

    #[error("progress store error: {0}")]
    Store(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] stowage_core::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{failed} objects could not be deleted")]
    PartialDelete { failed: usize, sample: Vec<String> },

    #[error("task exceeded its time limit of {0} seconds")]
    Timeout(u64),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    /// Classification stored in a failed record's `error.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage(err) => match err {
                StorageError::AccessDenied(_) => "permission",
                StorageError::Config(_) | StorageError::Metadata(_) => "configuration",
                StorageError::NotFound(_) => "not_found",
                StorageError::BucketNotEmpty(_) => "partial_delete",
                _ => "transport",
            },
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "configuration",
            Self::PartialDelete { .. } => "partial_delete",
            Self::Timeout(_) => "timeout",
            Self::Panicked(_) => "panic",
            Self::Store(_)
            | Self::Redis(_)
            | Self::Serialization(_)
            | Self::Core(_)
            | Self::Internal(_) => "internal",
        }
    }

    /// Whether retrying the failed step may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Structured details attached to the failure record.
    pub fn details(&self) -> Value {
        match self {
            Self::PartialDelete { failed, sample } => json!({
                "failed": failed,
                "sample": sample,
            }),
            _ => json!({}),
        }
    }

    /// Build a partial-delete error from every key that still failed.
    pub fn partial_delete(failed_keys: &[String]) -> Self {
        Self::PartialDelete {
            failed: failed_keys.len(),
            sample: failed_keys.iter().take(FAILED_KEY_SAMPLE).cloned().collect(),
        }
    }

    pub fn to_failure(&self) -> TaskFailure {
        TaskFailure::new(self.kind(), self.to_string()).with_details(self.details())
    }
}

/// Result type for task operations.
pub type TaskResult<T> = std::result::Result<T, TaskError>;
