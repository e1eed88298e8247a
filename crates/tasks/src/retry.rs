//! Bounded fixed-backoff retries for object-store calls.

use crate::error::TaskResult;
use std::future::Future;
use std::time::Duration;
use stowage_core::config::RetryConfig;
use stowage_storage::StorageResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op`, retrying transient storage errors.
    ///
    /// `on_retry` is called before each retry with the attempt that failed.
    /// Non-transient errors and the last transient error are returned as is.
    pub async fn run<T, F, Fut, R>(&self, what: &str, mut op: F, mut on_retry: R) -> TaskResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
        R: FnMut(u32),
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Transient storage error, retrying"
                    );
                    on_retry(attempt);
                    attempt += 1;
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.backoff())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use stowage_storage::StorageError;

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let calls = &AtomicU32::new(0);
        let mut retries = 0;
        let value = policy
            .run(
                "list",
                move || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StorageError::Throttled("slow down".into()))
                    } else {
                        Ok(7)
                    }
                },
                |_| retries += 1,
            )
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let calls = &AtomicU32::new(0);
        let err = policy
            .run(
                "delete",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(StorageError::Unreachable("down".into()))
                },
                |_| {},
            )
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let calls = &AtomicU32::new(0);
        let err = policy
            .run(
                "delete",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(StorageError::AccessDenied("bad key".into()))
                },
                |_| {},
            )
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, TaskError::Storage(StorageError::AccessDenied(_))));
    }
}
