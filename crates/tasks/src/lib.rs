//! Asynchronous task tracking and bulk object-store jobs.
//!
//! This crate provides:
//! - Progress stores with per-key TTL and compare-and-swap (memory, Redis)
//! - The task tracker implementing the record lifecycle
//! - Bulk jobs: bucket, prefix and bulk deletion, and size calculation
//! - Bounded retries and progress sub-range scaling

pub mod error;
pub mod jobs;
pub mod progress;
pub mod retry;
pub mod store;
pub mod tracker;

pub use error::{TaskError, TaskResult};
pub use jobs::{
    BulkPlan, Job, JobContext, JobEvents, JobOutcome, NoopEvents, record_outcome, run_job,
};
pub use progress::{ProgressRange, ProgressReporter};
pub use retry::RetryPolicy;
pub use store::{MemoryProgressStore, ProgressStore, RedisProgressStore};
pub use tracker::{Checkpoint, TaskTracker, TaskUpdate, Transition};

use std::sync::Arc;
use std::time::Duration;
use stowage_core::config::{ProgressConfig, ProgressStoreConfig};

/// Create the progress store named by configuration.
pub fn store_from_config(config: &ProgressConfig) -> TaskResult<Arc<dyn ProgressStore>> {
    config.validate().map_err(TaskError::Store)?;

    match &config.store {
        ProgressStoreConfig::Memory => Ok(Arc::new(MemoryProgressStore::new())),
        ProgressStoreConfig::Redis { url, timeout_ms } => {
            let store = RedisProgressStore::new(url, Duration::from_millis(*timeout_ms))?;
            Ok(Arc::new(store))
        }
    }
}
