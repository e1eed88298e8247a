//! Bulk object-store jobs run by the worker pool.

pub mod deletion;
pub mod size;

use crate::error::{TaskError, TaskResult};
use crate::progress::ProgressReporter;
use crate::retry::RetryPolicy;
use crate::tracker::{TaskTracker, TaskUpdate, Transition};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use stowage_core::config::JobsConfig;
use stowage_core::{TaskAction, TaskId, TaskStatus};
use stowage_storage::ObjectClient;

/// Hooks fired while a job runs, for metrics.
pub trait JobEvents: Send + Sync {
    fn objects_deleted(&self, _count: u64) {}
    fn delete_retried(&self) {}
}

/// Events sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl JobEvents for NoopEvents {}

/// Everything a job needs while it runs.
#[derive(Clone)]
pub struct JobContext {
    pub task_id: TaskId,
    pub tracker: Arc<TaskTracker>,
    pub client: Arc<dyn ObjectClient>,
    pub jobs: JobsConfig,
    pub retry: RetryPolicy,
    pub events: Arc<dyn JobEvents>,
}

impl JobContext {
    pub fn new(
        task_id: TaskId,
        tracker: Arc<TaskTracker>,
        client: Arc<dyn ObjectClient>,
        jobs: JobsConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            task_id,
            tracker,
            client,
            jobs,
            retry,
            events: Arc::new(NoopEvents),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn JobEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter::new(Arc::clone(&self.tracker), self.task_id.clone())
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("task_id", &self.task_id)
            .field("backend", &self.client.backend_name())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// How a job ended, short of an error.
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    /// Finished. The value becomes the record's result.
    Completed(Value),
    /// Stopped at a checkpoint after the record turned terminal. Holds the
    /// partial result.
    Cancelled(Value),
    /// Stopped because the record vanished. Holds the partial result.
    Lost(Value),
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Cancelled(_) => "cancelled",
            Self::Lost(_) => "lost",
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Self::Completed(v) | Self::Cancelled(v) | Self::Lost(v) => v,
        }
    }
}

/// A unit of work with its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Job {
    DeleteBucket {
        bucket: String,
    },
    DeletePrefix {
        bucket: String,
        prefix: String,
    },
    BulkDelete {
        bucket: String,
        plan: BulkPlan,
    },
    CalculateSize {
        bucket: String,
        prefix: Option<String>,
    },
}

impl Job {
    pub fn action(&self) -> TaskAction {
        match self {
            Self::DeleteBucket { .. } => TaskAction::DeleteBucket,
            Self::DeletePrefix { .. } => TaskAction::DeletePrefix,
            Self::BulkDelete { .. } => TaskAction::BulkDelete,
            Self::CalculateSize { .. } => TaskAction::CalculateSize,
        }
    }

    pub fn bucket(&self) -> &str {
        match self {
            Self::DeleteBucket { bucket }
            | Self::DeletePrefix { bucket, .. }
            | Self::BulkDelete { bucket, .. }
            | Self::CalculateSize { bucket, .. } => bucket,
        }
    }
}

/// Mark the record running, then run the job.
///
/// A record that is already terminal (cancelled while queued) or missing
/// stops the job before any object-store call.
pub async fn run_job(job: Job, ctx: &JobContext) -> TaskResult<JobOutcome> {
    let started = ctx
        .tracker
        .update(
            &ctx.task_id,
            TaskUpdate::new()
                .status(TaskStatus::Running)
                .step("Starting..."),
        )
        .await?;
    match started {
        Transition::Applied(_) => {}
        Transition::AlreadyTerminal(_) => return Ok(JobOutcome::Cancelled(json!({}))),
        Transition::Missing => return Ok(JobOutcome::Lost(json!({}))),
    }

    tracing::info!(
        task_id = %ctx.task_id,
        action = job.action().as_str(),
        bucket = %job.bucket(),
        "Running job"
    );

    match job {
        Job::DeleteBucket { bucket } => deletion::delete_bucket(ctx, &bucket).await,
        Job::DeletePrefix { bucket, prefix } => {
            deletion::delete_prefix(ctx, &bucket, &prefix).await
        }
        Job::BulkDelete { bucket, plan } => deletion::bulk_delete(ctx, &bucket, &plan).await,
        Job::CalculateSize { bucket, prefix } => {
            size::calculate_size(ctx, &bucket, prefix.as_deref()).await
        }
    }
}

/// Write a job's result to its record.
///
/// Completed jobs store their result and errors store a failure. Cancelled
/// and lost jobs leave the record as they found it: terminal or gone.
pub async fn record_outcome(
    tracker: &TaskTracker,
    task_id: &TaskId,
    outcome: &TaskResult<JobOutcome>,
) -> TaskResult<Transition> {
    match outcome {
        Ok(JobOutcome::Completed(result)) => tracker.complete(task_id, result.clone()).await,
        Ok(JobOutcome::Cancelled(partial)) => {
            tracing::info!(task_id = %task_id, partial = %partial, "Job cancelled");
            Ok(match tracker.get(task_id).await? {
                Some(record) => Transition::AlreadyTerminal(record),
                None => Transition::Missing,
            })
        }
        Ok(JobOutcome::Lost(partial)) => {
            tracing::warn!(task_id = %task_id, partial = %partial, "Job stopped: task record is gone");
            Ok(Transition::Missing)
        }
        Err(err) => {
            tracing::warn!(task_id = %task_id, kind = err.kind(), error = %err, "Job failed");
            tracker.fail(task_id, err.to_failure()).await
        }
    }
}

/// Normalize a folder prefix to end with `/`. Empty prefixes are rejected.
pub fn normalize_prefix(prefix: &str) -> TaskResult<String> {
    if prefix.is_empty() {
        return Err(TaskError::BadRequest(
            "prefix must not be empty; delete the bucket instead".to_string(),
        ));
    }
    if prefix.ends_with('/') {
        Ok(prefix.to_string())
    } else {
        Ok(format!("{prefix}/"))
    }
}

/// Keys for a bulk delete, split into folders (expanded by listing) and files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkPlan {
    pub folders: Vec<String>,
    pub files: Vec<String>,
}

impl BulkPlan {
    /// Classify keys ending in `/` as folders. Duplicates keep their first
    /// position. An empty list is rejected.
    pub fn from_keys<I, S>(keys: I) -> TaskResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut plan = Self::default();
        for key in keys {
            let key = key.into();
            if key.is_empty() || !seen.insert(key.clone()) {
                continue;
            }
            if key.ends_with('/') {
                plan.folders.push(key);
            } else {
                plan.files.push(key);
            }
        }
        if plan.is_empty() {
            return Err(TaskError::BadRequest("no keys to delete".to_string()));
        }
        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.folders.len() + self.files.len()
    }
}
