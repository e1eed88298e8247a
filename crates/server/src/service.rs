//! Task service: authorizes requests, creates task records and hands jobs to
//! the worker pool.
//!
//! Authorization and configuration problems are reported to the caller
//! before a record exists. Once a start call returns, every further failure
//! is visible only through the task record.

use crate::access::PermissionResolver;
use crate::error::{ServiceError, ServiceResult};
use crate::metrics::{self, MetricsEvents};
use crate::worker::{TaskHandle, WorkerPool};
use serde::Serialize;
use std::sync::Arc;
use stowage_core::config::JobsConfig;
use stowage_core::{
    ConnectionParams, StorageConfigRecord, StorageId, TaskAction, TaskContext, TaskFailure, TaskId,
    TaskRecord, User,
};
use stowage_metadata::StorageConfigRepo;
use stowage_storage::{CacheStats, ConnectionCache};
use stowage_tasks::jobs::normalize_prefix;
use stowage_tasks::{BulkPlan, Job, JobContext, RetryPolicy, TaskTracker, Transition};
use tracing::instrument;

/// Immediate answer to a start request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StartResponse {
    pub task_id: TaskId,
    pub status: String,
    pub message: String,
}

/// A started task: the caller-facing response plus an in-process handle.
#[derive(Debug)]
pub struct StartedTask {
    pub response: StartResponse,
    pub handle: TaskHandle,
}

/// Answer to a cancel request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CancelResponse {
    /// `cancelled`, or `already_done` when the task had already finished.
    pub status: String,
}

/// Result of a connection test.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_count: Option<usize>,
}

impl ConnectionReport {
    fn from_result(result: Result<usize, String>) -> Self {
        match result {
            Ok(count) => Self {
                success: true,
                message: format!("Connection successful, {count} buckets visible"),
                bucket_count: Some(count),
            },
            Err(message) => Self {
                success: false,
                message,
                bucket_count: None,
            },
        }
    }
}

/// Entry point for starting, observing and cancelling bulk tasks.
pub struct TaskService {
    resolver: PermissionResolver,
    configs: Arc<dyn StorageConfigRepo>,
    cache: Arc<ConnectionCache>,
    tracker: Arc<TaskTracker>,
    pool: Arc<WorkerPool>,
    jobs: JobsConfig,
    retry: RetryPolicy,
}

impl TaskService {
    pub fn new(
        resolver: PermissionResolver,
        configs: Arc<dyn StorageConfigRepo>,
        cache: Arc<ConnectionCache>,
        tracker: Arc<TaskTracker>,
        pool: Arc<WorkerPool>,
        jobs: JobsConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            resolver,
            configs,
            cache,
            tracker,
            pool,
            jobs,
            retry,
        }
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    /// Delete every object in a bucket, then the bucket.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn start_delete_bucket(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket: &str,
    ) -> ServiceResult<StartedTask> {
        require_bucket_name(bucket)?;
        self.resolver
            .require_bucket_write(user, storage_id, bucket)
            .await?;

        let context = TaskContext::new(TaskAction::DeleteBucket, user.id, storage_id, bucket);
        let job = Job::DeleteBucket {
            bucket: bucket.to_string(),
        };
        self.start(storage_id, job, context, format!("Deleting bucket '{bucket}'"))
            .await
    }

    /// Delete every object under a folder prefix.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn start_delete_prefix(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket: &str,
        prefix: &str,
    ) -> ServiceResult<StartedTask> {
        require_bucket_name(bucket)?;
        self.resolver
            .require_bucket_write(user, storage_id, bucket)
            .await?;
        let prefix = normalize_prefix(prefix)?;

        let context = TaskContext::new(TaskAction::DeletePrefix, user.id, storage_id, bucket)
            .with_prefix(prefix.clone());
        let message = format!("Deleting folder '{prefix}'");
        let job = Job::DeletePrefix {
            bucket: bucket.to_string(),
            prefix,
        };
        self.start(storage_id, job, context, message).await
    }

    /// Delete explicit keys. Keys ending in `/` are folders.
    #[instrument(skip(self, user, keys), fields(user_id = %user.id, keys = keys.len()))]
    pub async fn start_bulk_delete(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket: &str,
        keys: Vec<String>,
    ) -> ServiceResult<StartedTask> {
        require_bucket_name(bucket)?;
        self.resolver
            .require_bucket_write(user, storage_id, bucket)
            .await?;
        let plan = BulkPlan::from_keys(keys)?;

        let context = TaskContext::new(TaskAction::BulkDelete, user.id, storage_id, bucket)
            .with_object_count(plan.len());
        let message = format!("Deleting {} items", plan.len());
        let job = Job::BulkDelete {
            bucket: bucket.to_string(),
            plan,
        };
        self.start(storage_id, job, context, message).await
    }

    /// Total size of a bucket, or of one folder in it.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn start_calculate_size(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket: &str,
        prefix: Option<&str>,
    ) -> ServiceResult<StartedTask> {
        require_bucket_name(bucket)?;
        self.resolver
            .require_bucket_read(user, storage_id, bucket)
            .await?;

        let prefix = prefix.filter(|p| !p.is_empty()).map(str::to_string);
        let mut context = TaskContext::new(TaskAction::CalculateSize, user.id, storage_id, bucket);
        if let Some(prefix) = &prefix {
            context = context.with_prefix(prefix.clone());
        }
        let job = Job::CalculateSize {
            bucket: bucket.to_string(),
            prefix,
        };
        self.start(storage_id, job, context, "Calculating size".to_string())
            .await
    }

    async fn start(
        &self,
        storage_id: StorageId,
        job: Job,
        context: TaskContext,
        message: String,
    ) -> ServiceResult<StartedTask> {
        // Missing or inactive configs fail here, before a record exists.
        let connection = self.cache.get(storage_id).await?;

        let action = context.action;
        let task_id = TaskId::new();
        self.tracker
            .create(task_id.clone(), action.task_type(), context.into_metadata()?)
            .await?;

        let ctx = JobContext::new(
            task_id.clone(),
            Arc::clone(&self.tracker),
            connection.client(),
            self.jobs.clone(),
            self.retry,
        )
        .with_events(Arc::new(MetricsEvents));

        let handle = match self.pool.submit(job, ctx).await {
            Ok(handle) => handle,
            Err(err) => {
                let failure = TaskFailure::new("internal", err.to_string());
                if let Err(e) = self.tracker.fail(&task_id, failure).await {
                    tracing::error!(task_id = %task_id, error = %e, "Failed to mark unqueued task failed");
                }
                return Err(err);
            }
        };

        tracing::info!(
            task_id = %task_id,
            action = action.as_str(),
            storage_id = %storage_id,
            "Task started"
        );
        Ok(StartedTask {
            response: StartResponse {
                task_id,
                status: "started".to_string(),
                message,
            },
            handle,
        })
    }

    /// Current record of a task the caller owns, or any task for admins.
    pub async fn progress(&self, user: &User, task_id: &TaskId) -> ServiceResult<TaskRecord> {
        let record = self.owned_record(user, task_id).await?;
        Ok(record)
    }

    /// Request cooperative cancellation.
    #[instrument(skip(self, user), fields(user_id = %user.id, task_id = %task_id))]
    pub async fn cancel(&self, user: &User, task_id: &TaskId) -> ServiceResult<CancelResponse> {
        self.owned_record(user, task_id).await?;

        let status = match self.tracker.cancel(task_id).await? {
            Transition::Applied(_) => "cancelled",
            Transition::AlreadyTerminal(_) => "already_done",
            Transition::Missing => return Err(not_found(task_id)),
        };
        tracing::info!(status, "Cancel requested");
        Ok(CancelResponse {
            status: status.to_string(),
        })
    }

    /// Pending and running tasks, limited to the caller's own unless admin.
    pub async fn active_tasks(&self, user: &User) -> ServiceResult<Vec<TaskRecord>> {
        Ok(self
            .tracker
            .list()
            .await?
            .into_iter()
            .filter(TaskRecord::is_active)
            .filter(|record| user.is_admin || record.owner() == Some(user.id))
            .collect())
    }

    /// Check that a persisted storage configuration can list buckets.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn test_connection(
        &self,
        user: &User,
        storage_id: StorageId,
    ) -> ServiceResult<ConnectionReport> {
        self.resolver
            .require_storage_access(user, storage_id)
            .await?;
        let connection = self.cache.get(storage_id).await?;
        Ok(ConnectionReport::from_result(connection.test_connection().await))
    }

    /// Check candidate parameters that have not been saved yet. Admin only.
    #[instrument(skip(self, user, params), fields(user_id = %user.id))]
    pub async fn test_connection_params(
        &self,
        user: &User,
        params: &ConnectionParams,
    ) -> ServiceResult<ConnectionReport> {
        require_admin(user, "test connection parameters")?;
        let connection = self.cache.get_for_params(params).await?;
        Ok(ConnectionReport::from_result(connection.test_connection().await))
    }

    /// Create or replace a storage configuration. Admin only.
    ///
    /// When the change affects how clients connect, the cached client is
    /// evicted before this returns. Returns whether a client was evicted.
    #[instrument(skip(self, user, record), fields(user_id = %user.id, storage_id = %record.id))]
    pub async fn update_storage_config(
        &self,
        user: &User,
        record: StorageConfigRecord,
    ) -> ServiceResult<bool> {
        require_admin(user, "manage storage configurations")?;
        record.params.validate().map_err(ServiceError::BadRequest)?;

        let storage_id = record.id;
        let prior = self.configs.upsert_storage_config(record.clone()).await?;
        let reconnect = prior
            .as_ref()
            .is_none_or(|prior| prior.requires_reconnect(&record));
        let evicted = self.on_storage_config_updated(storage_id, reconnect).await;
        tracing::info!(reconnect, evicted, "Storage config saved");
        Ok(evicted)
    }

    /// Delete a storage configuration and evict its cached client. Admin
    /// only. Returns the deleted record.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn delete_storage_config(
        &self,
        user: &User,
        storage_id: StorageId,
    ) -> ServiceResult<StorageConfigRecord> {
        require_admin(user, "manage storage configurations")?;

        let deleted = self
            .configs
            .delete_storage_config(storage_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("storage config {storage_id} not found"))
            })?;
        let evicted = self.on_storage_config_deleted(storage_id).await;
        tracing::info!(evicted, "Storage config deleted");
        Ok(deleted)
    }

    /// Evict the cached client after a configuration change that affects
    /// how it connects. Returns whether a client was evicted.
    pub async fn on_storage_config_updated(
        &self,
        storage_id: StorageId,
        connection_changed: bool,
    ) -> bool {
        if !connection_changed {
            return false;
        }
        self.cache.invalidate(storage_id).await
    }

    /// Evict the cached client of a deleted configuration.
    pub async fn on_storage_config_deleted(&self, storage_id: StorageId) -> bool {
        self.cache.invalidate(storage_id).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    async fn owned_record(&self, user: &User, task_id: &TaskId) -> ServiceResult<TaskRecord> {
        let record = self
            .tracker
            .get(task_id)
            .await?
            .ok_or_else(|| not_found(task_id))?;
        if !user.is_admin && record.owner() != Some(user.id) {
            metrics::AUTHORIZATION_DENIED.inc();
            return Err(ServiceError::Forbidden(format!(
                "Access denied to task {task_id}"
            )));
        }
        Ok(record)
    }
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn require_admin(user: &User, action: &str) -> ServiceResult<()> {
    if user.is_admin {
        return Ok(());
    }
    metrics::AUTHORIZATION_DENIED.inc();
    Err(ServiceError::Forbidden(format!(
        "Admin access required to {action}"
    )))
}

fn require_bucket_name(bucket: &str) -> ServiceResult<()> {
    if bucket.trim().is_empty() {
        return Err(ServiceError::BadRequest(
            "bucket name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn not_found(task_id: &TaskId) -> ServiceError {
    ServiceError::NotFound(format!("task {task_id} not found or expired"))
}
