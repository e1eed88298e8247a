//! Task progress records: creation, updates and terminal transitions.
//!
//! Every mutation is a read-modify-write guarded by compare-and-swap, so a
//! cancellation can never be overwritten by a concurrent progress update.
//! Active records carry the long TTL, refreshed on every write; terminal
//! records switch to the short TTL.

use crate::error::{TaskError, TaskResult};
use crate::store::ProgressStore;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use stowage_core::config::ProgressConfig;
use stowage_core::{TaskFailure, TaskId, TaskRecord, TaskStatus, TaskType};
use time::OffsetDateTime;
use tracing::instrument;

/// Compare-and-swap attempts before giving up on a contended record.
const MAX_CAS_ATTEMPTS: usize = 16;

/// Fields to change on an active record. Unset fields are left alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub progress: Option<u8>,
    pub step: Option<String>,
    pub status: Option<TaskStatus>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Result of attempting to change a record.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    /// The change was written. Holds the new record.
    Applied(TaskRecord),
    /// The record was already terminal and was left unchanged.
    AlreadyTerminal(TaskRecord),
    /// No live record exists: never created, expired or deleted.
    Missing,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn record(&self) -> Option<&TaskRecord> {
        match self {
            Self::Applied(record) | Self::AlreadyTerminal(record) => Some(record),
            Self::Missing => None,
        }
    }
}

/// What a running job should do at a checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    /// The record reached a terminal state, normally through cancellation.
    Stop,
    /// The record is gone. The job must stop issuing calls.
    Lost,
}

/// Tracks task records in a [`ProgressStore`].
pub struct TaskTracker {
    store: Arc<dyn ProgressStore>,
    key_prefix: String,
    running_ttl: Duration,
    terminal_ttl: Duration,
}

impl std::fmt::Debug for TaskTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTracker")
            .field("store", &self.store.backend_name())
            .field("key_prefix", &self.key_prefix)
            .field("running_ttl", &self.running_ttl)
            .field("terminal_ttl", &self.terminal_ttl)
            .finish()
    }
}

impl TaskTracker {
    pub fn new(store: Arc<dyn ProgressStore>, config: &ProgressConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            running_ttl: config.running_ttl(),
            terminal_ttl: config.terminal_ttl(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    fn key(&self, task_id: &TaskId) -> String {
        format!("{}{}", self.key_prefix, task_id)
    }

    fn ttl_for(&self, status: TaskStatus) -> Duration {
        if status.is_terminal() {
            self.terminal_ttl
        } else {
            self.running_ttl
        }
    }

    fn stamp(record: &mut TaskRecord, ttl: Duration) {
        let now = OffsetDateTime::now_utc();
        record.updated_at = now;
        record.expires_at = Some(now + ttl);
    }

    /// Create a `pending` record with the long TTL, replacing any record
    /// under the same id.
    #[instrument(skip(self, metadata), fields(task_id = %task_id))]
    pub async fn create(
        &self,
        task_id: TaskId,
        task_type: TaskType,
        metadata: Map<String, Value>,
    ) -> TaskResult<TaskRecord> {
        let mut record = TaskRecord::new(task_id, task_type, metadata);
        Self::stamp(&mut record, self.running_ttl);
        let key = self.key(&record.task_id);
        self.store
            .put(&key, &record.to_json()?, self.running_ttl)
            .await?;
        tracing::debug!(task_type = task_type.as_str(), "Created task record");
        Ok(record)
    }

    pub async fn get(&self, task_id: &TaskId) -> TaskResult<Option<TaskRecord>> {
        match self.store.get(&self.key(task_id)).await? {
            Some(raw) => Ok(Some(TaskRecord::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    /// Apply `change` to an active record with compare-and-swap.
    ///
    /// Missing and terminal records are never written.
    async fn modify<F>(&self, task_id: &TaskId, change: F) -> TaskResult<Transition>
    where
        F: Fn(&mut TaskRecord),
    {
        let key = self.key(task_id);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(raw) = self.store.get(&key).await? else {
                return Ok(Transition::Missing);
            };
            let mut record = TaskRecord::from_json(&raw)?;
            if record.status.is_terminal() {
                return Ok(Transition::AlreadyTerminal(record));
            }

            change(&mut record);
            let ttl = self.ttl_for(record.status);
            Self::stamp(&mut record, ttl);

            if self
                .store
                .compare_and_swap(&key, &raw, &record.to_json()?, ttl)
                .await?
            {
                return Ok(Transition::Applied(record));
            }
        }
        Err(TaskError::Store(format!(
            "task {task_id} is contended: gave up after {MAX_CAS_ATTEMPTS} attempts"
        )))
    }

    /// Update progress, step or status of an active record.
    ///
    /// Without an explicit status a `pending` record moves to `running`.
    /// Progress is clamped to 100 and never decreases.
    pub async fn update(&self, task_id: &TaskId, update: TaskUpdate) -> TaskResult<Transition> {
        let transition = self
            .modify(task_id, |record| {
                if let Some(progress) = update.progress {
                    record.progress = record.progress.max(progress.min(100));
                }
                if let Some(step) = &update.step {
                    record.current_step = Some(step.clone());
                }
                match update.status {
                    Some(status) => record.status = status,
                    None if record.status == TaskStatus::Pending => {
                        record.status = TaskStatus::Running;
                    }
                    None => {}
                }
            })
            .await?;
        if matches!(transition, Transition::Missing) {
            tracing::debug!(task_id = %task_id, "Dropped update for missing task");
        }
        Ok(transition)
    }

    /// Mark a task completed with its result.
    #[instrument(skip(self, result), fields(task_id = %task_id))]
    pub async fn complete(&self, task_id: &TaskId, result: Value) -> TaskResult<Transition> {
        self.modify(task_id, |record| {
            record.status = TaskStatus::Completed;
            record.progress = 100;
            record.current_step = Some("Completed".to_string());
            record.result = Some(result.clone());
        })
        .await
    }

    /// Mark a task failed.
    #[instrument(skip(self, failure), fields(task_id = %task_id, kind = %failure.kind))]
    pub async fn fail(&self, task_id: &TaskId, failure: TaskFailure) -> TaskResult<Transition> {
        self.modify(task_id, |record| {
            record.status = TaskStatus::Failed;
            record.current_step = Some(format!("Failed: {}", failure.message));
            record.error = Some(failure.clone());
        })
        .await
    }

    /// Mark a task cancelled. The running job notices at its next checkpoint.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn cancel(&self, task_id: &TaskId) -> TaskResult<Transition> {
        self.modify(task_id, |record| {
            record.status = TaskStatus::Cancelled;
            record.current_step = Some("Cancelled".to_string());
        })
        .await
    }

    pub async fn is_cancelled(&self, task_id: &TaskId) -> TaskResult<bool> {
        Ok(self
            .get(task_id)
            .await?
            .is_some_and(|r| r.status == TaskStatus::Cancelled))
    }

    /// Decide whether a running job may issue its next batch.
    pub async fn checkpoint(&self, task_id: &TaskId) -> TaskResult<Checkpoint> {
        Ok(match self.get(task_id).await? {
            None => Checkpoint::Lost,
            Some(record) if record.status.is_terminal() => Checkpoint::Stop,
            Some(_) => Checkpoint::Continue,
        })
    }

    pub async fn delete(&self, task_id: &TaskId) -> TaskResult<bool> {
        self.store.delete(&self.key(task_id)).await
    }

    /// Every live record. Records that fail to parse are skipped.
    pub async fn list(&self) -> TaskResult<Vec<TaskRecord>> {
        let keys = self.store.scan(&self.key_prefix).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            // Expired between scan and get.
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match TaskRecord::from_json(&raw) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping unreadable task record"),
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
