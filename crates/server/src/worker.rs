//! Fixed-size worker pool for bulk jobs.
//!
//! Submissions go through a bounded queue consumed by `concurrency` workers.
//! Each job runs in its own spawned task so a panic is caught as a
//! `JoinError` and recorded as a failure instead of taking a worker down.
//! Every job also runs under the configured time limit.

use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stowage_core::TaskId;
use stowage_core::config::WorkerConfig;
use stowage_tasks::{Job, JobContext, JobOutcome, TaskError, TaskResult, TaskTracker, record_outcome, run_job};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

struct Submission {
    job: Job,
    ctx: JobContext,
    reply: oneshot::Sender<TaskResult<JobOutcome>>,
}

/// Awaitable outcome of a submitted job.
///
/// Dropping the handle does not cancel the job; use the tracker for that.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: TaskId,
    outcome: oneshot::Receiver<TaskResult<JobOutcome>>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Wait for the job to finish. Cancelled and lost jobs return their
    /// partial result here.
    pub async fn wait(self) -> TaskResult<JobOutcome> {
        self.outcome.await.map_err(|_| {
            TaskError::Internal(format!(
                "worker pool dropped task {} before it finished",
                self.task_id
            ))
        })?
    }
}

/// Pool of workers executing queued jobs.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Submission>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `config.concurrency` workers. Must be called inside a Tokio
    /// runtime.
    pub fn new(tracker: Arc<TaskTracker>, config: &WorkerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let time_limit = config.task_time_limit();

        let workers = (0..config.concurrency.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let tracker = Arc::clone(&tracker);
                tokio::spawn(worker_loop(worker, receiver, tracker, time_limit))
            })
            .collect();

        tracing::info!(
            concurrency = config.concurrency,
            queue_capacity = config.queue_capacity,
            time_limit_secs = time_limit.as_secs(),
            "Worker pool started"
        );

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Queue a job. Fails without waiting when the queue is full or the pool
    /// is shutting down.
    pub async fn submit(&self, job: Job, ctx: JobContext) -> ServiceResult<TaskHandle> {
        let task_id = ctx.task_id.clone();
        let action = job.action();
        let (reply, outcome) = oneshot::channel();

        let sender = self.sender.lock().await;
        let Some(sender) = sender.as_ref() else {
            return Err(ServiceError::Internal(
                "worker pool is shutting down".to_string(),
            ));
        };
        sender
            .try_send(Submission { job, ctx, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ServiceError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => {
                    ServiceError::Internal("worker pool is closed".to_string())
                }
            })?;

        metrics::TASKS_SUBMITTED
            .with_label_values(&[action.as_str()])
            .inc();
        tracing::debug!(task_id = %task_id, action = action.as_str(), "Task queued");
        Ok(TaskHandle { task_id, outcome })
    }

    /// Stop accepting work, let queued jobs finish, then wait for every
    /// worker to exit.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().await.take());
        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = ?e, "Worker exited abnormally");
            }
        }
        tracing::info!("Worker pool drained");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").finish_non_exhaustive()
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Submission>>>,
    tracker: Arc<TaskTracker>,
    time_limit: Duration,
) {
    loop {
        // Hold the receiver lock only while waiting for the next submission.
        let next = receiver.lock().await.recv().await;
        let Some(Submission { job, ctx, reply }) = next else {
            break;
        };
        let task_id = ctx.task_id.clone();
        let outcome = execute(job, ctx, &tracker, time_limit).await;
        if reply.send(outcome).is_err() {
            tracing::debug!(task_id = %task_id, "Task handle dropped before completion");
        }
    }
    tracing::debug!(worker, "Worker stopped");
}

async fn execute(
    job: Job,
    ctx: JobContext,
    tracker: &TaskTracker,
    time_limit: Duration,
) -> TaskResult<JobOutcome> {
    let task_id = ctx.task_id.clone();
    let action = job.action();
    let started = Instant::now();
    metrics::TASKS_ACTIVE.inc();

    let handle = tokio::spawn(async move {
        match tokio::time::timeout(time_limit, run_job(job, &ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskError::Timeout(time_limit.as_secs())),
        }
    });

    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(join_err) if join_err.is_panic() => {
            metrics::TASKS_PANICKED.inc();
            let message = panic_message(join_err.into_panic());
            tracing::error!(task_id = %task_id, panic = %message, "Task panicked, marking it failed");
            Err(TaskError::Panicked(message))
        }
        Err(join_err) => {
            tracing::warn!(task_id = %task_id, error = %join_err, "Task was aborted");
            Err(TaskError::Internal(format!("task aborted: {join_err}")))
        }
    };
    metrics::TASKS_ACTIVE.dec();

    let status = match record_outcome(tracker, &task_id, &outcome).await {
        Ok(transition) => transition
            .record()
            .map(|record| record.status.as_str())
            .unwrap_or("lost"),
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "Failed to record task outcome");
            "unrecorded"
        }
    };
    metrics::record_task_finished(action.as_str(), status, started.elapsed().as_secs_f64());
    tracing::info!(
        task_id = %task_id,
        action = action.as_str(),
        status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Task finished"
    );
    outcome
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
