//! Worker pool isolation: panics, time limits, back-pressure and shutdown.

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::config::{AppConfig, WorkerConfig};
use stowage_core::{TaskId, TaskStatus};
use stowage_metadata::{MemoryMetadataStore, MetadataStore};
use stowage_server::{AppState, WorkerPool};
use stowage_storage::MemoryObjectClient;
use stowage_tasks::{Job, JobOutcome, MemoryProgressStore, TaskError, TaskTracker};
use tokio::sync::Semaphore;

fn worker_config(concurrency: usize, queue_capacity: usize) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        queue_capacity,
        task_time_limit_secs: 60,
    }
}

fn delete(bucket: &str) -> Job {
    Job::DeleteBucket {
        bucket: bucket.to_string(),
    }
}

async fn wait_for_status(tracker: &TaskTracker, task_id: &TaskId, status: TaskStatus) {
    for _ in 0..200 {
        if let Some(record) = tracker.get(task_id).await.unwrap()
            && record.status == status
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached {status:?}");
}

#[tokio::test]
async fn test_panicking_job_fails_its_task_only() {
    let tracker = tracker();
    let pool = WorkerPool::new(tracker.clone(), &worker_config(1, 4));

    let faulty = Arc::new(FaultyClient::new(ListBehavior::Panic));
    faulty.inner.seed("doomed", "", 3, 1).await;
    let ctx = job_context(&tracker, faulty).await;
    let doomed = ctx.task_id.clone();
    let err = pool
        .submit(delete("doomed"), ctx)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(&err, TaskError::Panicked(msg) if msg.contains("listing exploded")));

    let record = tracker.get(&doomed).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.error.unwrap().kind, "panic");

    // The single worker survived and runs the next job.
    let healthy = Arc::new(MemoryObjectClient::new());
    healthy.seed("fine", "", 2, 1).await;
    let ctx = job_context(&tracker, healthy.clone()).await;
    let outcome = pool
        .submit(delete("fine"), ctx)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Completed(json!({"deleted": 2, "bucket": "fine"}))
    );
    assert!(!healthy.bucket_exists("fine").await);
}

#[tokio::test(start_paused = true)]
async fn test_job_over_time_limit_is_failed() {
    let tracker = tracker();
    let config = WorkerConfig {
        task_time_limit_secs: 1,
        ..worker_config(1, 4)
    };
    let pool = WorkerPool::new(tracker.clone(), &config);

    let ctx = job_context(&tracker, Arc::new(FaultyClient::new(ListBehavior::Hang))).await;
    let task_id = ctx.task_id.clone();
    let err = pool
        .submit(delete("stuck"), ctx)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::Timeout(1)));

    let record = tracker.get(&task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.error.unwrap().kind, "timeout");
}

#[tokio::test]
async fn test_full_queue_rejects_and_fails_record() {
    let gate = Arc::new(Semaphore::new(0));
    let faulty = Arc::new(FaultyClient::new(ListBehavior::Gate(gate.clone())));
    for bucket in ["a", "b", "c"] {
        faulty.inner.seed(bucket, "", 1, 1).await;
    }

    let mut config = AppConfig::for_testing();
    config.worker = worker_config(1, 1);
    let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::from_seed(&seed()).unwrap());
    let factory = Arc::new(SharedClientFactory::new(faulty.clone()));
    let state = AppState::new(config, metadata, Arc::new(MemoryProgressStore::new()), factory).unwrap();
    let service = &state.service;

    let first = service.start_delete_bucket(&bob(), PRIMARY, "a").await.unwrap();
    wait_for_status(&state.tracker, &first.response.task_id, TaskStatus::Running).await;

    let second = service.start_delete_bucket(&bob(), PRIMARY, "b").await.unwrap();
    let err = service
        .start_delete_bucket(&bob(), PRIMARY, "c")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "task_error");

    let records = state.tracker.list().await.unwrap();
    assert_eq!(records.len(), 3);
    let rejected: Vec<_> = records
        .iter()
        .filter(|r| r.status == TaskStatus::Failed)
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].error.as_ref().unwrap().kind, "internal");

    gate.add_permits(2);
    assert!(matches!(first.handle.wait().await.unwrap(), JobOutcome::Completed(_)));
    assert!(matches!(second.handle.wait().await.unwrap(), JobOutcome::Completed(_)));
    assert!(faulty.inner.bucket_exists("c").await);
}

#[tokio::test]
async fn test_cancelled_while_queued_never_runs() {
    let tracker = tracker();
    let pool = WorkerPool::new(tracker.clone(), &worker_config(1, 4));

    let gate = Arc::new(Semaphore::new(0));
    let gated = Arc::new(FaultyClient::new(ListBehavior::Gate(gate.clone())));
    gated.inner.seed("first", "", 1, 1).await;
    let ctx = job_context(&tracker, gated).await;
    let first_id = ctx.task_id.clone();
    let first = pool.submit(delete("first"), ctx).await.unwrap();
    wait_for_status(&tracker, &first_id, TaskStatus::Running).await;

    let queued_client = Arc::new(MemoryObjectClient::new());
    queued_client.seed("second", "", 5, 1).await;
    let ctx = job_context(&tracker, queued_client.clone()).await;
    let second_id = ctx.task_id.clone();
    let second = pool.submit(delete("second"), ctx).await.unwrap();
    tracker.cancel(&second_id).await.unwrap();

    gate.add_permits(1);
    first.wait().await.unwrap();
    assert_eq!(second.wait().await.unwrap(), JobOutcome::Cancelled(json!({})));

    assert_eq!(queued_client.list_calls(), 0);
    assert_eq!(queued_client.object_count("second").await, Some(5));
    let record = tracker.get(&second_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_shutdown_drains_queued_jobs() {
    let tracker = tracker();
    let pool = WorkerPool::new(tracker.clone(), &worker_config(1, 8));
    let client = Arc::new(MemoryObjectClient::new());

    let mut handles = Vec::new();
    for i in 0..3 {
        let bucket = format!("b{i}");
        client.seed(&bucket, "", 10, 1).await;
        let ctx = job_context(&tracker, client.clone()).await;
        handles.push(pool.submit(delete(&bucket), ctx).await.unwrap());
    }

    pool.shutdown().await;

    for handle in handles {
        assert!(matches!(handle.wait().await.unwrap(), JobOutcome::Completed(_)));
    }
    for i in 0..3 {
        assert!(!client.bucket_exists(&format!("b{i}")).await);
    }

    let ctx = job_context(&tracker, client.clone()).await;
    let err = pool.submit(delete("late"), ctx).await.unwrap_err();
    assert_eq!(err.code(), "internal_error");
}
