//! Prometheus metrics for the task engine.
//!
//! Covers task submission and completion, deletions, retries and
//! authorization denials. Labels never carry bucket names, keys or user ids.

use crate::error::{ServiceError, ServiceResult};
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};
use stowage_tasks::JobEvents;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Task lifecycle metrics
pub static TASKS_SUBMITTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stowage_tasks_submitted_total",
            "Total number of tasks submitted to the worker pool by action",
        ),
        &["action"],
    )
    .expect("metric creation failed")
});

pub static TASKS_FINISHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stowage_tasks_finished_total",
            "Total number of tasks finished by action and final status",
        ),
        &["action", "status"],
    )
    .expect("metric creation failed")
});

pub static TASKS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "stowage_tasks_active",
        "Number of tasks currently executing on a worker",
    )
    .expect("metric creation failed")
});

pub static TASKS_PANICKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_tasks_panicked_total",
        "Total number of tasks that panicked and were marked failed",
    )
    .expect("metric creation failed")
});

pub static TASK_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "stowage_task_duration_seconds",
            "Task run time on a worker by action",
        )
        .buckets(vec![
            0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0,
        ]),
        &["action"],
    )
    .expect("metric creation failed")
});

// Object-store work
pub static OBJECTS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_objects_deleted_total",
        "Total objects confirmed deleted by bulk jobs",
    )
    .expect("metric creation failed")
});

pub static DELETE_RETRIES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_delete_retries_total",
        "Total delete calls retried after a transient error or refused keys",
    )
    .expect("metric creation failed")
});

// Access control
pub static AUTHORIZATION_DENIED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_authorization_denied_total",
        "Total requests rejected by the permission resolver or task ownership checks",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests and embedders may call it freely.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(TASKS_SUBMITTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TASKS_FINISHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TASKS_ACTIVE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TASKS_PANICKED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TASK_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OBJECTS_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DELETE_RETRIES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(AUTHORIZATION_DENIED.clone()))
            .expect("metric registration failed");
    });
}

/// Render every registered metric in the text exposition format.
pub fn gather_metrics() -> ServiceResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ServiceError::Internal(format!("failed to encode metrics: {e}")))?;
    String::from_utf8(buffer)
        .map_err(|e| ServiceError::Internal(format!("metrics are not valid UTF-8: {e}")))
}

/// Record a finished task.
pub fn record_task_finished(action: &str, status: &str, seconds: f64) {
    TASKS_FINISHED.with_label_values(&[action, status]).inc();
    TASK_DURATION.with_label_values(&[action]).observe(seconds);
}

/// Job events forwarded to the process metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsEvents;

impl JobEvents for MetricsEvents {
    fn objects_deleted(&self, count: u64) {
        OBJECTS_DELETED.inc_by(count);
    }

    fn delete_retried(&self) {
        DELETE_RETRIES.inc();
    }
}
