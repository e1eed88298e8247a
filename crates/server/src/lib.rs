//! Access-controlled task service for the stowage engine.
//!
//! This crate ties the engine together:
//! - The permission resolver gating every request
//! - The task service starting, observing and cancelling bulk jobs
//! - The worker pool executing jobs with panic and time-limit isolation
//! - Prometheus metrics

pub mod access;
pub mod error;
pub mod metrics;
pub mod service;
pub mod state;
pub mod worker;

pub use access::{PermissionResolver, StorageScope};
pub use error::{ServiceError, ServiceResult};
pub use service::{CancelResponse, ConnectionReport, StartResponse, StartedTask, TaskService};
pub use state::AppState;
pub use worker::{TaskHandle, WorkerPool};
