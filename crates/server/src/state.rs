//! Application state: every long-lived component, built once at startup
//! and torn down explicitly at shutdown.

use crate::access::PermissionResolver;
use crate::error::{ServiceError, ServiceResult};
use crate::service::TaskService;
use crate::worker::WorkerPool;
use std::sync::Arc;
use stowage_core::config::AppConfig;
use stowage_metadata::MetadataStore;
use stowage_storage::{ClientFactory, ConnectionCache};
use stowage_tasks::{ProgressStore, RetryPolicy, TaskTracker};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Users, storage configurations and grants.
    pub metadata: Arc<dyn MetadataStore>,
    pub cache: Arc<ConnectionCache>,
    pub tracker: Arc<TaskTracker>,
    pub pool: Arc<WorkerPool>,
    pub service: Arc<TaskService>,
}

impl AppState {
    /// Wire the components together and start the worker pool.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        progress: Arc<dyn ProgressStore>,
        factory: Arc<dyn ClientFactory>,
    ) -> ServiceResult<Self> {
        config.validate().map_err(ServiceError::Configuration)?;

        let cache = Arc::new(ConnectionCache::new(metadata.clone(), factory));
        let tracker = Arc::new(TaskTracker::new(progress, &config.progress));
        let pool = Arc::new(WorkerPool::new(Arc::clone(&tracker), &config.worker));
        let service = Arc::new(TaskService::new(
            PermissionResolver::new(metadata.clone()),
            metadata.clone(),
            Arc::clone(&cache),
            Arc::clone(&tracker),
            Arc::clone(&pool),
            config.jobs.clone(),
            RetryPolicy::from(&config.retry),
        ));

        Ok(Self {
            config: Arc::new(config),
            metadata,
            cache,
            tracker,
            pool,
            service,
        })
    }

    /// Drain the worker pool, then close every cached connection.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        let closed = self.cache.clear().await;
        tracing::info!(closed, "Shutdown complete");
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("progress_store", &self.tracker.store().backend_name())
            .finish_non_exhaustive()
    }
}
