//! Engine test utilities.

use super::fixtures::seed;
use super::storage::SharedClientFactory;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::config::{AppConfig, JobsConfig, ProgressConfig};
use stowage_core::{TaskId, TaskType};
use stowage_metadata::{MemoryMetadataStore, MetadataStore};
use stowage_server::AppState;
use stowage_storage::{MemoryObjectClient, ObjectClient};
use stowage_tasks::{JobContext, MemoryProgressStore, RetryPolicy, TaskTracker};

/// A fully wired engine over in-memory collaborators.
#[allow(dead_code)]
pub struct TestEngine {
    pub state: AppState,
    pub client: Arc<MemoryObjectClient>,
    pub factory: Arc<SharedClientFactory>,
}

#[allow(dead_code)]
impl TestEngine {
    pub async fn new() -> Self {
        Self::with_config(AppConfig::for_testing()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(MemoryMetadataStore::from_seed(&seed()).expect("seed is valid"));
        let client = Arc::new(MemoryObjectClient::new());
        let factory = Arc::new(SharedClientFactory::new(client.clone()));
        let state = AppState::new(
            config,
            metadata,
            Arc::new(MemoryProgressStore::new()),
            factory.clone(),
        )
        .expect("test config is valid");

        Self {
            state,
            client,
            factory,
        }
    }
}

/// A tracker over a fresh memory store.
#[allow(dead_code)]
pub fn tracker() -> Arc<TaskTracker> {
    Arc::new(TaskTracker::new(
        Arc::new(MemoryProgressStore::new()),
        &ProgressConfig::default(),
    ))
}

/// Create a pending record and the job context for it.
#[allow(dead_code)]
pub async fn job_context(tracker: &Arc<TaskTracker>, client: Arc<dyn ObjectClient>) -> JobContext {
    let task_id = TaskId::new();
    tracker
        .create(task_id.clone(), TaskType::Background, Default::default())
        .await
        .expect("record created");
    JobContext::new(
        task_id,
        tracker.clone(),
        client,
        JobsConfig::default(),
        RetryPolicy::new(3, Duration::ZERO),
    )
}
