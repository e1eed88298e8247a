use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde_json::Map;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use stowage_core::config::{JobsConfig, ProgressConfig};
use stowage_core::{TaskId, TaskType};
use stowage_storage::error::StorageResult;
use stowage_storage::{
    BucketInfo, ByteStream, ContinuationToken, DeleteReport, ListingPage, MemoryObjectClient,
    ObjectClient, ObjectMeta,
};
use stowage_tasks::{JobContext, JobEvents, MemoryProgressStore, RetryPolicy, TaskTracker};
use tokio::sync::Mutex;

type Hook = Arc<dyn Fn(usize) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps [`MemoryObjectClient`] and runs a hook after every delete_batch
/// call, with the 1-based call number. Listing can be slowed down.
#[allow(dead_code)]
pub struct InstrumentedClient {
    pub inner: MemoryObjectClient,
    calls: AtomicUsize,
    hook: Mutex<Option<Hook>>,
    list_delay: Mutex<Option<Duration>>,
}

#[allow(dead_code)]
impl InstrumentedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryObjectClient::new(),
            calls: AtomicUsize::new(0),
            hook: Mutex::new(None),
            list_delay: Mutex::new(None),
        })
    }

    /// Sleep for `delay` before every list_objects call.
    pub async fn slow_listing(&self, delay: Duration) {
        *self.list_delay.lock().await = Some(delay);
    }

    pub async fn on_delete_batch<F>(&self, hook: F)
    where
        F: Fn(usize) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        *self.hook.lock().await = Some(Arc::new(hook));
    }
}

#[async_trait]
impl ObjectClient for InstrumentedClient {
    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        self.inner.list_buckets().await
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.inner.create_bucket(bucket).await
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.inner.delete_bucket(bucket).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<&ContinuationToken>,
        max_keys: usize,
    ) -> StorageResult<ListingPage> {
        let delay = *self.list_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner
            .list_objects(bucket, prefix, token, max_keys)
            .await
    }

    async fn delete_batch(&self, bucket: &str, keys: &[String]) -> StorageResult<DeleteReport> {
        let result = self.inner.delete_batch(bucket, keys).await;
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let hook = self.hook.lock().await.clone();
        if let Some(hook) = hook {
            hook(call).await;
        }
        result
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head_object(bucket, key).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_object(bucket, key).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        self.inner.put_object(bucket, key, data, content_type).await
    }

    fn backend_name(&self) -> &'static str {
        "instrumented"
    }
}

/// Counts job events.
#[allow(dead_code)]
#[derive(Default)]
pub struct CountingEvents {
    pub deleted: AtomicU64,
    pub retries: AtomicU64,
}

impl JobEvents for CountingEvents {
    fn objects_deleted(&self, count: u64) {
        self.deleted.fetch_add(count, Ordering::SeqCst);
    }

    fn delete_retried(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
}

/// A tracker, an instrumented client and counting events wired together.
#[allow(dead_code)]
pub struct Harness {
    pub tracker: Arc<TaskTracker>,
    pub client: Arc<InstrumentedClient>,
    pub events: Arc<CountingEvents>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self {
            tracker: Arc::new(TaskTracker::new(
                Arc::new(MemoryProgressStore::new()),
                &ProgressConfig::default(),
            )),
            client: InstrumentedClient::new(),
            events: Arc::new(CountingEvents::default()),
        }
    }

    /// Create a pending record and the context a worker would build for it.
    pub async fn task(&self, task_type: TaskType) -> JobContext {
        let task_id = TaskId::new();
        self.tracker
            .create(task_id.clone(), task_type, Map::new())
            .await
            .unwrap();
        JobContext::new(
            task_id,
            self.tracker.clone(),
            self.client.clone(),
            JobsConfig::default(),
            RetryPolicy::new(3, Duration::ZERO),
        )
        .with_events(self.events.clone())
    }
}
