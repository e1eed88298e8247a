//! Object clients and factories for driving the engine without a network.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use stowage_core::ConnectionParams;
use stowage_storage::error::StorageResult;
use stowage_storage::{
    BucketInfo, ByteStream, ClientFactory, ContinuationToken, DeleteReport, ListingPage,
    MemoryObjectClient, ObjectClient, ObjectMeta,
};
use tokio::sync::Semaphore;

/// Hands out the same client for every connection and counts connects.
#[allow(dead_code)]
pub struct SharedClientFactory {
    client: Arc<dyn ObjectClient>,
    connects: AtomicUsize,
}

#[allow(dead_code)]
impl SharedClientFactory {
    pub fn new(client: Arc<dyn ObjectClient>) -> Self {
        Self {
            client,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for SharedClientFactory {
    async fn connect(&self, params: &ConnectionParams) -> StorageResult<Arc<dyn ObjectClient>> {
        params
            .validate()
            .map_err(stowage_storage::StorageError::Config)?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.client))
    }
}

/// What listing does in a [`FaultyClient`].
#[allow(dead_code)]
pub enum ListBehavior {
    Panic,
    /// Never returns.
    Hang,
    /// Waits for a permit, then lists normally.
    Gate(Arc<Semaphore>),
}

/// Memory client whose listing misbehaves.
#[allow(dead_code)]
pub struct FaultyClient {
    pub inner: MemoryObjectClient,
    behavior: ListBehavior,
}

#[allow(dead_code)]
impl FaultyClient {
    pub fn new(behavior: ListBehavior) -> Self {
        Self {
            inner: MemoryObjectClient::new(),
            behavior,
        }
    }
}

#[async_trait]
impl ObjectClient for FaultyClient {
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
        match &self.behavior {
            ListBehavior::Panic => panic!("listing exploded"),
            ListBehavior::Hang => std::future::pending().await,
            ListBehavior::Gate(gate) => {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
                self.inner
                    .list_objects(bucket, prefix, token, max_keys)
                    .await
            }
        }
    }

    async fn delete_batch(&self, bucket: &str, keys: &[String]) -> StorageResult<DeleteReport> {
        self.inner.delete_batch(bucket, keys).await
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
        "faulty"
    }
}
