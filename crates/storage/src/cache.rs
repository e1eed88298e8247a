//! Connection cache: one reusable client per storage configuration.
//!
//! Handles are created lazily and exactly once per cache key. Construction
//! runs under the cache lock so concurrent first callers never build
//! duplicate clients; once built, a handle is shared without locking.

use crate::backends::s3::S3Client;
use crate::error::{StorageError, StorageResult};
use crate::fingerprint;
use crate::region;
use crate::traits::ObjectClient;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use stowage_core::{ConnectionParams, StorageId};
use stowage_metadata::StorageConfigRepo;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::instrument;

/// Builds object clients for connection parameters.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> StorageResult<Arc<dyn ObjectClient>>;
}

/// Factory producing AWS SDK clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct S3ClientFactory;

#[async_trait]
impl ClientFactory for S3ClientFactory {
    async fn connect(&self, params: &ConnectionParams) -> StorageResult<Arc<dyn ObjectClient>> {
        Ok(Arc::new(S3Client::new(params)?))
    }
}

/// A cached client bound to one set of credentials and one endpoint.
pub struct ConnectionHandle {
    key: String,
    region: String,
    client: Arc<dyn ObjectClient>,
    created_at: OffsetDateTime,
    closed: AtomicBool,
}

impl ConnectionHandle {
    fn new(key: String, region: String, client: Arc<dyn ObjectClient>) -> Self {
        Self {
            key,
            region,
            client,
            created_at: OffsetDateTime::now_utc(),
            closed: AtomicBool::new(false),
        }
    }

    /// Cache key this handle was stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Region requests are signed for.
    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn client(&self) -> Arc<dyn ObjectClient> {
        Arc::clone(&self.client)
    }

    /// Mark the handle closed. Callers still holding it may finish in-flight
    /// work; the cache never hands it out again.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// List buckets and report the failure as a message.
    ///
    /// Returns the number of visible buckets on success.
    pub async fn test_connection(&self) -> Result<usize, String> {
        self.client
            .list_buckets()
            .await
            .map(|buckets| buckets.len())
            .map_err(|e| e.to_string())
    }
}

impl std::ops::Deref for ConnectionHandle {
    type Target = dyn ObjectClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("key", &self.key)
            .field("region", &self.region)
            .field("backend", &self.client.backend_name())
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Snapshot of the cache contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub cached_clients: usize,
    /// Cache keys in sorted order.
    pub cache_keys: Vec<String>,
}

/// Cache of connection handles keyed by configuration id or parameter
/// fingerprint.
pub struct ConnectionCache {
    configs: Arc<dyn StorageConfigRepo>,
    factory: Arc<dyn ClientFactory>,
    clients: Mutex<HashMap<String, Arc<ConnectionHandle>>>,
}

impl ConnectionCache {
    pub fn new(configs: Arc<dyn StorageConfigRepo>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            configs,
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Cache backed by AWS SDK clients.
    pub fn with_s3(configs: Arc<dyn StorageConfigRepo>) -> Self {
        Self::new(configs, Arc::new(S3ClientFactory))
    }

    /// Get the handle for a persisted storage configuration.
    ///
    /// Missing and inactive configurations are rejected before any client is
    /// built. The lookup happens under the cache lock so a concurrent
    /// invalidation cannot be followed by a handle built from stale
    /// parameters.
    #[instrument(skip(self), fields(storage_id = %storage_id))]
    pub async fn get(&self, storage_id: StorageId) -> StorageResult<Arc<ConnectionHandle>> {
        let key = fingerprint::config_key(storage_id);
        let mut clients = self.clients.lock().await;

        if let Some(handle) = clients.get(&key) {
            tracing::debug!(cache_key = %key, "Connection cache hit");
            return Ok(Arc::clone(handle));
        }

        let record = self
            .configs
            .get_storage_config(storage_id)
            .await?
            .ok_or_else(|| StorageError::Config(format!("storage config {storage_id} not found")))?;
        if !record.is_active {
            return Err(StorageError::Config(format!(
                "storage config {storage_id} is inactive"
            )));
        }

        let handle = self.build(key.clone(), &record.params).await?;
        clients.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Get a handle for connection parameters that may not be persisted yet.
    ///
    /// Keyed by a fingerprint of every parameter, so candidate credentials
    /// tried in sequence never share a client.
    #[instrument(skip(self, params), fields(endpoint = ?params.endpoint))]
    pub async fn get_for_params(
        &self,
        params: &ConnectionParams,
    ) -> StorageResult<Arc<ConnectionHandle>> {
        params.validate().map_err(StorageError::Config)?;
        let key = fingerprint::params_key(params);
        let mut clients = self.clients.lock().await;

        if let Some(handle) = clients.get(&key) {
            tracing::debug!(cache_key = %key, "Connection cache hit");
            return Ok(Arc::clone(handle));
        }

        let handle = self.build(key.clone(), params).await?;
        clients.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    async fn build(
        &self,
        key: String,
        params: &ConnectionParams,
    ) -> StorageResult<Arc<ConnectionHandle>> {
        let region = region::effective_region(params.endpoint.as_deref(), &params.region);
        let client = self.factory.connect(params).await?;
        tracing::info!(
            cache_key = %key,
            region = %region,
            backend = client.backend_name(),
            "Created storage client"
        );
        Ok(Arc::new(ConnectionHandle::new(key, region, client)))
    }

    /// Close and evict the handle for `storage_id`. Returns whether an entry
    /// existed.
    #[instrument(skip(self), fields(storage_id = %storage_id))]
    pub async fn invalidate(&self, storage_id: StorageId) -> bool {
        let key = fingerprint::config_key(storage_id);
        let removed = self.clients.lock().await.remove(&key);
        match removed {
            Some(handle) => {
                handle.close();
                tracing::info!(cache_key = %key, "Invalidated storage client");
                true
            }
            None => false,
        }
    }

    /// Close and evict every handle. Returns how many were evicted.
    pub async fn clear(&self) -> usize {
        let drained: Vec<_> = self.clients.lock().await.drain().collect();
        for (_, handle) in &drained {
            handle.close();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Cleared connection cache");
        }
        drained.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let clients = self.clients.lock().await;
        let mut cache_keys: Vec<String> = clients.keys().cloned().collect();
        cache_keys.sort();
        CacheStats {
            cached_clients: clients.len(),
            cache_keys,
        }
    }
}

impl std::fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCache").finish_non_exhaustive()
    }
}
