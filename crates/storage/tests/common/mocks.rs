use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use stowage_core::{ConnectionParams, StorageConfigRecord};
use stowage_metadata::{MemoryMetadataStore, StorageConfigRepo};
use stowage_storage::error::StorageResult;
use stowage_storage::{ClientFactory, MemoryObjectClient, ObjectClient};
use tokio::time::Duration;

/// Factory handing out fresh in-memory clients and counting constructions.
///
/// Each construction sleeps briefly so concurrent first callers overlap.
#[allow(dead_code)]
pub struct CountingFactory {
    pub connects: AtomicUsize,
    pub delay: Duration,
}

#[allow(dead_code)]
impl CountingFactory {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::from_millis(0))
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for CountingFactory {
    async fn connect(&self, _params: &ConnectionParams) -> StorageResult<Arc<dyn ObjectClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Arc::new(MemoryObjectClient::new()))
    }
}

/// Metadata store holding storage configs 1 (active) and 2 (inactive).
#[allow(dead_code)]
pub async fn seeded_configs() -> Arc<MemoryMetadataStore> {
    let store = Arc::new(MemoryMetadataStore::new());
    let active = StorageConfigRecord::new(
        1,
        "primary",
        ConnectionParams::new(Some("https://hel1.your-objectstorage.com".to_string()))
            .with_credentials("ak", "sk")
            .with_region("eu-central"),
    );
    let mut inactive = StorageConfigRecord::new(2, "retired", ConnectionParams::default());
    inactive.is_active = false;
    store.upsert_storage_config(active).await.unwrap();
    store.upsert_storage_config(inactive).await.unwrap();
    store
}
