//! Storage configuration repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use stowage_core::{StorageConfigRecord, StorageId};

/// Lookup and administration of storage configurations.
#[async_trait]
pub trait StorageConfigRepo: Send + Sync {
    /// Get a storage configuration by ID.
    async fn get_storage_config(
        &self,
        storage_id: StorageId,
    ) -> MetadataResult<Option<StorageConfigRecord>>;

    /// List all storage configurations, ordered by ID.
    async fn list_storage_configs(&self) -> MetadataResult<Vec<StorageConfigRecord>>;

    /// Insert or replace a configuration. Returns the previous record, if any.
    async fn upsert_storage_config(
        &self,
        record: StorageConfigRecord,
    ) -> MetadataResult<Option<StorageConfigRecord>>;

    /// Delete a configuration together with the grants that reference it.
    async fn delete_storage_config(
        &self,
        storage_id: StorageId,
    ) -> MetadataResult<Option<StorageConfigRecord>>;
}
