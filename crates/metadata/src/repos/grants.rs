//! Permission grant repository.

use crate::error::MetadataResult;
use crate::models::{BucketGrantRow, StorageGrantRow};
use async_trait::async_trait;
use stowage_core::{PermissionLevel, StorageId, UserId};

/// Repository for storage-level and bucket-level grants.
///
/// At most one storage grant exists per (user, storage) pair and at most one
/// bucket grant per (user, storage, bucket) triple. Setting a grant that
/// already exists replaces its level.
#[async_trait]
pub trait GrantRepo: Send + Sync {
    /// Get the storage-level grant, if one was stored.
    async fn get_storage_grant(
        &self,
        user_id: UserId,
        storage_id: StorageId,
    ) -> MetadataResult<Option<PermissionLevel>>;

    /// Get the bucket-level override, if one was stored.
    async fn get_bucket_grant(
        &self,
        user_id: UserId,
        storage_id: StorageId,
        bucket_name: &str,
    ) -> MetadataResult<Option<PermissionLevel>>;

    /// All storage-level grants held by a user.
    async fn list_storage_grants(&self, user_id: UserId) -> MetadataResult<Vec<StorageGrantRow>>;

    /// All bucket overrides a user holds on one storage.
    async fn list_bucket_grants(
        &self,
        user_id: UserId,
        storage_id: StorageId,
    ) -> MetadataResult<Vec<BucketGrantRow>>;

    /// Create or replace a storage-level grant.
    async fn set_storage_grant(
        &self,
        user_id: UserId,
        storage_id: StorageId,
        level: PermissionLevel,
    ) -> MetadataResult<()>;

    /// Create or replace a bucket-level override.
    async fn set_bucket_grant(
        &self,
        user_id: UserId,
        storage_id: StorageId,
        bucket_name: &str,
        level: PermissionLevel,
    ) -> MetadataResult<()>;

    /// Remove a bucket override so the bucket inherits the storage default again.
    async fn remove_bucket_grant(
        &self,
        user_id: UserId,
        storage_id: StorageId,
        bucket_name: &str,
    ) -> MetadataResult<bool>;

    /// Delete every grant that references a storage (cascade cleanup).
    async fn delete_grants_for_storage(&self, storage_id: StorageId) -> MetadataResult<u64>;

    /// Delete every grant held by a user (cascade cleanup).
    async fn delete_grants_for_user(&self, user_id: UserId) -> MetadataResult<u64>;
}
