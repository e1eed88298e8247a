//! Records held by the metadata collaborator.

use stowage_core::{PermissionLevel, StorageId, UserId};
use time::OffsetDateTime;

/// Storage-level grant: the default for every bucket of one storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageGrantRow {
    pub user_id: UserId,
    pub storage_id: StorageId,
    pub level: PermissionLevel,
    pub updated_at: OffsetDateTime,
}

/// Bucket-level grant: replaces the storage default for one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketGrantRow {
    pub user_id: UserId,
    pub storage_id: StorageId,
    pub bucket_name: String,
    pub level: PermissionLevel,
    pub updated_at: OffsetDateTime,
}
