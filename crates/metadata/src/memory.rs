//! In-memory metadata store.
//!
//! Used by the daemon when grants and storage configurations come from the
//! configuration seed, and by tests that need a metadata collaborator.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{BucketGrantRow, StorageGrantRow};
use crate::repos::{GrantRepo, StorageConfigRepo, UserRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use stowage_core::config::SeedConfig;
use stowage_core::{PermissionLevel, StorageConfigRecord, StorageId, User, UserId};
use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    users: BTreeMap<UserId, User>,
    storages: BTreeMap<StorageId, StorageConfigRecord>,
    storage_grants: HashMap<(UserId, StorageId), StorageGrantRow>,
    bucket_grants: HashMap<(UserId, StorageId, String), BucketGrantRow>,
}

/// Metadata store backed by process memory.
#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: RwLock<Inner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated from a configuration seed.
    pub fn from_seed(seed: &SeedConfig) -> MetadataResult<Self> {
        seed.validate().map_err(MetadataError::Config)?;

        let now = OffsetDateTime::now_utc();
        let mut inner = Inner::default();
        for user in &seed.users {
            inner.users.insert(user.id, user.clone());
        }
        for storage in &seed.storages {
            inner.storages.insert(storage.id, storage.clone());
        }
        for grant in &seed.grants {
            match &grant.bucket {
                Some(bucket) => {
                    inner.bucket_grants.insert(
                        (grant.user_id, grant.storage_id, bucket.clone()),
                        BucketGrantRow {
                            user_id: grant.user_id,
                            storage_id: grant.storage_id,
                            bucket_name: bucket.clone(),
                            level: grant.level,
                            updated_at: now,
                        },
                    );
                }
                None => {
                    inner.storage_grants.insert(
                        (grant.user_id, grant.storage_id),
                        StorageGrantRow {
                            user_id: grant.user_id,
                            storage_id: grant.storage_id,
                            level: grant.level,
                            updated_at: now,
                        },
                    );
                }
            }
        }

        tracing::debug!(
            users = inner.users.len(),
            storages = inner.storages.len(),
            storage_grants = inner.storage_grants.len(),
            bucket_grants = inner.bucket_grants.len(),
            "Loaded metadata seed"
        );

        Ok(Self {
            inner: RwLock::new(inner),
        })
    }
}

#[async_trait]
impl GrantRepo for MemoryMetadataStore {
    async fn get_storage_grant(
        &self,
        user_id: UserId,
        storage_id: StorageId,
    ) -> MetadataResult<Option<PermissionLevel>> {
        let inner = self.inner.read().await;
        Ok(inner
            .storage_grants
            .get(&(user_id, storage_id))
            .map(|row| row.level))
    }

    async fn get_bucket_grant(
        &self,
        user_id: UserId,
        storage_id: StorageId,
        bucket_name: &str,
    ) -> MetadataResult<Option<PermissionLevel>> {
        let inner = self.inner.read().await;
        Ok(inner
            .bucket_grants
            .get(&(user_id, storage_id, bucket_name.to_string()))
            .map(|row| row.level))
    }

    async fn list_storage_grants(&self, user_id: UserId) -> MetadataResult<Vec<StorageGrantRow>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<_> = inner
            .storage_grants
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.storage_id);
        Ok(rows)
    }

    async fn list_bucket_grants(
        &self,
        user_id: UserId,
        storage_id: StorageId,
    ) -> MetadataResult<Vec<BucketGrantRow>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<_> = inner
            .bucket_grants
            .values()
            .filter(|row| row.user_id == user_id && row.storage_id == storage_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.bucket_name.cmp(&b.bucket_name));
        Ok(rows)
    }

    async fn set_storage_grant(
        &self,
        user_id: UserId,
        storage_id: StorageId,
        level: PermissionLevel,
    ) -> MetadataResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user_id) {
            return Err(MetadataError::NotFound(format!("user {user_id}")));
        }
        if !inner.storages.contains_key(&storage_id) {
            return Err(MetadataError::NotFound(format!("storage config {storage_id}")));
        }
        inner.storage_grants.insert(
            (user_id, storage_id),
            StorageGrantRow {
                user_id,
                storage_id,
                level,
                updated_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(())
    }

    async fn set_bucket_grant(
        &self,
        user_id: UserId,
        storage_id: StorageId,
        bucket_name: &str,
        level: PermissionLevel,
    ) -> MetadataResult<()> {
        if bucket_name.is_empty() {
            return Err(MetadataError::Constraint(
                "bucket grant requires a bucket name".to_string(),
            ));
        }
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user_id) {
            return Err(MetadataError::NotFound(format!("user {user_id}")));
        }
        if !inner.storages.contains_key(&storage_id) {
            return Err(MetadataError::NotFound(format!("storage config {storage_id}")));
        }
        inner.bucket_grants.insert(
            (user_id, storage_id, bucket_name.to_string()),
            BucketGrantRow {
                user_id,
                storage_id,
                bucket_name: bucket_name.to_string(),
                level,
                updated_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(())
    }

    async fn remove_bucket_grant(
        &self,
        user_id: UserId,
        storage_id: StorageId,
        bucket_name: &str,
    ) -> MetadataResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .bucket_grants
            .remove(&(user_id, storage_id, bucket_name.to_string()))
            .is_some())
    }

    async fn delete_grants_for_storage(&self, storage_id: StorageId) -> MetadataResult<u64> {
        let mut inner = self.inner.write().await;
        Ok(remove_grants(&mut inner, |_, storage| storage == storage_id))
    }

    async fn delete_grants_for_user(&self, user_id: UserId) -> MetadataResult<u64> {
        let mut inner = self.inner.write().await;
        Ok(remove_grants(&mut inner, |user, _| user == user_id))
    }
}

fn remove_grants(inner: &mut Inner, matches: impl Fn(UserId, StorageId) -> bool) -> u64 {
    let before = inner.storage_grants.len() + inner.bucket_grants.len();
    inner
        .storage_grants
        .retain(|(user, storage), _| !matches(*user, *storage));
    inner
        .bucket_grants
        .retain(|(user, storage, _), _| !matches(*user, *storage));
    let after = inner.storage_grants.len() + inner.bucket_grants.len();
    (before - after) as u64
}

#[async_trait]
impl StorageConfigRepo for MemoryMetadataStore {
    async fn get_storage_config(
        &self,
        storage_id: StorageId,
    ) -> MetadataResult<Option<StorageConfigRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.storages.get(&storage_id).cloned())
    }

    async fn list_storage_configs(&self) -> MetadataResult<Vec<StorageConfigRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.storages.values().cloned().collect())
    }

    async fn upsert_storage_config(
        &self,
        record: StorageConfigRecord,
    ) -> MetadataResult<Option<StorageConfigRecord>> {
        record
            .params
            .validate()
            .map_err(MetadataError::Constraint)?;
        let mut inner = self.inner.write().await;
        Ok(inner.storages.insert(record.id, record))
    }

    async fn delete_storage_config(
        &self,
        storage_id: StorageId,
    ) -> MetadataResult<Option<StorageConfigRecord>> {
        let mut inner = self.inner.write().await;
        let removed = inner.storages.remove(&storage_id);
        if removed.is_some() {
            let grants = remove_grants(&mut inner, |_, storage| storage == storage_id);
            tracing::debug!(storage_id = %storage_id, grants, "Cascaded storage config delete");
        }
        Ok(removed)
    }
}

#[async_trait]
impl UserRepo for MemoryMetadataStore {
    async fn get_user(&self, user_id: UserId) -> MetadataResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(&user_id).cloned())
    }

    async fn get_user_by_name(&self, username: &str) -> MetadataResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn upsert_user(&self, user: User) -> MetadataResult<()> {
        let mut inner = self.inner.write().await;
        inner.users.insert(user.id, user);
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn health_check(&self) -> MetadataResult<()> {
        Ok(())
    }
}
