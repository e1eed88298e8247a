//! Permission resolver.
//!
//! Every check is recomputed from the grant tables on each call. Nothing is
//! cached, so a grant change applies to the very next request.

use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use stowage_core::{PermissionLevel, StorageId, User, resolve_level};
use stowage_metadata::GrantRepo;
use tracing::instrument;

/// Storages a user may see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageScope {
    /// Every storage. Only admins get this.
    All,
    /// Exactly these storages. May be empty.
    Only(BTreeSet<StorageId>),
}

impl StorageScope {
    pub fn contains(&self, storage_id: StorageId) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(&storage_id),
        }
    }
}

/// Resolves effective permissions from the admin flag, storage grants and
/// bucket overrides.
#[derive(Clone)]
pub struct PermissionResolver {
    grants: Arc<dyn GrantRepo>,
}

impl PermissionResolver {
    pub fn new(grants: Arc<dyn GrantRepo>) -> Self {
        Self { grants }
    }

    /// Effective permission on a storage, or on one bucket of it.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn effective_permission(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket: Option<&str>,
    ) -> ServiceResult<PermissionLevel> {
        if user.is_admin {
            return Ok(PermissionLevel::ReadWrite);
        }

        let storage_grant = self.grants.get_storage_grant(user.id, storage_id).await?;
        let storage_level = resolve_level(false, storage_grant, None);
        let Some(bucket) = bucket else {
            return Ok(storage_level);
        };
        if !storage_level.can_access() {
            // Overrides are inert behind a closed storage.
            return Ok(PermissionLevel::None);
        }

        let bucket_override = self
            .grants
            .get_bucket_grant(user.id, storage_id, bucket)
            .await?;
        Ok(resolve_level(false, storage_grant, bucket_override))
    }

    /// Storage-level effective permission.
    pub async fn storage_permission(
        &self,
        user: &User,
        storage_id: StorageId,
    ) -> ServiceResult<PermissionLevel> {
        self.effective_permission(user, storage_id, None).await
    }

    pub async fn can_access_storage(&self, user: &User, storage_id: StorageId) -> ServiceResult<bool> {
        Ok(self.storage_permission(user, storage_id).await?.can_access())
    }

    pub async fn can_read_storage(&self, user: &User, storage_id: StorageId) -> ServiceResult<bool> {
        Ok(self.storage_permission(user, storage_id).await?.can_read())
    }

    pub async fn can_write_storage(&self, user: &User, storage_id: StorageId) -> ServiceResult<bool> {
        Ok(self.storage_permission(user, storage_id).await?.can_write())
    }

    pub async fn can_access_bucket(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket: &str,
    ) -> ServiceResult<bool> {
        Ok(self
            .effective_permission(user, storage_id, Some(bucket))
            .await?
            .can_access())
    }

    pub async fn can_read_bucket(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket: &str,
    ) -> ServiceResult<bool> {
        Ok(self
            .effective_permission(user, storage_id, Some(bucket))
            .await?
            .can_read())
    }

    pub async fn can_write_bucket(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket: &str,
    ) -> ServiceResult<bool> {
        Ok(self
            .effective_permission(user, storage_id, Some(bucket))
            .await?
            .can_write())
    }

    pub async fn require_storage_access(&self, user: &User, storage_id: StorageId) -> ServiceResult<()> {
        self.require(user, storage_id, None, None).await
    }

    pub async fn require_storage_read(&self, user: &User, storage_id: StorageId) -> ServiceResult<()> {
        self.require(user, storage_id, None, Some(PermissionLevel::Read))
            .await
    }

    pub async fn require_storage_write(&self, user: &User, storage_id: StorageId) -> ServiceResult<()> {
        self.require(user, storage_id, None, Some(PermissionLevel::ReadWrite))
            .await
    }

    pub async fn require_bucket_access(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket: &str,
    ) -> ServiceResult<()> {
        self.require(user, storage_id, Some(bucket), None).await
    }

    pub async fn require_bucket_read(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket: &str,
    ) -> ServiceResult<()> {
        self.require(user, storage_id, Some(bucket), Some(PermissionLevel::Read))
            .await
    }

    pub async fn require_bucket_write(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket: &str,
    ) -> ServiceResult<()> {
        self.require(user, storage_id, Some(bucket), Some(PermissionLevel::ReadWrite))
            .await
    }

    async fn require(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket: Option<&str>,
        minimum: Option<PermissionLevel>,
    ) -> ServiceResult<()> {
        let level = self.effective_permission(user, storage_id, bucket).await?;
        if level.meets_minimum(minimum) {
            return Ok(());
        }

        let kind = match minimum {
            Some(PermissionLevel::ReadWrite) => "Write access",
            Some(PermissionLevel::Read) => "Read access",
            Some(PermissionLevel::None) | None => "Access",
        };
        let target = match bucket {
            Some(bucket) => format!("bucket '{bucket}'"),
            None => format!("storage {storage_id}"),
        };
        metrics::AUTHORIZATION_DENIED.inc();
        tracing::debug!(
            user_id = %user.id,
            storage_id = %storage_id,
            level = %level,
            "Access denied"
        );
        Err(ServiceError::Forbidden(format!("{kind} denied to {target}")))
    }

    /// Filter a storage's bucket names down to those the user can see.
    ///
    /// Uses the same precedence as [`Self::effective_permission`]: nothing is
    /// visible behind a closed storage, and an explicit `none` override hides
    /// its bucket.
    #[instrument(skip(self, user, bucket_names), fields(user_id = %user.id))]
    pub async fn visible_buckets<I, S>(
        &self,
        user: &User,
        storage_id: StorageId,
        bucket_names: I,
    ) -> ServiceResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = bucket_names.into_iter().map(Into::into);
        if user.is_admin {
            return Ok(names.collect());
        }

        let storage_grant = self.grants.get_storage_grant(user.id, storage_id).await?;
        if !resolve_level(false, storage_grant, None).can_access() {
            return Ok(Vec::new());
        }

        let overrides: HashMap<String, PermissionLevel> = self
            .grants
            .list_bucket_grants(user.id, storage_id)
            .await?
            .into_iter()
            .map(|grant| (grant.bucket_name, grant.level))
            .collect();

        Ok(names
            .filter(|name| {
                resolve_level(false, storage_grant, overrides.get(name).copied()).can_access()
            })
            .collect())
    }

    /// Storages the user holds at least `minimum` on. Admins get
    /// [`StorageScope::All`].
    pub async fn allowed_storage_ids(
        &self,
        user: &User,
        minimum: Option<PermissionLevel>,
    ) -> ServiceResult<StorageScope> {
        if user.is_admin {
            return Ok(StorageScope::All);
        }

        let ids = self
            .grants
            .list_storage_grants(user.id)
            .await?
            .into_iter()
            .filter(|grant| grant.level.meets_minimum(minimum))
            .map(|grant| grant.storage_id)
            .collect();
        Ok(StorageScope::Only(ids))
    }

    /// Storage-level grants other than `none`. Empty for admins.
    pub async fn storage_permission_map(
        &self,
        user: &User,
    ) -> ServiceResult<BTreeMap<StorageId, PermissionLevel>> {
        if user.is_admin {
            return Ok(BTreeMap::new());
        }

        Ok(self
            .grants
            .list_storage_grants(user.id)
            .await?
            .into_iter()
            .filter(|grant| grant.level.can_access())
            .map(|grant| (grant.storage_id, grant.level))
            .collect())
    }

    /// Explicit bucket overrides on one storage. Empty for admins.
    pub async fn bucket_permission_map(
        &self,
        user: &User,
        storage_id: StorageId,
    ) -> ServiceResult<BTreeMap<String, PermissionLevel>> {
        if user.is_admin {
            return Ok(BTreeMap::new());
        }

        Ok(self
            .grants
            .list_bucket_grants(user.id, storage_id)
            .await?
            .into_iter()
            .map(|grant| (grant.bucket_name, grant.level))
            .collect())
    }
}

impl std::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::{ConnectionParams, StorageConfigRecord};
    use stowage_metadata::{MemoryMetadataStore, StorageConfigRepo, UserRepo};

    const S: StorageId = StorageId(1);

    async fn resolver_with(
        grants: &[(Option<&str>, PermissionLevel)],
    ) -> (PermissionResolver, User) {
        let store = Arc::new(MemoryMetadataStore::new());
        let user = User::new(10, "alice");
        store.upsert_user(user.clone()).await.unwrap();
        store
            .upsert_storage_config(StorageConfigRecord::new(1, "primary", ConnectionParams::default()))
            .await
            .unwrap();
        for (bucket, level) in grants {
            match bucket {
                Some(bucket) => store
                    .set_bucket_grant(user.id, S, bucket, *level)
                    .await
                    .unwrap(),
                None => store.set_storage_grant(user.id, S, *level).await.unwrap(),
            }
        }
        (PermissionResolver::new(store), user)
    }

    #[tokio::test]
    async fn test_override_grants_more_than_storage_default() {
        let (resolver, user) = resolver_with(&[
            (None, PermissionLevel::Read),
            (Some("b1"), PermissionLevel::ReadWrite),
        ])
        .await;

        assert_eq!(
            resolver.effective_permission(&user, S, Some("b1")).await.unwrap(),
            PermissionLevel::ReadWrite
        );
        assert_eq!(
            resolver.effective_permission(&user, S, Some("b2")).await.unwrap(),
            PermissionLevel::Read
        );
    }

    #[tokio::test]
    async fn test_closed_storage_ignores_overrides() {
        let (resolver, user) =
            resolver_with(&[(Some("b1"), PermissionLevel::ReadWrite)]).await;

        assert_eq!(
            resolver.effective_permission(&user, S, Some("b1")).await.unwrap(),
            PermissionLevel::None
        );
        assert!(
            resolver
                .visible_buckets(&user, S, ["b1", "b2"])
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_require_messages() {
        let (resolver, user) = resolver_with(&[(None, PermissionLevel::Read)]).await;

        resolver.require_bucket_read(&user, S, "b1").await.unwrap();
        let err = resolver
            .require_bucket_write(&user, S, "b1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
        assert!(err.to_string().contains("Write access denied to bucket 'b1'"));

        let err = resolver
            .require_storage_access(&user, StorageId(2))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Access denied to storage 2"));
    }
}
