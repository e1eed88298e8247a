//! Metadata store trait.

use crate::error::MetadataResult;
use crate::repos::{GrantRepo, StorageConfigRepo, UserRepo};
use async_trait::async_trait;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: GrantRepo + StorageConfigRepo + UserRepo + Send + Sync {
    /// Check that the store is reachable.
    async fn health_check(&self) -> MetadataResult<()>;
}
