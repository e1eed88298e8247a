//! User repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use stowage_core::{User, UserId};

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn get_user(&self, user_id: UserId) -> MetadataResult<Option<User>>;

    /// Find a user by username.
    async fn get_user_by_name(&self, username: &str) -> MetadataResult<Option<User>>;

    async fn upsert_user(&self, user: User) -> MetadataResult<()>;
}
