//! Metadata collaborators for the stowage engine.
//!
//! This crate provides the lookups the engine consumes from the relational
//! layer that owns users, storage configurations and permission grants:
//! - Grant lookups for the permission resolver
//! - Storage configuration lookups for the connection cache
//! - An in-memory implementation seeded from configuration

pub mod error;
pub mod memory;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use memory::MemoryMetadataStore;
pub use repos::{GrantRepo, StorageConfigRepo, UserRepo};
pub use store::MetadataStore;

use std::sync::Arc;
use stowage_core::config::SeedConfig;

/// Create a metadata store from the configuration seed.
pub fn from_seed(seed: &SeedConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    let store = MemoryMetadataStore::from_seed(seed)?;
    Ok(Arc::new(store) as Arc<dyn MetadataStore>)
}
