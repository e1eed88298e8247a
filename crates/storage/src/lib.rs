//! Object storage access for the stowage engine.
//!
//! This crate provides:
//! - The `ObjectClient` trait over S3-compatible listing, batch delete and bucket calls
//! - Backends: AWS SDK (any S3-compatible endpoint) and in-memory
//! - Region derivation for location-bearing endpoints
//! - The connection cache handing out one shared client per configuration

pub mod backends;
pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod region;
pub mod traits;

pub use backends::{memory::MemoryObjectClient, s3::S3Client};
pub use cache::{CacheStats, ClientFactory, ConnectionCache, ConnectionHandle, S3ClientFactory};
pub use error::{StorageError, StorageResult};
pub use traits::{
    BucketInfo, ByteStream, ContinuationToken, DeleteFailure, DeleteReport, ListingPage,
    MAX_DELETE_KEYS, ObjectClient, ObjectClientListExt, ObjectEntry, ObjectMeta, PageStream,
};
