//! Object client trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use time::OffsetDateTime;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// A boxed stream of listing pages.
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = StorageResult<ListingPage>> + Send + 'a>>;

/// Most keys one `delete_batch` call accepts.
pub const MAX_DELETE_KEYS: usize = 1000;

/// Page size used when a caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Maximum size for continuation tokens (2 KB).
pub const MAX_TOKEN_SIZE: usize = 2048;

/// An opaque continuation token for resuming a listing.
///
/// Provider tokens can encode internal state, so `Debug` never prints them.
#[derive(Clone, PartialEq, Eq)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Wrap a provider token.
    ///
    /// Returns an error if the token is empty or exceeds MAX_TOKEN_SIZE.
    pub fn new(token: impl Into<String>) -> StorageResult<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(StorageError::InvalidContinuationToken(
                "continuation token is empty".to_string(),
            ));
        }
        if token.len() > MAX_TOKEN_SIZE {
            return Err(StorageError::InvalidContinuationToken(format!(
                "continuation token too large: {} bytes (max: {})",
                token.len(),
                MAX_TOKEN_SIZE
            )));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ContinuationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContinuationToken")
            .field(&"<redacted>")
            .finish()
    }
}

/// One object in a listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
}

/// A single page of listing results.
#[derive(Clone, Debug)]
pub struct ListingPage {
    pub entries: Vec<ObjectEntry>,
    /// Whether more pages follow.
    pub is_truncated: bool,
    /// Token for the next page. `None` on the last page.
    pub next_token: Option<ContinuationToken>,
}

/// A per-key failure reported by a batch delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub code: String,
    pub message: String,
}

/// Outcome of one batch delete call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Keys the store confirmed as deleted.
    pub deleted: Vec<String>,
    /// Keys the store refused, with the reason.
    pub errors: Vec<DeleteFailure>,
}

/// A bucket visible to the client's credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub created_at: Option<OffsetDateTime>,
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// Client for one S3-compatible endpoint bound to one set of credentials.
///
/// Implementations are safe for concurrent use once constructed. They never
/// retry on their own; callers decide using [`StorageError::is_transient`].
#[async_trait]
pub trait ObjectClient: Send + Sync + 'static {
    /// List buckets visible to these credentials.
    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>>;

    /// Create a bucket.
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Delete an empty bucket. Fails with [`StorageError::BucketNotEmpty`]
    /// when objects remain.
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Fetch one page of objects.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<&ContinuationToken>,
        max_keys: usize,
    ) -> StorageResult<ListingPage>;

    /// Delete up to [`MAX_DELETE_KEYS`] keys in one call.
    async fn delete_batch(&self, bucket: &str, keys: &[String]) -> StorageResult<DeleteReport>;

    /// Get an object's metadata without fetching content.
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object as a byte stream.
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ByteStream>;

    /// Store an object.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()>;

    /// Get the name of this client's backend, for logs.
    fn backend_name(&self) -> &'static str;

    /// Verify the endpoint is reachable and the credentials are accepted.
    ///
    /// The default implementation lists buckets.
    async fn health_check(&self) -> StorageResult<()> {
        self.list_buckets().await.map(|_| ())
    }
}

/// Pagination helpers built on [`ObjectClient::list_objects`].
///
/// DO NOT IMPLEMENT THIS TRAIT MANUALLY. A blanket implementation covers
/// every `ObjectClient`, including `dyn ObjectClient`.
pub trait ObjectClientListExt: ObjectClient {
    /// Stream listing pages until the store reports no more results.
    fn list_pages<'a>(
        &'a self,
        bucket: &'a str,
        prefix: Option<&'a str>,
        page_size: usize,
    ) -> PageStream<'a> {
        let page_size = page_size.max(1);
        let stream = async_stream::try_stream! {
            let mut token: Option<ContinuationToken> = None;
            loop {
                let page = self
                    .list_objects(bucket, prefix, token.as_ref(), page_size)
                    .await?;
                let next = if page.is_truncated { page.next_token.clone() } else { None };
                let truncated_without_token = page.is_truncated && next.is_none();
                yield page;

                if truncated_without_token {
                    Err(StorageError::InvalidContinuationToken(format!(
                        "listing of bucket '{bucket}' was truncated without a continuation token"
                    )))?;
                }
                match next {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
        };
        Box::pin(stream)
    }
}

impl<T: ObjectClient + ?Sized> ObjectClientListExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_debug_redacted() {
        let token = ContinuationToken::new("secret-cursor").unwrap();
        assert_eq!(format!("{token:?}"), "ContinuationToken(\"<redacted>\")");
        assert_eq!(token.as_str(), "secret-cursor");
    }

    #[test]
    fn test_token_size_limits() {
        assert!(ContinuationToken::new("").is_err());
        assert!(ContinuationToken::new("a".repeat(MAX_TOKEN_SIZE + 1)).is_err());
        assert!(ContinuationToken::new("a".repeat(MAX_TOKEN_SIZE)).is_ok());
    }
}
