//! In-memory object client.
//!
//! Behaves like an S3-compatible endpoint for listing, batch deletion and
//! bucket deletion, and stands in for a real endpoint in tests.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    BucketInfo, ByteStream, ContinuationToken, DeleteFailure, DeleteReport, ListingPage,
    MAX_DELETE_KEYS, ObjectClient, ObjectEntry, ObjectMeta,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    last_modified: OffsetDateTime,
}

#[derive(Debug)]
struct Bucket {
    created_at: OffsetDateTime,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Whole delete_batch calls that fail with a transient error.
    delete_call_failures: usize,
    /// Keys that are refused by delete_batch, with remaining refusal count.
    key_failures: HashMap<String, usize>,
    /// Whole list_objects calls that fail with a transient error.
    list_call_failures: usize,
    /// Make every call fail with AccessDenied.
    deny_all: bool,
}

/// In-memory S3-compatible client with call counters and injectable faults.
#[derive(Debug, Default)]
pub struct MemoryObjectClient {
    buckets: RwLock<BTreeMap<String, Bucket>>,
    faults: RwLock<Faults>,
    list_calls: AtomicUsize,
    delete_batch_calls: AtomicUsize,
    delete_bucket_calls: AtomicUsize,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `bucket` (if needed) holding `count` objects named `{prefix}{i:06}`.
    pub async fn seed(&self, bucket: &str, prefix: &str, count: usize, size: usize) {
        let mut buckets = self.buckets.write().await;
        let entry = buckets.entry(bucket.to_string()).or_insert_with(new_bucket);
        let payload = Bytes::from(vec![0u8; size]);
        for i in 0..count {
            entry.objects.insert(
                format!("{prefix}{i:06}"),
                StoredObject {
                    data: payload.clone(),
                    content_type: None,
                    last_modified: OffsetDateTime::now_utc(),
                },
            );
        }
    }

    /// Number of objects currently in `bucket`, or `None` if it does not exist.
    pub async fn object_count(&self, bucket: &str) -> Option<usize> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map(|b| b.objects.len())
    }

    pub async fn bucket_exists(&self, bucket: &str) -> bool {
        self.buckets.read().await.contains_key(bucket)
    }

    /// Fail the next `n` delete_batch calls with a transient error.
    pub async fn inject_delete_failures(&self, n: usize) {
        self.faults.write().await.delete_call_failures = n;
    }

    /// Fail the next `n` list_objects calls with a transient error.
    pub async fn inject_list_failures(&self, n: usize) {
        self.faults.write().await.list_call_failures = n;
    }

    /// Refuse to delete `key` the next `times` times it appears in a batch.
    pub async fn fail_key(&self, key: &str, times: usize) {
        self.faults
            .write()
            .await
            .key_failures
            .insert(key.to_string(), times);
    }

    /// Reject every call as if the credentials were wrong.
    pub async fn deny_all(&self, deny: bool) {
        self.faults.write().await.deny_all = deny;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn delete_batch_calls(&self) -> usize {
        self.delete_batch_calls.load(Ordering::SeqCst)
    }

    pub fn delete_bucket_calls(&self) -> usize {
        self.delete_bucket_calls.load(Ordering::SeqCst)
    }

    async fn check_access(&self) -> StorageResult<()> {
        if self.faults.read().await.deny_all {
            return Err(StorageError::AccessDenied(
                "InvalidAccessKeyId: the access key does not exist".to_string(),
            ));
        }
        Ok(())
    }
}

fn new_bucket() -> Bucket {
    Bucket {
        created_at: OffsetDateTime::now_utc(),
        objects: BTreeMap::new(),
    }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        self.check_access().await?;
        Ok(self
            .buckets
            .read()
            .await
            .iter()
            .map(|(name, bucket)| BucketInfo {
                name: name.clone(),
                created_at: Some(bucket.created_at),
            })
            .collect())
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.check_access().await?;
        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(bucket) {
            return Err(StorageError::AlreadyExists(bucket.to_string()));
        }
        buckets.insert(bucket.to_string(), new_bucket());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.check_access().await?;
        self.delete_bucket_calls.fetch_add(1, Ordering::SeqCst);
        let mut buckets = self.buckets.write().await;
        match buckets.get(bucket) {
            None => Err(StorageError::NotFound(bucket.to_string())),
            Some(b) if !b.objects.is_empty() => {
                Err(StorageError::BucketNotEmpty(bucket.to_string()))
            }
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<&ContinuationToken>,
        max_keys: usize,
    ) -> StorageResult<ListingPage> {
        self.check_access().await?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = self.faults.write().await;
            if faults.list_call_failures > 0 {
                faults.list_call_failures -= 1;
                return Err(StorageError::Unreachable("injected list failure".to_string()));
            }
        }

        let buckets = self.buckets.read().await;
        let b = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::NotFound(bucket.to_string()))?;

        let prefix = prefix.unwrap_or("");
        // Tokens carry the last key returned on the previous page.
        let lower = match token {
            Some(token) => Bound::Excluded(token.as_str().to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let max_keys = max_keys.max(1);
        let mut matching = b
            .objects
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix));

        let entries: Vec<ObjectEntry> = matching
            .by_ref()
            .take(max_keys)
            .map(|(key, obj)| ObjectEntry {
                key: key.clone(),
                size: obj.data.len() as u64,
                last_modified: Some(obj.last_modified),
            })
            .collect();

        let is_truncated = matching.next().is_some();
        let next_token = match (is_truncated, entries.last()) {
            (true, Some(last)) => Some(ContinuationToken::new(last.key.clone())?),
            _ => None,
        };

        Ok(ListingPage {
            entries,
            is_truncated,
            next_token,
        })
    }

    async fn delete_batch(&self, bucket: &str, keys: &[String]) -> StorageResult<DeleteReport> {
        self.check_access().await?;
        if keys.len() > MAX_DELETE_KEYS {
            return Err(StorageError::InvalidKey(format!(
                "delete batch of {} keys exceeds maximum {}",
                keys.len(),
                MAX_DELETE_KEYS
            )));
        }
        self.delete_batch_calls.fetch_add(1, Ordering::SeqCst);

        let mut faults = self.faults.write().await;
        if faults.delete_call_failures > 0 {
            faults.delete_call_failures -= 1;
            return Err(StorageError::Throttled("injected delete failure".to_string()));
        }

        let mut buckets = self.buckets.write().await;
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::NotFound(bucket.to_string()))?;

        let mut report = DeleteReport::default();
        for key in keys {
            if let Some(remaining) = faults.key_failures.get_mut(key)
                && *remaining > 0
            {
                *remaining -= 1;
                report.errors.push(DeleteFailure {
                    key: key.clone(),
                    code: "InternalError".to_string(),
                    message: "injected key failure".to_string(),
                });
                continue;
            }
            // S3 reports missing keys as deleted.
            b.objects.remove(key);
            report.deleted.push(key.clone());
        }
        Ok(report)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        self.check_access().await?;
        let buckets = self.buckets.read().await;
        let obj = buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: obj.data.len() as u64,
            last_modified: Some(obj.last_modified),
            content_type: obj.content_type.clone(),
            etag: None,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ByteStream> {
        self.check_access().await?;
        let data = {
            let buckets = self.buckets.read().await;
            buckets
                .get(bucket)
                .and_then(|b| b.objects.get(key))
                .map(|obj| obj.data.clone())
                .ok_or_else(|| StorageError::NotFound(key.to_string()))?
        };
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        self.check_access().await?;
        if key.is_empty() {
            return Err(StorageError::InvalidKey("key must not be empty".to_string()));
        }
        let mut buckets = self.buckets.write().await;
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::NotFound(bucket.to_string()))?;
        b.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.map(str::to_string),
                last_modified: OffsetDateTime::now_utc(),
            },
        );
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
