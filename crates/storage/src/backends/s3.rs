//! S3-compatible object client using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::region;
use crate::traits::{
    BucketInfo, ByteStream, ContinuationToken, DeleteFailure, DeleteReport, ListingPage,
    MAX_DELETE_KEYS, ObjectClient, ObjectEntry, ObjectMeta,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use futures::StreamExt;
use stowage_core::ConnectionParams;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Marker included in lazy-credentials initialization errors so we can map them
/// to actionable storage config errors instead of generic S3 transport failures.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "stowage-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "stowage-s3-lazy-credentials-resolve";

/// Lazily initializes the AWS default credentials chain on first signed request.
///
/// Connection tests and cache warm-up build clients eagerly, so construction
/// must not touch the network or the local trust store.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn build_chain(
        &self,
    ) -> Result<aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        let region = aws_config::Region::new(self.region.clone());

        tokio::task::spawn(async move {
            aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                .region(region)
                .build()
                .await
        })
        .await
        .map_err(|join_err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
            ))
        })
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async { self.build_chain().await })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

/// Map an SDK failure onto the closed storage error set.
///
/// `subject` names the bucket or key for not-found and conflict errors.
fn map_s3_operation_error<E>(err: SdkError<E>, subject: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Configure access keys explicitly or ensure ambient AWS credentials and trust roots are available."
                .to_string(),
        );
    }

    match &err {
        SdkError::TimeoutError(_) => StorageError::Timeout(subject.to_string()),
        SdkError::DispatchFailure(dispatch) => {
            if dispatch.is_timeout() {
                StorageError::Timeout(subject.to_string())
            } else {
                StorageError::Unreachable(format!("{subject}: {err_text}"))
            }
        }
        SdkError::ServiceError(service_err) => {
            let status = service_err.raw().status().as_u16();
            let code = err.code().unwrap_or_default();
            let message = err.message().unwrap_or(code).to_string();
            match (status, code) {
                (_, "BucketNotEmpty") => StorageError::BucketNotEmpty(subject.to_string()),
                (_, "NoSuchBucket" | "NoSuchKey") | (404, _) => {
                    StorageError::NotFound(subject.to_string())
                }
                (_, "BucketAlreadyExists" | "BucketAlreadyOwnedByYou") => {
                    StorageError::AlreadyExists(subject.to_string())
                }
                (_, "InvalidAccessKeyId" | "SignatureDoesNotMatch") | (401 | 403, _) => {
                    StorageError::AccessDenied(message)
                }
                (_, "SlowDown" | "Throttling") | (429 | 503, _) => StorageError::Throttled(message),
                _ => StorageError::Service { status, message },
            }
        }
        _ => StorageError::S3(Box::new(err)),
    }
}

fn to_offset_datetime(dt: &aws_sdk_s3::primitives::DateTime) -> Option<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(dt.secs())
        .inspect_err(|e| {
            tracing::warn!(
                timestamp = dt.secs(),
                error = %e,
                "Failed to convert S3 timestamp"
            );
        })
        .ok()
}

/// Prefix bare `host:port` endpoints with the scheme selected by `use_ssl`.
fn normalize_endpoint(endpoint: &str, use_ssl: bool) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else if use_ssl {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    }
}

/// Client for one S3-compatible endpoint.
pub struct S3Client {
    client: Client,
    /// Normalized endpoint, or the canonical AWS endpoint for the region.
    endpoint: String,
    raw_endpoint: Option<String>,
    /// Region requests are signed for.
    region: String,
    /// Region named by the configuration.
    configured_region: String,
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("configured_region", &self.configured_region)
            .finish_non_exhaustive()
    }
}

impl S3Client {
    /// Build a client. No network traffic happens until the first call.
    ///
    /// Custom endpoints use path-style addressing, which MinIO and most
    /// S3-compatible providers require.
    pub fn new(params: &ConnectionParams) -> StorageResult<Self> {
        params.validate().map_err(StorageError::Config)?;

        let resolved_region = region::effective_region(params.endpoint.as_deref(), &params.region);
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (&params.access_key, &params.secret_key) {
            let credentials = aws_sdk_s3::config::Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "stowage-config",
            );
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            s3_config_builder = s3_config_builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region.clone()));
        }

        let normalized_endpoint = params
            .endpoint
            .as_deref()
            .map(|endpoint| normalize_endpoint(endpoint, params.use_ssl));

        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint_url)
                .force_path_style(true);

            // Plain HTTP endpoints get an HTTP-only client so construction
            // does not depend on native trust roots.
            if endpoint_url.to_ascii_lowercase().starts_with("http://") {
                s3_config_builder =
                    s3_config_builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if !params.verify_ssl {
            tracing::warn!(
                endpoint = ?normalized_endpoint,
                "verify_ssl=false is not supported; certificates will still be verified"
            );
        }

        let client = Client::from_conf(s3_config_builder.build());

        let stored_endpoint = match &normalized_endpoint {
            Some(url) => url.clone(),
            None => format!("s3.{resolved_region}.amazonaws.com"),
        };

        Ok(Self {
            client,
            endpoint: stored_endpoint,
            raw_endpoint: params.endpoint.clone(),
            region: resolved_region,
            configured_region: params.region.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Region requests are signed for.
    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl ObjectClient for S3Client {
    #[instrument(skip(self), fields(backend = "s3", endpoint = %self.endpoint))]
    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, &self.endpoint))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| {
                bucket.name().map(|name| BucketInfo {
                    name: name.to_string(),
                    created_at: bucket.creation_date().and_then(to_offset_datetime),
                })
            })
            .collect())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);

        if let Some(location) =
            region::location_constraint(self.raw_endpoint.as_deref(), &self.configured_region)
        {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(location.as_str()))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, bucket))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, bucket))?;
        Ok(())
    }

    #[instrument(skip(self, token), fields(backend = "s3"))]
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<&ContinuationToken>,
        max_keys: usize,
    ) -> StorageResult<ListingPage> {
        let max_keys = i32::try_from(max_keys.clamp(1, 1000)).unwrap_or(1000);
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(max_keys);

        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            request = request.prefix(prefix);
        }
        if let Some(token) = token {
            request = request.continuation_token(token.as_str());
        }

        let output = request
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, bucket))?;

        let entries = output
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectEntry {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj.last_modified().and_then(to_offset_datetime),
                })
            })
            .collect();

        let is_truncated = output.is_truncated() == Some(true);
        let next_token = if is_truncated {
            output
                .next_continuation_token()
                .map(ContinuationToken::new)
                .transpose()?
        } else {
            None
        };

        Ok(ListingPage {
            entries,
            is_truncated,
            next_token,
        })
    }

    #[instrument(skip(self, keys), fields(backend = "s3", count = keys.len()))]
    async fn delete_batch(&self, bucket: &str, keys: &[String]) -> StorageResult<DeleteReport> {
        if keys.is_empty() {
            return Ok(DeleteReport::default());
        }
        if keys.len() > MAX_DELETE_KEYS {
            return Err(StorageError::InvalidKey(format!(
                "delete batch of {} keys exceeds maximum {}",
                keys.len(),
                MAX_DELETE_KEYS
            )));
        }

        let objects = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|e| StorageError::InvalidKey(format!("{key}: {e}")))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(false)
            .build()
            .map_err(|e| StorageError::S3(Box::new(e)))?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, bucket))?;

        let deleted = output
            .deleted()
            .iter()
            .filter_map(|d| d.key().map(str::to_string))
            .collect();
        let errors = output
            .errors()
            .iter()
            .map(|e| DeleteFailure {
                key: e.key().unwrap_or_default().to_string(),
                code: e.code().unwrap_or("Unknown").to_string(),
                message: e.message().unwrap_or_default().to_string(),
            })
            .collect();

        Ok(DeleteReport { deleted, errors })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, key))?;

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: output.last_modified().and_then(to_offset_datetime),
            content_type: output.content_type().map(|s| s.to_string()),
            etag: output.e_tag().map(|s| s.to_string()),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, key))?;

        let reader_stream = ReaderStream::new(output.body.into_async_read());
        let stream = reader_stream.map(|result| result.map_err(StorageError::Io));

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .body(data.into())
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, key))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
