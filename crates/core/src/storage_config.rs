//! Storage configuration records and the connection parameters derived from them.

use crate::permission::StorageId;
use serde::{Deserialize, Serialize};

/// Region used when a configuration does not name one.
pub const DEFAULT_REGION: &str = "us-east-1";

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_true() -> bool {
    true
}

/// Everything needed to open a client against one object-store endpoint.
///
/// Two parameter sets are credential-equivalent exactly when they compare
/// equal.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Endpoint URL. `None` targets AWS S3.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_true")]
    pub use_ssl: bool,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
}

impl ConnectionParams {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            access_key: None,
            secret_key: None,
            region: default_region(),
            use_ssl: true,
            verify_ssl: true,
        }
    }

    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(
                "storage config requires both access_key and secret_key when either is set"
                    .to_string(),
            );
        }
        if self.region.trim().is_empty() {
            return Err("storage config region must not be empty".to_string());
        }
        if let Some(endpoint) = &self.endpoint
            && endpoint.trim().is_empty()
        {
            return Err("storage config endpoint must not be empty when set".to_string());
        }
        Ok(())
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("use_ssl", &self.use_ssl)
            .field("verify_ssl", &self.verify_ssl)
            .finish()
    }
}

/// A persisted storage configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfigRecord {
    pub id: StorageId,
    pub name: String,
    #[serde(flatten)]
    pub params: ConnectionParams,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl StorageConfigRecord {
    pub fn new(id: i64, name: impl Into<String>, params: ConnectionParams) -> Self {
        Self {
            id: StorageId(id),
            name: name.into(),
            params,
            is_active: true,
        }
    }

    /// Whether replacing `self` with `updated` must evict a cached client.
    ///
    /// Renames do not; anything that changes where or how the client
    /// connects, or whether the config may be used at all, does.
    pub fn requires_reconnect(&self, updated: &StorageConfigRecord) -> bool {
        self.params != updated.params || self.is_active != updated.is_active
    }
}
