//! Configuration types shared across crates.

use crate::permission::{PermissionLevel, StorageId, User, UserId};
use crate::storage_config::{DEFAULT_REGION, StorageConfigRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Largest batch a single S3 `DeleteObjects` call accepts.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Shared progress store configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressStoreConfig {
    /// Process-local store. Records are lost on restart.
    #[default]
    Memory,
    /// Redis, shared by every engine instance.
    Redis {
        /// Connection URL (e.g., "redis://localhost:6379/0").
        url: String,
        /// Per-command timeout in milliseconds.
        #[serde(default = "default_redis_timeout_ms")]
        timeout_ms: u64,
    },
}

/// Task progress tracking configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default)]
    pub store: ProgressStoreConfig,
    /// Retention of pending/running records, refreshed on every update.
    /// Doubles as the liveness timeout for crashed workers.
    #[serde(default = "default_running_ttl_secs")]
    pub running_ttl_secs: u64,
    /// Retention of completed, failed and cancelled records.
    #[serde(default = "default_terminal_ttl_secs")]
    pub terminal_ttl_secs: u64,
    /// Key prefix; the task id is appended.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

fn default_running_ttl_secs() -> u64 {
    300
}

fn default_terminal_ttl_secs() -> u64 {
    30
}

fn default_key_prefix() -> String {
    "task_progress:".to_string()
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            store: ProgressStoreConfig::default(),
            running_ttl_secs: default_running_ttl_secs(),
            terminal_ttl_secs: default_terminal_ttl_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl ProgressConfig {
    pub fn running_ttl(&self) -> Duration {
        Duration::from_secs(self.running_ttl_secs)
    }

    pub fn terminal_ttl(&self) -> Duration {
        Duration::from_secs(self.terminal_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.running_ttl_secs == 0 || self.terminal_ttl_secs == 0 {
            return Err("progress TTLs must be greater than zero".to_string());
        }
        if self.terminal_ttl_secs > self.running_ttl_secs {
            return Err(format!(
                "progress.terminal_ttl_secs ({}) must not exceed progress.running_ttl_secs ({})",
                self.terminal_ttl_secs, self.running_ttl_secs
            ));
        }
        if self.key_prefix.is_empty() {
            return Err("progress.key_prefix must not be empty".to_string());
        }
        if let ProgressStoreConfig::Redis { url, timeout_ms } = &self.store {
            if url.is_empty() {
                return Err("progress.store.url must not be empty for redis".to_string());
            }
            if *timeout_ms == 0 {
                return Err("progress.store.timeout_ms must be greater than zero".to_string());
            }
        }
        Ok(())
    }
}

/// Worker pool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of tasks executing at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Queued invocations accepted before submission is refused.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Hard limit on a single task's run time.
    #[serde(default = "default_task_time_limit_secs")]
    pub task_time_limit_secs: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_task_time_limit_secs() -> u64 {
    3600
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            task_time_limit_secs: default_task_time_limit_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn task_time_limit(&self) -> Duration {
        Duration::from_secs(self.task_time_limit_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("worker.concurrency must be at least 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("worker.queue_capacity must be at least 1".to_string());
        }
        if self.task_time_limit_secs == 0 {
            return Err("worker.task_time_limit_secs must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Retry policy for transient object-store failures inside a task.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Tuning for the bulk jobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Keys per delete call. Clamped to `1..=1000`.
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
    /// Keys requested per listing page.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
}

fn default_delete_batch_size() -> usize {
    MAX_DELETE_BATCH
}

fn default_list_page_size() -> usize {
    1000
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            delete_batch_size: default_delete_batch_size(),
            list_page_size: default_list_page_size(),
        }
    }
}

impl JobsConfig {
    pub fn effective_batch_size(&self) -> usize {
        self.delete_batch_size.clamp(1, MAX_DELETE_BATCH)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.list_page_size == 0 {
            return Err("jobs.list_page_size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Object-store client defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct S3Config {
    /// Region assumed when a configuration leaves it unset.
    #[serde(default = "default_s3_region")]
    pub default_region: String,
}

fn default_s3_region() -> String {
    DEFAULT_REGION.to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            default_region: default_s3_region(),
        }
    }
}

/// A permission grant as written in configuration.
///
/// Without `bucket` the grant is the storage-level default; with it, the
/// grant overrides that default for the one bucket.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantConfig {
    pub user_id: UserId,
    pub storage_id: StorageId,
    #[serde(default)]
    pub bucket: Option<String>,
    pub level: PermissionLevel,
}

/// Users, storage configurations and grants loaded at startup.
///
/// Stands in for the relational layer that owns these records in a full
/// deployment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub storages: Vec<StorageConfigRecord>,
    #[serde(default)]
    pub grants: Vec<GrantConfig>,
}

impl SeedConfig {
    pub fn validate(&self) -> Result<(), String> {
        let mut user_ids = HashSet::new();
        for user in &self.users {
            if !user_ids.insert(user.id) {
                return Err(format!("duplicate user id {}", user.id));
            }
        }

        let mut storage_ids = HashSet::new();
        for storage in &self.storages {
            if !storage_ids.insert(storage.id) {
                return Err(format!("duplicate storage id {}", storage.id));
            }
            storage
                .params
                .validate()
                .map_err(|e| format!("storage {}: {e}", storage.id))?;
        }

        let mut grant_keys = HashSet::new();
        for grant in &self.grants {
            if !user_ids.contains(&grant.user_id) {
                return Err(format!("grant references unknown user {}", grant.user_id));
            }
            if !storage_ids.contains(&grant.storage_id) {
                return Err(format!(
                    "grant references unknown storage {}",
                    grant.storage_id
                ));
            }
            if !grant_keys.insert((grant.user_id, grant.storage_id, grant.bucket.clone())) {
                return Err(format!(
                    "duplicate grant for user {} on storage {}{}",
                    grant.user_id,
                    grant.storage_id,
                    grant
                        .bucket
                        .as_deref()
                        .map(|b| format!(" bucket '{b}'"))
                        .unwrap_or_default()
                ));
            }
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub seed: SeedConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses the memory progress store, a single worker
    /// slot per test and no retry delay.
    pub fn for_testing() -> Self {
        Self {
            worker: WorkerConfig {
                concurrency: 2,
                ..WorkerConfig::default()
            },
            retry: RetryConfig {
                max_attempts: 3,
                backoff_ms: 0,
            },
            ..Self::default()
        }
    }

    /// Give seeded storages that leave the region blank `s3.default_region`.
    pub fn apply_region_defaults(&mut self) {
        for storage in &mut self.seed.storages {
            if storage.params.region.trim().is_empty() {
                storage.params.region = self.s3.default_region.clone();
            }
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.progress.validate()?;
        self.worker.validate()?;
        self.retry.validate()?;
        self.jobs.validate()?;
        self.seed.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_config::ConnectionParams;

    #[test]
    fn test_progress_config_defaults() {
        let config: ProgressConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.store, ProgressStoreConfig::Memory);
        assert_eq!(config.running_ttl_secs, 300);
        assert_eq!(config.terminal_ttl_secs, 30);
        assert_eq!(config.key_prefix, "task_progress:");
    }

    #[test]
    fn test_progress_store_redis_deserialize() {
        let json = r#"{"store": {"type": "redis", "url": "redis://cache:6379/0"}}"#;
        let config: ProgressConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.store,
            ProgressStoreConfig::Redis {
                url: "redis://cache:6379/0".to_string(),
                timeout_ms: 2000,
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_progress_ttl_ordering_enforced() {
        let config = ProgressConfig {
            running_ttl_secs: 10,
            terminal_ttl_secs: 60,
            ..ProgressConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_defaults_three_attempts() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff(), Duration::from_secs(1));

        let zero = RetryConfig {
            max_attempts: 0,
            backoff_ms: 0,
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_delete_batch_size_clamped() {
        let config = JobsConfig {
            delete_batch_size: 5000,
            ..JobsConfig::default()
        };
        assert_eq!(config.effective_batch_size(), MAX_DELETE_BATCH);

        let config = JobsConfig {
            delete_batch_size: 0,
            ..JobsConfig::default()
        };
        assert_eq!(config.effective_batch_size(), 1);
    }

    #[test]
    fn test_worker_validation() {
        assert!(WorkerConfig::default().validate().is_ok());
        let config = WorkerConfig {
            concurrency: 0,
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    fn seed() -> SeedConfig {
        SeedConfig {
            users: vec![User::new(1, "alice"), User::admin(2, "root")],
            storages: vec![StorageConfigRecord::new(
                10,
                "main",
                ConnectionParams::default(),
            )],
            grants: vec![GrantConfig {
                user_id: UserId(1),
                storage_id: StorageId(10),
                bucket: None,
                level: PermissionLevel::Read,
            }],
        }
    }

    #[test]
    fn test_seed_validation_accepts_consistent_seed() {
        assert!(seed().validate().is_ok());
    }

    #[test]
    fn test_seed_validation_rejects_duplicate_grant() {
        let mut seed = seed();
        seed.grants.push(GrantConfig {
            user_id: UserId(1),
            storage_id: StorageId(10),
            bucket: None,
            level: PermissionLevel::ReadWrite,
        });
        let err = seed.validate().unwrap_err();
        assert!(err.contains("duplicate grant"), "{err}");

        // A bucket override for the same pair is a different grant.
        seed.grants.pop();
        seed.grants.push(GrantConfig {
            user_id: UserId(1),
            storage_id: StorageId(10),
            bucket: Some("b1".to_string()),
            level: PermissionLevel::ReadWrite,
        });
        assert!(seed.validate().is_ok());
    }

    #[test]
    fn test_seed_validation_rejects_unknown_references() {
        let mut seed = seed();
        seed.grants[0].storage_id = StorageId(99);
        assert!(seed.validate().is_err());
    }

    #[test]
    fn test_app_config_for_testing_is_valid() {
        assert!(AppConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_blank_seed_region_takes_s3_default() {
        let mut config = AppConfig {
            seed: seed(),
            s3: S3Config {
                default_region: "eu-central-1".to_string(),
            },
            ..AppConfig::for_testing()
        };
        config.seed.storages[0].params.region = String::new();
        assert!(config.validate().is_err());

        config.apply_region_defaults();
        assert_eq!(config.seed.storages[0].params.region, "eu-central-1");
        assert!(config.validate().is_ok());
    }
}
