//! Redis-backed progress store shared by every engine instance.

use super::ProgressStore;
use crate::error::{TaskError, TaskResult};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::instrument;

/// Replaces KEYS[1] with ARGV[2] (TTL ARGV[3] ms) only while it equals ARGV[1].
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
  return 1
end
return 0
"#;

const SCAN_COUNT: usize = 200;

/// Progress store on a Redis server.
///
/// The connection is opened on first use and multiplexed across callers.
pub struct RedisProgressStore {
    client: redis::Client,
    connection: OnceCell<MultiplexedConnection>,
    timeout: Duration,
    cas: redis::Script,
}

impl std::fmt::Debug for RedisProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisProgressStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl RedisProgressStore {
    /// Parse the URL. No connection is made until the first command.
    pub fn new(url: &str, timeout: Duration) -> TaskResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            timeout,
            cas: redis::Script::new(CAS_SCRIPT),
        })
    }

    async fn conn(&self) -> TaskResult<MultiplexedConnection> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                self.bounded(async {
                    self.client
                        .get_multiplexed_async_connection()
                        .await
                        .map_err(TaskError::from)
                })
                .await
            })
            .await?;
        Ok(conn.clone())
    }

    async fn bounded<T, F>(&self, op: F) -> TaskResult<T>
    where
        F: Future<Output = TaskResult<T>>,
    {
        match timeout(self.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::Store(format!(
                "redis command timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    #[instrument(skip(self), fields(store = "redis"))]
    async fn get(&self, key: &str) -> TaskResult<Option<String>> {
        let mut conn = self.conn().await?;
        self.bounded(async {
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    #[instrument(skip(self, value), fields(store = "redis"))]
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> TaskResult<()> {
        let mut conn = self.conn().await?;
        self.bounded(async {
            let _: () = conn.pset_ex(key, value, ttl_millis(ttl)).await?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, expected, new), fields(store = "redis"))]
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> TaskResult<bool> {
        let mut conn = self.conn().await?;
        self.bounded(async {
            let swapped: i64 = self
                .cas
                .key(key)
                .arg(expected)
                .arg(new)
                .arg(ttl_millis(ttl))
                .invoke_async(&mut conn)
                .await?;
            Ok(swapped == 1)
        })
        .await
    }

    #[instrument(skip(self), fields(store = "redis"))]
    async fn delete(&self, key: &str) -> TaskResult<bool> {
        let mut conn = self.conn().await?;
        self.bounded(async {
            let removed: i64 = conn.del(key).await?;
            Ok(removed > 0)
        })
        .await
    }

    #[instrument(skip(self), fields(store = "redis"))]
    async fn scan(&self, prefix: &str) -> TaskResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(async {
                    let reply = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn)
                        .await?;
                    Ok(reply)
                })
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn health_check(&self) -> TaskResult<()> {
        let mut conn = self.conn().await?;
        self.bounded(async {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
