//! Redis-backed counter store
//!
//! Shared across every worker process of a deployment. Uses a single
//! multiplexed `ConnectionManager`, which reconnects on its own after the
//! server drops the connection.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::collections::HashMap;
use std::time::Duration;

use super::{CounterStore, StoreError, StoreResult};

/// INCR that sets the expiry in the same round trip as the first increment
const INCR_WITH_TTL_SCRIPT: &str = r#"
local value = redis.call('INCR', KEYS[1])
if value == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return value
"#;

#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    incr_script: Script,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to the Redis server at `url`
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis client: {e}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to Redis: {e}")))?;

        tracing::info!("🔌 Redis counter store connected");

        Ok(Self {
            connection,
            incr_script: Script::new(INCR_WITH_TTL_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

fn ttl_seconds(ttl: Duration) -> i64 {
    ttl.as_secs().max(1) as i64
}

fn map_error(key: &str, error: RedisError) -> StoreError {
    if error.kind() == redis::ErrorKind::TypeError {
        StoreError::Malformed {
            key: key.to_string(),
            reason: error.to_string(),
        }
    } else {
        StoreError::Unavailable(error.to_string())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> StoreResult<Option<i64>> {
        self.conn()
            .get::<_, Option<i64>>(key)
            .await
            .map_err(|e| map_error(key, e))
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        self.incr_script
            .key(key)
            .arg(ttl_seconds(ttl))
            .invoke_async::<_, i64>(&mut self.conn())
            .await
            .map_err(|e| map_error(key, e))
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let seconds: i64 = self
            .conn()
            .ttl(key)
            .await
            .map_err(|e| map_error(key, e))?;
        // -2 missing key, -1 no expiry
        Ok(u64::try_from(seconds).ok().map(Duration::from_secs))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.conn()
            .del::<_, ()>(key)
            .await
            .map_err(|e| map_error(key, e))
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.conn()
            .hgetall::<_, HashMap<String, String>>(key)
            .await
            .map_err(|e| map_error(key, e))
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        redis::pipe()
            .atomic()
            .hset_multiple(key, fields)
            .ignore()
            .expire(key, ttl_seconds(ttl))
            .ignore()
            .query_async::<_, ()>(&mut self.conn())
            .await
            .map_err(|e| map_error(key, e))
    }

    async fn hash_incr(&self, key: &str, field: &str, by: i64, ttl: Duration) -> StoreResult<i64> {
        let (value,): (i64,) = redis::pipe()
            .atomic()
            .hincr(key, field, by)
            .expire(key, ttl_seconds(ttl))
            .ignore()
            .query_async(&mut self.conn())
            .await
            .map_err(|e| map_error(key, e))?;
        Ok(value)
    }
}
