use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;
use tokio::time;

use super::{storage_key, CounterStore};
use crate::error::{GuardError, Result};

/// Upper bound on establishing the initial connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// INCR and set the expiry only when the counter was just created, so a
/// window's TTL is anchored to its first hit.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return current
"#;

/// Redis-backed counter store shared by every process pointing at the same
/// server.
pub struct RedisStore {
    connection: ConnectionManager,
    increment: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let connection = time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| GuardError::StoreUnavailable("Timed out connecting to Redis".into()))??;

        let store = Self {
            connection,
            increment: Script::new(INCREMENT_SCRIPT),
        };
        time::timeout(CONNECT_TIMEOUT, store.ping())
            .await
            .map_err(|_| GuardError::StoreUnavailable("Timed out pinging Redis".into()))??;

        Ok(store)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_and_get(&self, key: &str, window: u64, ttl: Duration) -> Result<u64> {
        let mut conn = self.connection.clone();
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        let count: u64 = self
            .increment
            .key(storage_key(key, window))
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn get(&self, key: &str, window: u64) -> Result<u64> {
        let mut conn = self.connection.clone();
        let count: Option<u64> = redis::cmd("GET")
            .arg(storage_key(key, window))
            .query_async(&mut conn)
            .await?;

        Ok(count.unwrap_or(0))
    }

    async fn reset(&self, key: &str, window: u64) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(storage_key(key, window))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
