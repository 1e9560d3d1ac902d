//! Counter stores for window hit counts.
//!
//! A store only knows about opaque keys and window indexes. It must make
//! `increment_and_get` atomic per `(key, window)` and must let stale windows
//! expire on their own.

pub mod failover;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::rate_limiter::FailurePolicy;

pub use failover::FailoverStore;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Prefix for every physical key written to a shared store.
pub const KEY_PREFIX: &str = "throttle-guard";

static UNSAFE_KEY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9:._\-]").expect("static regex"));

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one hit to `(key, window)` and return the new count.
    /// A counter created by this call expires after `ttl`.
    async fn increment_and_get(&self, key: &str, window: u64, ttl: Duration) -> Result<u64>;

    /// Current count for `(key, window)`, zero when absent or expired.
    async fn get(&self, key: &str, window: u64) -> Result<u64>;

    async fn reset(&self, key: &str, window: u64) -> Result<()>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

/// Physical key for a window counter, safe for any backend.
pub fn storage_key(key: &str, window: u64) -> String {
    let key = UNSAFE_KEY_CHARS.replace_all(key, "_");
    format!("{}:{}:{}", KEY_PREFIX, key, window)
}

/// The stores a running service needs: the one limiters count against, and
/// the process-local store the maintenance sweep prunes.
#[derive(Clone)]
pub struct StoreHandles {
    pub counters: Arc<dyn CounterStore>,
    pub local: Arc<MemoryStore>,
}

/// Build the counter store for a deployment. A configured but unreachable
/// Redis is logged and replaced by the in-memory store; `on_failure` governs
/// runtime failures of a connected one.
pub async fn build_store(
    redis_url: Option<&str>,
    call_timeout: Duration,
    on_failure: FailurePolicy,
    clock: Arc<dyn Clock>,
) -> StoreHandles {
    let local = Arc::new(MemoryStore::new(clock.clone()));

    let Some(url) = redis_url else {
        info!("No REDIS_URL configured, counting hits in memory");
        return StoreHandles {
            counters: local.clone(),
            local,
        };
    };

    match RedisStore::connect(url).await {
        Ok(redis) => {
            info!(timeout_ms = call_timeout.as_millis() as u64, "Connected to Redis for rate limiting");
            let failover = FailoverStore::new(Arc::new(redis), local.clone(), call_timeout, clock)
                .with_failure_policy(on_failure);
            StoreHandles {
                counters: Arc::new(failover),
                local,
            }
        }
        Err(e) => {
            warn!(
                error = %e,
                fail_open = on_failure == FailurePolicy::Open,
                "Could not connect to Redis, falling back to in-memory store"
            );
            StoreHandles {
                counters: local.clone(),
                local,
            }
        }
    }
}
