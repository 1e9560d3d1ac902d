use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};

use super::{CounterStore, MemoryStore};
use crate::clock::Clock;
use crate::error::{GuardError, Result};
use crate::rate_limiter::FailurePolicy;

/// How long to stay off the primary after it fails.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// A distributed store with a process-local fallback.
///
/// Every primary call is bounded by `call_timeout`. A failure or timeout is
/// logged and the primary is left alone for [`RETRY_BACKOFF`] before it is
/// probed again. Under [`FailurePolicy::Open`] those calls are served from
/// the local store; under [`FailurePolicy::Closed`] they return
/// `StoreUnavailable` so the limiter rejects.
pub struct FailoverStore {
    primary: Arc<dyn CounterStore>,
    fallback: Arc<MemoryStore>,
    call_timeout: Duration,
    clock: Arc<dyn Clock>,
    on_failure: FailurePolicy,
    degraded_until_ms: AtomicU64,
}

impl FailoverStore {
    pub fn new(
        primary: Arc<dyn CounterStore>,
        fallback: Arc<MemoryStore>,
        call_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            primary,
            fallback,
            call_timeout,
            clock,
            on_failure: FailurePolicy::Open,
            degraded_until_ms: AtomicU64::new(0),
        }
    }

    pub fn with_failure_policy(mut self, on_failure: FailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.clock.now_ms() < self.degraded_until_ms.load(Ordering::Acquire)
    }

    /// Run `call` against the primary, or fail fast while backing off.
    async fn on_primary<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        if self.is_degraded() {
            return Err(GuardError::StoreUnavailable(format!(
                "{} store backing off after failure",
                self.primary.name()
            )));
        }

        let error = match time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => {
                if self.degraded_until_ms.swap(0, Ordering::AcqRel) != 0 {
                    info!(store = self.primary.name(), "Primary counter store recovered");
                }
                return Ok(value);
            }
            Ok(Err(e)) => e,
            Err(_) => GuardError::StoreUnavailable(format!(
                "{} timed out after {}ms",
                operation,
                self.call_timeout.as_millis()
            )),
        };

        let until = self.clock.now_ms() + RETRY_BACKOFF.as_millis() as u64;
        self.degraded_until_ms.store(until, Ordering::Release);
        warn!(
            store = self.primary.name(),
            operation,
            error = %error,
            backoff_ms = RETRY_BACKOFF.as_millis() as u64,
            fail_open = self.on_failure == FailurePolicy::Open,
            "Primary counter store failed"
        );
        Err(error)
    }

    /// Whether a failed primary call may be served locally.
    fn serve_locally(&self, error: GuardError) -> Result<()> {
        match self.on_failure {
            FailurePolicy::Open => Ok(()),
            FailurePolicy::Closed => Err(error),
        }
    }
}

#[async_trait]
impl CounterStore for FailoverStore {
    async fn increment_and_get(&self, key: &str, window: u64, ttl: Duration) -> Result<u64> {
        match self
            .on_primary("increment", self.primary.increment_and_get(key, window, ttl))
            .await
        {
            Ok(count) => Ok(count),
            Err(e) => {
                self.serve_locally(e)?;
                self.fallback.increment_and_get(key, window, ttl).await
            }
        }
    }

    async fn get(&self, key: &str, window: u64) -> Result<u64> {
        match self.on_primary("get", self.primary.get(key, window)).await {
            Ok(count) => Ok(count),
            Err(e) => {
                self.serve_locally(e)?;
                self.fallback.get(key, window).await
            }
        }
    }

    async fn reset(&self, key: &str, window: u64) -> Result<()> {
        // Clear both sides so a later failover does not resurrect old hits.
        self.fallback.reset(key, window).await?;
        if let Err(e) = self.on_primary("reset", self.primary.reset(key, window)).await {
            self.serve_locally(e)?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        time::timeout(self.call_timeout, self.primary.ping())
            .await
            .map_err(|_| GuardError::StoreUnavailable("Ping timed out".into()))?
    }

    fn name(&self) -> &'static str {
        self.primary.name()
    }
}
