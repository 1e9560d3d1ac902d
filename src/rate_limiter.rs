use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::decision::{Decision, Quota};
use crate::error::Result;
use crate::identity::Identity;
use crate::policy::Policy;
use crate::store::CounterStore;
use crate::window::{WindowSlot, WindowStrategy};

/// What to do when the counter store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Admit the request. Availability wins over strict quotas.
    #[default]
    Open,
    /// Reject until the window rolls over.
    Closed,
}

/// Quota enforcement over a shared counter store.
///
/// Every evaluation counts as a hit, including ones that end up rejected.
#[derive(Clone)]
pub struct AdmissionLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    strategy: WindowStrategy,
    on_failure: FailurePolicy,
}

impl AdmissionLimiter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            strategy: WindowStrategy::Fixed,
            on_failure: FailurePolicy::Open,
        }
    }

    pub fn with_strategy(mut self, strategy: WindowStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_failure_policy(mut self, on_failure: FailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn strategy(&self) -> WindowStrategy {
        self.strategy
    }

    /// Record a hit for `identity` under `policy` and decide admission.
    pub async fn evaluate(&self, identity: &Identity, policy: &Policy) -> Decision {
        let now = self.clock.now_ms();
        let slot = WindowSlot::at(now, policy.window_ms());

        match self.count_hit(identity, policy, &slot, now).await {
            Ok(count) => decide(policy, &slot, now, count),
            Err(e) => {
                warn!(
                    identity = %identity,
                    policy = %policy.name,
                    store = self.store.name(),
                    error = %e,
                    fail_open = self.on_failure == FailurePolicy::Open,
                    "Counter store failed during admission check"
                );
                match self.on_failure {
                    FailurePolicy::Open => decide(policy, &slot, now, 0),
                    FailurePolicy::Closed => decide(policy, &slot, now, policy.max_hits.saturating_add(1)),
                }
            }
        }
    }

    /// Forget the identity's hits in the current window.
    pub async fn reset(&self, identity: &Identity, policy: &Policy) -> Result<()> {
        let slot = WindowSlot::at(self.clock.now_ms(), policy.window_ms());
        self.store.reset(&counter_key(identity, policy), slot.index).await
    }

    async fn count_hit(&self, identity: &Identity, policy: &Policy, slot: &WindowSlot, now: u64) -> Result<u64> {
        let key = counter_key(identity, policy);
        let ttl = self.strategy.retention(slot.length_ms);
        let current = self.store.increment_and_get(&key, slot.index, ttl).await?;

        let previous = match (self.strategy, slot.previous()) {
            (WindowStrategy::SlidingCounter, Some(prev)) => self.store.get(&key, prev.index).await?,
            _ => 0,
        };

        Ok(self.strategy.effective_count(slot, now, current, previous))
    }
}

fn counter_key(identity: &Identity, policy: &Policy) -> String {
    format!("{}:{}", policy.name, identity)
}

fn decide(policy: &Policy, slot: &WindowSlot, now: u64, count: u64) -> Decision {
    let reset_after = slot.remaining(now);
    let quota = Quota {
        limit: policy.max_hits,
        remaining: policy.max_hits.saturating_sub(count),
        reset_at_ms: slot.end_ms(),
        reset_after,
    };

    if count > policy.max_hits {
        debug!(policy = %policy.name, count, limit = policy.max_hits, "Quota exceeded");
        Decision::Reject {
            quota,
            retry_after: reset_after,
        }
    } else {
        Decision::Admit(quota)
    }
}
