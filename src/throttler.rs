use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::clock::Clock;
use crate::decision::Decision;
use crate::identity::Identity;
use crate::policy::ThrottlePolicy;

/// Attempts recorded for one identity since its last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleState {
    pub hits_since_reset: u64,
    pub last_hit_at_ms: u64,
    pub window_ms: u64,
}

impl ThrottleState {
    fn is_stale(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_hit_at_ms) > self.window_ms
    }
}

/// Graduated delays for repeated attempts.
///
/// The throttler does not know what a successful attempt is. Callers that
/// want only failures to count MUST call [`AdaptiveThrottler::reset`] once
/// they have seen a success; otherwise every attempt counts.
#[derive(Debug)]
pub struct AdaptiveThrottler {
    states: DashMap<Identity, ThrottleState>,
    clock: Arc<dyn Clock>,
}

impl AdaptiveThrottler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: DashMap::new(),
            clock,
        }
    }

    /// Record an attempt and return the delay it owes. Always a
    /// [`Decision::Delay`], zero until `delay_after` is passed.
    pub fn evaluate(&self, identity: &Identity, policy: &ThrottlePolicy) -> Decision {
        let now = self.clock.now_ms();
        let window_ms = policy.window_ms();

        let hits = {
            let mut state = self.states.entry(identity.clone()).or_insert(ThrottleState {
                hits_since_reset: 0,
                last_hit_at_ms: now,
                window_ms,
            });
            if state.is_stale(now) {
                state.hits_since_reset = 0;
            }
            state.hits_since_reset += 1;
            state.last_hit_at_ms = now;
            state.window_ms = window_ms;
            state.hits_since_reset
        };

        let delay = policy.delay_for(hits);
        if !delay.is_zero() {
            debug!(identity = %identity, hits, delay_ms = delay.as_millis() as u64, "Throttling attempt");
        }
        Decision::Delay(delay)
    }

    /// Zero the identity's attempt count. A no-op when it is already zero.
    pub fn reset(&self, identity: &Identity) {
        if let Some(mut state) = self.states.get_mut(identity) {
            if state.hits_since_reset != 0 {
                state.hits_since_reset = 0;
                debug!(identity = %identity, "Throttle counter reset");
            }
        }
    }

    /// Attempts currently counted against the identity.
    pub fn hits(&self, identity: &Identity) -> u64 {
        let now = self.clock.now_ms();
        self.states
            .get(identity)
            .filter(|state| !state.is_stale(now))
            .map(|state| state.hits_since_reset)
            .unwrap_or(0)
    }

    pub fn state(&self, identity: &Identity) -> Option<ThrottleState> {
        self.states.get(identity).map(|state| *state)
    }

    /// Drop identities idle for longer than their window.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.states.len();
        self.states.retain(|_, state| !state.is_stale(now));
        before.saturating_sub(self.states.len())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Suspend the current request for `delay`. Dropping the returned future,
/// as happens when the client disconnects, cancels the wait.
pub async fn apply_delay(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
