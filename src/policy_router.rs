//! Named policies composed into per-route evaluations.
//!
//! Every entry point resolves the caller's identity, lets allowlisted
//! identities straight through without touching any counter, and then runs
//! admission. Throttling only runs for admitted login attempts.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::allowlist::Allowlist;
use crate::clock::Clock;
use crate::config::Config;
use crate::decision::{Decision, Quota};
use crate::error::Result;
use crate::identity::{Identity, IdentityResolver, RequestMeta};
use crate::policy::{Policies, Policy};
use crate::rate_limiter::AdmissionLimiter;
use crate::store::CounterStore;
use crate::throttler::AdaptiveThrottler;

/// Result of running one route class's policies for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub identity: Identity,
    pub exempt: bool,
    /// `None` for exempt identities.
    pub admission: Option<Decision>,
    /// Delay to apply before the handler runs.
    pub delay: Duration,
}

impl Evaluation {
    fn exempt(identity: Identity) -> Self {
        Self {
            identity,
            exempt: true,
            admission: None,
            delay: Duration::ZERO,
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.admission.map(|d| d.is_rejected()).unwrap_or(false)
    }

    pub fn quota(&self) -> Option<&Quota> {
        self.admission.as_ref().and_then(Decision::quota)
    }
}

pub struct PolicyRouter {
    policies: Policies,
    resolver: IdentityResolver,
    allowlist: Allowlist,
    limiter: AdmissionLimiter,
    throttler: AdaptiveThrottler,
}

impl PolicyRouter {
    pub fn new(
        policies: Policies,
        resolver: IdentityResolver,
        allowlist: Allowlist,
        limiter: AdmissionLimiter,
        throttler: AdaptiveThrottler,
    ) -> Self {
        Self {
            policies,
            resolver,
            allowlist,
            limiter,
            throttler,
        }
    }

    /// Assemble the router a service runs with from its configuration.
    pub fn from_config(config: &Config, store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let policies = config.policies()?;
        let resolver = config.identity_resolver();
        let allowlist = Allowlist::parse(&config.allowlist, &resolver)?;
        let limiter = AdmissionLimiter::new(store, clock.clone())
            .with_strategy(config.window_strategy()?)
            .with_failure_policy(config.failure_policy());

        Ok(Self::new(policies, resolver, allowlist, limiter, AdaptiveThrottler::new(clock)))
    }

    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.limiter
    }

    pub fn throttler(&self) -> &AdaptiveThrottler {
        &self.throttler
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    pub fn resolve(&self, meta: &RequestMeta) -> Identity {
        self.resolver.resolve(meta)
    }

    /// Quota applied to all traffic.
    pub async fn evaluate_global(&self, meta: &RequestMeta) -> Evaluation {
        self.admit(meta, &self.policies.global).await
    }

    /// Stricter quota for authentication routes.
    pub async fn evaluate_auth(&self, meta: &RequestMeta) -> Evaluation {
        self.admit(meta, &self.policies.auth).await
    }

    /// Auth quota followed by the login throttle. Rejected attempts never
    /// reach the throttler.
    pub async fn evaluate_login(&self, meta: &RequestMeta) -> Evaluation {
        let mut evaluation = self.admit(meta, &self.policies.auth).await;
        if evaluation.exempt || evaluation.is_rejected() {
            return evaluation;
        }

        evaluation.delay = self
            .throttler
            .evaluate(&evaluation.identity, &self.policies.login)
            .delay();
        evaluation
    }

    /// Forget failed login attempts for `identity`. Login handlers call this
    /// after a successful authentication.
    pub fn reset_throttle(&self, identity: &Identity) {
        self.throttler.reset(identity);
    }

    async fn admit(&self, meta: &RequestMeta, policy: &Policy) -> Evaluation {
        let identity = self.resolver.resolve(meta);
        if self.allowlist.is_exempt(&identity) {
            debug!(identity = %identity, policy = %policy.name, "Allowlisted identity, skipping limits");
            return Evaluation::exempt(identity);
        }

        let decision = self.limiter.evaluate(&identity, policy).await;
        if decision.is_rejected() {
            warn!(
                ip = %identity,
                path = %meta.path,
                method = %meta.method,
                policy = %policy.name,
                limit = policy.max_hits,
                window_ms = policy.window_ms(),
                "Rate limit exceeded for {}. Path: {}",
                identity,
                meta.path
            );
        }

        Evaluation {
            identity,
            exempt: false,
            admission: Some(decision),
            delay: Duration::ZERO,
        }
    }
}
