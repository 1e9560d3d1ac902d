//! Demonstration routes. They stand in for the application the rate limits
//! protect; the login handler shows the reset-on-success contract.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::error::GuardError;
use crate::health::{HealthChecker, HealthStatus};
use crate::middleware::{LoginAttempt, SharedGuard};

/// Fixed credentials accepted by the demo login route.
pub const DEMO_EMAIL: &str = "test@example.com";
pub const DEMO_PASSWORD: &str = "password123";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub guard: SharedGuard,
    pub health: Arc<HealthChecker>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct Credentials {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "API is running successfully. Rate limiting is active."
    }))
}

pub async fn signup(Json(payload): Json<Credentials>) -> Result<impl IntoResponse, GuardError> {
    payload.validate()?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User registered successfully!" })),
    ))
}

/// Only failed attempts should count toward the login throttle, so a valid
/// login resets it.
pub async fn login(
    attempt: Option<Extension<LoginAttempt>>,
    Json(payload): Json<Credentials>,
) -> Result<Response, GuardError> {
    payload.validate()?;

    if payload.email == DEMO_EMAIL && payload.password == DEMO_PASSWORD {
        if let Some(Extension(attempt)) = attempt {
            attempt.succeeded();
        }
        return Ok(Json(json!({
            "message": "Login successful!",
            "token": "dummy-jwt-token"
        }))
        .into_response());
    }

    Ok((
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "Invalid credentials" })),
    )
        .into_response())
}

pub async fn public_data() -> impl IntoResponse {
    Json(json!({ "message": "This is public data, accessible by everyone." }))
}

pub async fn protected_data() -> impl IntoResponse {
    Json(json!({
        "message": "You have accessed protected data successfully!",
        "data": [
            { "id": 1, "value": "Some secret data" },
            { "id": 2, "value": "More secret stuff" }
        ]
    }))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.health.check_health().await)
}

/// Readiness check endpoint. Ready even without the shared store, since
/// limits fall back to process memory.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.health.check_store().await;

    let mut body = json!({
        "status": "ready",
        "counter_store": store.backend,
    });
    if store.error.is_some() {
        body["note"] = json!("Shared store unreachable, counting in local memory");
    }

    (StatusCode::OK, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::Allowlist;
    use crate::clock::ManualClock;
    use crate::error::Result;
    use crate::identity::IdentityResolver;
    use crate::policy::{Policies, Policy, ThrottlePolicy};
    use crate::policy_router::PolicyRouter;
    use crate::rate_limiter::AdmissionLimiter;
    use crate::store::{CounterStore, MemoryStore};
    use crate::throttler::AdaptiveThrottler;
    use async_trait::async_trait;
    use std::time::Duration;

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment_and_get(&self, _: &str, _: u64, _: Duration) -> Result<u64> {
            Err(GuardError::StoreUnavailable("down".into()))
        }

        async fn get(&self, _: &str, _: u64) -> Result<u64> {
            Err(GuardError::StoreUnavailable("down".into()))
        }

        async fn reset(&self, _: &str, _: u64) -> Result<()> {
            Err(GuardError::StoreUnavailable("down".into()))
        }

        async fn ping(&self) -> Result<()> {
            Err(GuardError::StoreUnavailable("down".into()))
        }

        fn name(&self) -> &'static str {
            "redis"
        }
    }

    fn state(health_store: Arc<dyn CounterStore>) -> AppState {
        let clock = Arc::new(ManualClock::new(0));
        let policies = Policies {
            global: Policy::new("global", Duration::from_secs(900), 100),
            auth: Policy::new("auth", Duration::from_secs(600), 10),
            login: ThrottlePolicy::new(Duration::from_secs(900), 5, Duration::from_millis(500)),
        };
        let resolver = IdentityResolver::default();
        let guard = Arc::new(PolicyRouter::new(
            policies.clone(),
            resolver,
            Allowlist::default(),
            AdmissionLimiter::new(Arc::new(MemoryStore::new(clock.clone())), clock.clone()),
            AdaptiveThrottler::new(clock),
        ));
        AppState {
            guard,
            health: Arc::new(HealthChecker::new(health_store, policies)),
        }
    }

    async fn readiness_body(state: AppState) -> (StatusCode, serde_json::Value) {
        let response = readiness_check(State(state)).await.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_readiness_notes_unreachable_store() {
        let (status, body) = readiness_body(state(Arc::new(DownStore))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["counter_store"], "redis");
        assert!(body["note"].is_string());
    }

    #[tokio::test]
    async fn test_readiness_without_note_when_store_answers() {
        let store = Arc::new(MemoryStore::new(Arc::new(ManualClock::new(0))));
        let (_, body) = readiness_body(state(store)).await;
        assert_eq!(body["counter_store"], "memory");
        assert!(body.get("note").is_none());
    }
}
