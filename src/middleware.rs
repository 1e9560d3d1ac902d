use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::decision::Decision;
use crate::identity::{Identity, RequestMeta, UNKNOWN_IDENTITY};
use crate::policy::Policy;
use crate::policy_router::{Evaluation, PolicyRouter};
use crate::response::{apply_rate_limit_headers, rejection_response};
use crate::throttler::apply_delay;

pub type SharedGuard = Arc<PolicyRouter>;

/// Handle given to the login handler through request extensions.
///
/// The handler MUST call [`LoginAttempt::succeeded`] when the credentials
/// were valid; otherwise the attempt keeps counting toward the throttle.
#[derive(Clone)]
pub struct LoginAttempt {
    identity: Identity,
    guard: SharedGuard,
}

impl LoginAttempt {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn succeeded(&self) {
        self.guard.reset_throttle(&self.identity);
    }
}

/// Global quota, applied to every route.
pub async fn global_limit(State(guard): State<SharedGuard>, request: Request, next: Next) -> Response {
    let evaluation = guard.evaluate_global(&request_meta(&request)).await;
    admit_or_reject(&guard.policies().global, &evaluation, request, next).await
}

/// Stricter quota for authentication routes.
pub async fn auth_limit(State(guard): State<SharedGuard>, request: Request, next: Next) -> Response {
    let evaluation = guard.evaluate_auth(&request_meta(&request)).await;
    admit_or_reject(&guard.policies().auth, &evaluation, request, next).await
}

/// Auth quota plus the login slow-down. Dropping this future on client
/// disconnect also drops any pending delay.
pub async fn login_throttle(State(guard): State<SharedGuard>, mut request: Request, next: Next) -> Response {
    let evaluation = guard.evaluate_login(&request_meta(&request)).await;
    let policy = &guard.policies().auth;

    if let Some(rejected) = rejection(policy, &evaluation) {
        return rejected;
    }

    apply_delay(evaluation.delay).await;

    request.extensions_mut().insert(LoginAttempt {
        identity: evaluation.identity.clone(),
        guard: guard.clone(),
    });

    let mut response = next.run(request).await;
    if let Some(quota) = evaluation.quota() {
        apply_rate_limit_headers(response.headers_mut(), policy, quota);
    }
    response
}

async fn admit_or_reject(policy: &Policy, evaluation: &Evaluation, request: Request, next: Next) -> Response {
    if let Some(rejected) = rejection(policy, evaluation) {
        return rejected;
    }

    let mut response = next.run(request).await;
    if let Some(quota) = evaluation.quota() {
        apply_rate_limit_headers(response.headers_mut(), policy, quota);
    }
    response
}

fn rejection(policy: &Policy, evaluation: &Evaluation) -> Option<Response> {
    match evaluation.admission {
        Some(Decision::Reject { quota, retry_after }) => Some(rejection_response(policy, &quota, retry_after)),
        _ => None,
    }
}

/// Metadata identity resolution needs from an axum request.
pub fn request_meta(request: &Request) -> RequestMeta {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let forwarded_for = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    RequestMeta {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        peer,
        forwarded_for,
    }
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let uri = request.uri().clone();
    let meta = request_meta(&request);
    let peer = meta
        .peer
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string());

    info!(
        target: "throttle_guard::middleware",
        request_id = %request_id,
        method = %meta.method,
        uri = %uri,
        peer = %peer,
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "throttle_guard::middleware",
        request_id = %request_id,
        method = %meta.method,
        uri = %uri,
        status = %response.status(),
        "Request completed"
    );

    response
}
