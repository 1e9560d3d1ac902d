use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;

use crate::decision::Quota;
use crate::policy::Policy;

/// Body sent with a quota rejection.
#[derive(Debug, Serialize)]
pub struct RejectionBody {
    pub status: u16,
    pub message: String,
}

impl RejectionBody {
    pub fn for_policy(policy: &Policy) -> Self {
        Self {
            status: policy.status_code,
            message: policy.message.clone(),
        }
    }
}

/// The response for a request that exceeded `policy`.
pub fn rejection_response(policy: &Policy, quota: &Quota, retry_after: Duration) -> Response {
    let status = StatusCode::from_u16(policy.status_code).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
    let mut response = (status, Json(RejectionBody::for_policy(policy))).into_response();

    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, policy, quota);
    headers.insert(header::RETRY_AFTER, HeaderValue::from(ceil_secs(retry_after)));
    response
}

/// Attach draft-7 `RateLimit` headers and the legacy `X-RateLimit-*` set.
/// Headers already present are kept, so the innermost policy wins.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, policy: &Policy, quota: &Quota) {
    let reset_secs = ceil_secs(quota.reset_after);

    set_default(
        headers,
        "ratelimit-policy",
        format!("{};w={}", quota.limit, policy.window.as_secs()),
    );
    set_default(
        headers,
        "ratelimit",
        format!(
            "limit={}, remaining={}, reset={}",
            quota.limit, quota.remaining, reset_secs
        ),
    );
    set_default(headers, "x-ratelimit-limit", quota.limit.to_string());
    set_default(headers, "x-ratelimit-remaining", quota.remaining.to_string());
    set_default(
        headers,
        "x-ratelimit-reset",
        quota.reset_at_ms.div_ceil(1000).to_string(),
    );
}

fn set_default(headers: &mut HeaderMap, name: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.entry(HeaderName::from_static(name)).or_insert(value);
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    (duration.as_millis() as u64).div_ceil(1000)
}
