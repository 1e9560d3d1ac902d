use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use throttle_guard::allowlist::Allowlist;
use throttle_guard::clock::ManualClock;
use throttle_guard::handlers::{AppState, DEMO_EMAIL, DEMO_PASSWORD};
use throttle_guard::health::HealthChecker;
use throttle_guard::rate_limiter::AdmissionLimiter;
use throttle_guard::store::MemoryStore;
use throttle_guard::throttler::AdaptiveThrottler;
use throttle_guard::{create_app, Identity, IdentityResolver, Policies, Policy, PolicyRouter, ThrottlePolicy};

const CLIENT: &str = "198.51.100.7";

struct TestApp {
    app: Router,
    guard: Arc<PolicyRouter>,
    clock: Arc<ManualClock>,
}

fn test_app(global_max: u64, auth_max: u64, allowlist: &str) -> TestApp {
    let clock = Arc::new(ManualClock::new(1_800_000_000_000));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let resolver = IdentityResolver::default();
    let policies = Policies {
        global: Policy::new("global", Duration::from_secs(900), global_max)
            .with_message("Too many requests from this IP, please try again after 15 minutes."),
        auth: Policy::new("auth", Duration::from_secs(600), auth_max)
            .with_message("Too many authentication attempts from this IP, please try again after 10 minutes."),
        login: ThrottlePolicy::new(Duration::from_secs(900), 1, Duration::from_millis(5)),
    };

    let guard = Arc::new(PolicyRouter::new(
        policies.clone(),
        resolver,
        Allowlist::parse(allowlist, &resolver).unwrap(),
        AdmissionLimiter::new(store.clone(), clock.clone()),
        AdaptiveThrottler::new(clock.clone()),
    ));
    let health = Arc::new(HealthChecker::new(store, policies));

    TestApp {
        app: create_app(AppState {
            guard: guard.clone(),
            health,
        }),
        guard,
        clock,
    }
}

fn get(path: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .extension(ConnectInfo(SocketAddr::new(ip.parse().unwrap(), 40000)))
        .body(Body::empty())
        .unwrap()
}

fn post_json(path: &str, ip: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .extension(ConnectInfo(SocketAddr::new(ip.parse().unwrap(), 40000)))
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn header_str<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_global_limit_rejects_after_max_hits() {
    let t = test_app(3, 10, "");

    for expected_remaining in ["2", "1", "0"] {
        let response = t.app.clone().oneshot(get("/api/data/public", CLIENT)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "x-ratelimit-limit"), Some("3"));
        assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some(expected_remaining));
    }

    let response = t.app.clone().oneshot(get("/api/data/public", CLIENT)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&response, "retry-after"), Some("900"));
    assert_eq!(header_str(&response, "ratelimit-policy"), Some("3;w=900"));

    let body = json_body(response).await;
    assert_eq!(body["status"], 429);
    assert_eq!(
        body["message"],
        "Too many requests from this IP, please try again after 15 minutes."
    );
}

#[tokio::test]
async fn test_window_rollover_admits_again() {
    let t = test_app(1, 10, "");

    let first = t.app.clone().oneshot(get("/", CLIENT)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = t.app.clone().oneshot(get("/", CLIENT)).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    t.clock.advance(Duration::from_secs(900));
    let third = t.app.clone().oneshot(get("/", CLIENT)).await.unwrap();
    assert_eq!(third.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_clients_are_limited_independently() {
    let t = test_app(1, 10, "");

    let a = t.app.clone().oneshot(get("/", "198.51.100.1")).await.unwrap();
    let b = t.app.clone().oneshot(get("/", "198.51.100.2")).await.unwrap();
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);

    let a = t.app.clone().oneshot(get("/", "198.51.100.1")).await.unwrap();
    assert_eq!(a.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_auth_limit_applies_to_signup_and_reports_inner_policy() {
    let t = test_app(100, 2, "");
    let body = json!({ "email": "new@example.com", "password": "hunter2" });

    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/auth/signup", CLIENT, body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header_str(&response, "x-ratelimit-limit"), Some("2"));
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("1"));

    t.app
        .clone()
        .oneshot(post_json("/api/auth/signup", CLIENT, body.clone()))
        .await
        .unwrap();
    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/auth/signup", CLIENT, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&response, "retry-after"), Some("600"));

    let body = json_body(response).await;
    assert_eq!(
        body["message"],
        "Too many authentication attempts from this IP, please try again after 10 minutes."
    );

    // Non-auth routes still use the global quota.
    let response = t.app.clone().oneshot(get("/api/data/protected", CLIENT)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_allowlisted_client_is_never_limited() {
    let t = test_app(1, 1, "127.0.0.1");

    for _ in 0..5 {
        let response = t.app.clone().oneshot(get("/", "127.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }
}

#[tokio::test]
async fn test_failed_logins_throttle_and_success_resets() {
    let t = test_app(100, 10, "");
    let identity = Identity::new(CLIENT);
    let wrong = json!({ "email": DEMO_EMAIL, "password": "wrong" });

    for _ in 0..3 {
        let response = t
            .app
            .clone()
            .oneshot(post_json("/api/auth/login", CLIENT, wrong.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    assert_eq!(t.guard.throttler().hits(&identity), 3);

    let right = json!({ "email": DEMO_EMAIL, "password": DEMO_PASSWORD });
    let response = t
        .app
        .clone()
        .oneshot(post_json("/api/auth/login", CLIENT, right))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(t.guard.throttler().hits(&identity), 0);

    let body = json_body(response).await;
    assert_eq!(body["message"], "Login successful!");
}

#[tokio::test]
async fn test_invalid_credentials_payload_is_unprocessable() {
    let t = test_app(100, 10, "");
    let response = t
        .app
        .clone()
        .oneshot(post_json(
            "/api/auth/signup",
            CLIENT,
            json!({ "email": "not-an-email", "password": "x" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_health_probes_are_not_limited() {
    let t = test_app(1, 1, "");

    for _ in 0..3 {
        let response = t.app.clone().oneshot(get("/health", CLIENT)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }

    let response = t.app.clone().oneshot(get("/ready", CLIENT)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["counter_store"], "memory");
    assert!(body.get("note").is_none());
}

#[tokio::test]
async fn test_requests_without_peer_share_unknown_identity() {
    let t = test_app(1, 10, "");
    let request = || Request::builder().uri("/").body(Body::empty()).unwrap();

    let first = t.app.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = t.app.clone().oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_router_assembled_from_config() {
    use std::collections::HashMap;
    use throttle_guard::Config;

    let vars: HashMap<String, String> = [
        ("GLOBAL_RATE_LIMIT_MAX_REQUESTS", "2"),
        ("RATE_LIMIT_WHITELIST", "10.0.0.1"),
        ("RATE_LIMIT_STRATEGY", "sliding"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let config = tokio_test::assert_ok!(Config::from_map(&vars));

    let clock = Arc::new(ManualClock::new(1_800_000_000_000));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let guard = Arc::new(tokio_test::assert_ok!(PolicyRouter::from_config(&config, store.clone(), clock)));
    let health = Arc::new(HealthChecker::new(store, guard.policies().clone()));
    let app = create_app(AppState { guard, health });

    for _ in 0..2 {
        let response = app.clone().oneshot(get("/", CLIENT)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.clone().oneshot(get("/", CLIENT)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = app.clone().oneshot(get("/", "10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn test_invalid_allowlist_entry_is_a_configuration_error() {
    use std::collections::HashMap;
    use throttle_guard::{Config, GuardError};

    let vars: HashMap<String, String> =
        [("RATE_LIMIT_WHITELIST".to_string(), "not-an-ip".to_string())].into_iter().collect();
    let err = tokio_test::assert_err!(Config::from_map(&vars));
    assert!(matches!(err, GuardError::Configuration(_)));
}
