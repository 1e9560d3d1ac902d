use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::handlers::{
    health_check, login, protected_data, public_data, readiness_check, root, signup, AppState,
};
use crate::health::HealthChecker;
use crate::middleware::{auth_limit, global_limit, logging_middleware, login_throttle, SharedGuard};
use crate::policy_router::PolicyRouter;
use crate::store::{build_store, MemoryStore};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Build the HTTP application around an assembled [`AppState`].
///
/// The global quota wraps every API route, the auth quota guards signup, and
/// login gets the auth quota plus the throttle. Health probes are not limited.
pub fn create_app(state: AppState) -> Router {
    let guard = state.guard.clone();

    let auth_routes = Router::new()
        .route(
            "/signup",
            post(signup).layer(middleware::from_fn_with_state(guard.clone(), auth_limit)),
        )
        .route(
            "/login",
            post(login).layer(middleware::from_fn_with_state(guard.clone(), login_throttle)),
        );

    let api = Router::new()
        .route("/", get(root))
        .nest("/api/auth", auth_routes)
        .route("/api/data/public", get(public_data))
        .route("/api/data/protected", get(protected_data))
        .layer(middleware::from_fn_with_state(guard, global_limit));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .merge(api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
    local_store: Arc<MemoryStore>,
    guard: SharedGuard,
    cleanup_interval: Duration,
}

impl Server {
    /// Wire stores, policies and routes from configuration. An unreachable
    /// Redis is not an error here; the service starts on the in-memory store.
    pub async fn new(config: Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let stores = build_store(
            config.redis_url(),
            config.store_timeout(),
            config.failure_policy(),
            clock.clone(),
        )
        .await;

        let guard: SharedGuard = Arc::new(PolicyRouter::from_config(&config, stores.counters.clone(), clock)?);
        let health = Arc::new(HealthChecker::new(stores.counters.clone(), guard.policies().clone()));

        info!(
            store = stores.counters.name(),
            strategy = %guard.limiter().strategy(),
            allowlisted = guard.allowlist().len(),
            trust_proxy_hops = config.trust_proxy_hops,
            "Rate limiting configured"
        );

        let app = create_app(AppState {
            guard: guard.clone(),
            health,
        });

        Ok(Self {
            app,
            bind_addr: config.bind_addr,
            local_store: stores.local,
            guard,
            cleanup_interval: config.cleanup_interval(),
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        info!("Throttle guard listening on {}", self.bind_addr);
        info!("Health check available at /health");
        info!("Readiness check available at /ready");

        let sweeper = spawn_sweeper(self.local_store, self.guard, self.cleanup_interval);

        // Run server with graceful shutdown
        let served = axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        sweeper.abort();
        served?;
        Ok(())
    }
}

/// Periodically drop expired in-memory counters and idle throttle states.
pub fn spawn_sweeper(local_store: Arc<MemoryStore>, guard: SharedGuard, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let counters = local_store.prune_expired();
            let throttles = guard.throttler().prune_expired();
            if counters + throttles > 0 {
                debug!(counters, throttles, "Pruned expired rate limit state");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
