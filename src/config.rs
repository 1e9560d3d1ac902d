use envconfig::Envconfig;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::allowlist::Allowlist;
use crate::config_validator::ConfigValidator;
use crate::error::Result;
use crate::identity::IdentityResolver;
use crate::policy::{Policies, Policy, ThrottlePolicy};
use crate::rate_limiter::FailurePolicy;
use crate::window::WindowStrategy;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "0.0.0.0:5000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL. Unset means counters live in process memory.
    #[envconfig(from = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[envconfig(from = "GLOBAL_RATE_LIMIT_WINDOW_MIN", default = "15")]
    pub global_window_min: u64,

    #[envconfig(from = "GLOBAL_RATE_LIMIT_MAX_REQUESTS", default = "100")]
    pub global_max_requests: u64,

    #[envconfig(from = "AUTH_RATE_LIMIT_WINDOW_MIN", default = "10")]
    pub auth_window_min: u64,

    #[envconfig(from = "AUTH_RATE_LIMIT_MAX_REQUESTS", default = "10")]
    pub auth_max_requests: u64,

    #[envconfig(from = "LOGIN_THROTTLE_WINDOW_MIN", default = "15")]
    pub login_window_min: u64,

    /// Login attempts allowed before delays start
    #[envconfig(from = "LOGIN_THROTTLE_DELAY_AFTER", default = "5")]
    pub login_delay_after: u64,

    /// Delay added per attempt past the threshold, in milliseconds
    #[envconfig(from = "LOGIN_THROTTLE_DELAY_MS", default = "500")]
    pub login_delay_ms: u64,

    /// Upper bound on a single login delay in milliseconds, 0 for no bound
    #[envconfig(from = "LOGIN_THROTTLE_MAX_DELAY_MS", default = "20000")]
    pub login_max_delay_ms: u64,

    /// Comma-separated IP addresses exempt from all limits
    #[envconfig(from = "RATE_LIMIT_WHITELIST", default = "")]
    pub allowlist: String,

    /// Reverse-proxy hops whose X-Forwarded-For entries are trusted
    #[envconfig(from = "TRUST_PROXY_HOPS", default = "0")]
    pub trust_proxy_hops: usize,

    #[envconfig(from = "IPV6_PREFIX_LEN", default = "64")]
    pub ipv6_prefix_len: u8,

    /// "fixed" or "sliding"
    #[envconfig(from = "RATE_LIMIT_STRATEGY", default = "fixed")]
    pub strategy: String,

    /// Admit requests when the counter store fails
    #[envconfig(from = "RATE_LIMIT_FAIL_OPEN", default = "true")]
    pub fail_open: bool,

    /// Timeout for a single distributed store call in milliseconds
    #[envconfig(from = "STORE_TIMEOUT_MS", default = "50")]
    pub store_timeout_ms: u64,

    /// In-memory counter sweep interval in seconds
    #[envconfig(from = "CLEANUP_INTERVAL", default = "60")]
    pub cleanup_interval_secs: u64,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load and validate configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config::init_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a map of variables
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        let config = Config::init_from_hashmap(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = self.redis_url() {
            ConfigValidator::validate_redis_url(url)?;
        }
        ConfigValidator::window_minutes("GLOBAL_RATE_LIMIT_WINDOW_MIN", self.global_window_min)?;
        ConfigValidator::validate_positive("GLOBAL_RATE_LIMIT_MAX_REQUESTS", self.global_max_requests)?;
        ConfigValidator::window_minutes("AUTH_RATE_LIMIT_WINDOW_MIN", self.auth_window_min)?;
        ConfigValidator::validate_positive("AUTH_RATE_LIMIT_MAX_REQUESTS", self.auth_max_requests)?;
        ConfigValidator::window_minutes("LOGIN_THROTTLE_WINDOW_MIN", self.login_window_min)?;
        ConfigValidator::validate_positive("STORE_TIMEOUT_MS", self.store_timeout_ms)?;
        ConfigValidator::validate_positive("CLEANUP_INTERVAL", self.cleanup_interval_secs)?;
        ConfigValidator::validate_ipv6_prefix(self.ipv6_prefix_len)?;

        self.window_strategy()?;
        Allowlist::parse(&self.allowlist, &self.identity_resolver())?;
        self.policies()?;
        Ok(())
    }

    /// Redis URL, ignoring an empty value
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_deref().map(str::trim).filter(|url| !url.is_empty())
    }

    pub fn policies(&self) -> Result<Policies> {
        let global = Policy::new(
            "global",
            ConfigValidator::window_minutes("GLOBAL_RATE_LIMIT_WINDOW_MIN", self.global_window_min)?,
            self.global_max_requests,
        )
        .with_message(format!(
            "Too many requests from this IP, please try again after {} minutes.",
            self.global_window_min
        ));

        let auth = Policy::new(
            "auth",
            ConfigValidator::window_minutes("AUTH_RATE_LIMIT_WINDOW_MIN", self.auth_window_min)?,
            self.auth_max_requests,
        )
        .with_message(format!(
            "Too many attempts on authentication routes, please try again after {} minutes.",
            self.auth_window_min
        ));

        let max_delay = (self.login_max_delay_ms > 0).then(|| Duration::from_millis(self.login_max_delay_ms));
        let login = ThrottlePolicy::new(
            ConfigValidator::window_minutes("LOGIN_THROTTLE_WINDOW_MIN", self.login_window_min)?,
            self.login_delay_after,
            Duration::from_millis(self.login_delay_ms),
        )
        .with_max_delay(max_delay);

        let policies = Policies { global, auth, login };
        policies.validate()?;
        Ok(policies)
    }

    pub fn identity_resolver(&self) -> IdentityResolver {
        IdentityResolver::new(self.trust_proxy_hops, self.ipv6_prefix_len)
    }

    pub fn window_strategy(&self) -> Result<WindowStrategy> {
        self.strategy.parse()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        if self.fail_open {
            FailurePolicy::Open
        } else {
            FailurePolicy::Closed
        }
    }

    /// Per-call store timeout: the configured value, never more than a tenth
    /// of the shortest admission window.
    pub fn store_timeout(&self) -> Duration {
        let shortest_window = Duration::from_secs(self.global_window_min.min(self.auth_window_min).saturating_mul(60));
        Duration::from_millis(self.store_timeout_ms)
            .min(shortest_window / 10)
            .max(Duration::from_millis(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            redis_url: None,
            global_window_min: 15,
            global_max_requests: 100,
            auth_window_min: 10,
            auth_max_requests: 10,
            login_window_min: 15,
            login_delay_after: 5,
            login_delay_ms: 500,
            login_max_delay_ms: 20_000,
            allowlist: String::new(),
            trust_proxy_hops: 0,
            ipv6_prefix_len: 64,
            strategy: "fixed".to_string(),
            fail_open: true,
            store_timeout_ms: 50,
            cleanup_interval_secs: 60,
            log_level: "info".to_string(),
        }
    }
}
