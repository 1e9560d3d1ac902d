use serde::Serialize;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::Result;

/// HTTP status sent when a quota is exceeded.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// An admission quota: at most `max_hits` per `window` for each identity.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct Policy {
    pub name: String,
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub window: Duration,
    #[validate(range(min = 1))]
    pub max_hits: u64,
    #[validate(range(min = 400, max = 599))]
    pub status_code: u16,
    pub message: String,
}

impl Policy {
    pub fn new(name: impl Into<String>, window: Duration, max_hits: u64) -> Self {
        Self {
            name: name.into(),
            window,
            max_hits,
            status_code: TOO_MANY_REQUESTS,
            message: "Too many requests, please try again later.".to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

/// Graduated slow-down for repeated attempts from one identity.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct ThrottlePolicy {
    /// Idle time after which an identity's attempts are forgotten.
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub window: Duration,
    /// Attempts allowed before any delay applies.
    pub delay_after: u64,
    /// Extra delay added per attempt past `delay_after`.
    #[serde(with = "humantime_serde")]
    pub delay_step: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Option<Duration>,
}

impl ThrottlePolicy {
    pub fn new(window: Duration, delay_after: u64, delay_step: Duration) -> Self {
        Self {
            window,
            delay_after,
            delay_step,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }

    /// Delay owed by the `hits`-th attempt since the last reset.
    pub fn delay_for(&self, hits: u64) -> Duration {
        let over = hits.saturating_sub(self.delay_after);
        let step_ms = self.delay_step.as_millis() as u64;
        let delay = Duration::from_millis(step_ms.saturating_mul(over));

        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// The named policies a service runs with, built once at startup.
#[derive(Debug, Clone, Serialize)]
pub struct Policies {
    pub global: Policy,
    pub auth: Policy,
    pub login: ThrottlePolicy,
}

impl Policies {
    pub fn validate(&self) -> Result<()> {
        self.global.validate()?;
        self.auth.validate()?;
        self.login.validate()?;
        Ok(())
    }
}

fn non_zero_duration(value: &Duration) -> std::result::Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("zero_duration"));
    }
    Ok(())
}
