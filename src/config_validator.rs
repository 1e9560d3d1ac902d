use std::time::Duration;

use crate::error::GuardError;

/// Validates configuration values for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), GuardError> {
        if url.is_empty() {
            return Err(GuardError::Configuration(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(GuardError::Configuration(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates that a numeric setting is non-zero
    pub fn validate_positive(name: &str, value: u64) -> Result<(), GuardError> {
        if value == 0 {
            return Err(GuardError::Configuration(format!(
                "{} must be greater than 0",
                name
            )));
        }

        Ok(())
    }

    /// Converts a window given in minutes, rejecting zero and values whose
    /// millisecond count does not fit in a u64.
    pub fn window_minutes(name: &str, minutes: u64) -> Result<Duration, GuardError> {
        Self::validate_positive(name, minutes)?;
        minutes
            .checked_mul(60_000)
            .map(Duration::from_millis)
            .ok_or_else(|| GuardError::Configuration(format!("{} is too large: {}", name, minutes)))
    }

    /// Validates the IPv6 aggregation prefix length
    pub fn validate_ipv6_prefix(prefix_len: u8) -> Result<(), GuardError> {
        if prefix_len > 128 {
            return Err(GuardError::Configuration(format!(
                "IPV6_PREFIX_LEN must be between 0 and 128, got {}",
                prefix_len
            )));
        }

        Ok(())
    }
}
