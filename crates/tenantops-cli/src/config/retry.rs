//! Retry and backoff configuration.

use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};
use tenantops_core::retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, RetryPolicy,
};

use crate::TRACING_TARGET_CONFIG;

/// Retry policy applied to every remote call.
///
/// Delays double from `base_delay_ms` on each retry and are capped at
/// `max_delay_ms`.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[must_use = "config does nothing unless you use it"]
pub struct RetryConfig {
    /// Maximum attempts per remote call, including the first
    #[arg(long, env = "TENANTOPS_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[arg(long, env = "TENANTOPS_BASE_DELAY_MS", default_value_t = DEFAULT_BASE_DELAY.as_millis() as u64)]
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single retry delay in milliseconds
    #[arg(long, env = "TENANTOPS_MAX_DELAY_MS", default_value_t = DEFAULT_MAX_DELAY.as_millis() as u64)]
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY.as_millis() as u64
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY.as_millis() as u64
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Builds the retry policy.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_attempts` is zero or the base delay exceeds
    /// the maximum delay.
    pub fn policy(&self) -> tenantops_core::Result<RetryPolicy> {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    /// Logs the retry configuration.
    pub fn log(&self) {
        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            max_attempts = self.max_attempts,
            base_delay_ms = self.base_delay_ms,
            max_delay_ms = self.max_delay_ms,
            "Retry configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryConfig::default().policy().unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let zero = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert!(zero.policy().is_err());

        let inverted = RetryConfig {
            base_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..RetryConfig::default()
        };
        assert!(inverted.policy().is_err());
    }
}
