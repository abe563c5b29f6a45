//! Configuration for the login guard.
//!
//! Defaults follow the common lockout policy: five failures lock a
//! (identifier, source IP) pair for thirty minutes, and fifteen minutes of
//! inactivity forgives outstanding failures.

use std::env;

use chrono::Duration;

use crate::error::ValidationError;

pub const ENV_MAX_FAILED_ATTEMPTS: &str = "BULWARK_MAX_FAILED_ATTEMPTS";
pub const ENV_LOCKOUT_MINUTES: &str = "BULWARK_LOCKOUT_MINUTES";
pub const ENV_RESET_WINDOW_MINUTES: &str = "BULWARK_RESET_WINDOW_MINUTES";
pub const ENV_MAX_UPDATE_RETRIES: &str = "BULWARK_MAX_UPDATE_RETRIES";
pub const ENV_FIELD_ENCRYPTION_KEY: &str = "BULWARK_FIELD_ENCRYPTION_KEY";

/// Upper bound for `lockout_duration` and `reset_window`, in days.
pub const MAX_POLICY_DAYS: i64 = 365;

/// Brute force protection policy for [`LoginAttemptTracker`](crate::services::LoginAttemptTracker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGuardConfig {
    /// Failures within the reset window that lock the bucket
    pub max_failures: u32,
    /// How long a bucket stays locked once the threshold is reached
    pub lockout_duration: Duration,
    /// Inactivity after which outstanding failures are forgiven
    pub reset_window: Duration,
    /// Compare-and-swap retries before a lost update is surfaced
    pub max_update_retries: u32,
}

impl Default for LoginGuardConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            lockout_duration: Duration::minutes(30),
            reset_window: Duration::minutes(15),
            max_update_retries: 3,
        }
    }
}

impl LoginGuardConfig {
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn with_lockout_duration(mut self, lockout_duration: Duration) -> Self {
        self.lockout_duration = lockout_duration;
        self
    }

    pub fn with_reset_window(mut self, reset_window: Duration) -> Self {
        self.reset_window = reset_window;
        self
    }

    pub fn with_max_update_retries(mut self, retries: u32) -> Self {
        self.max_update_retries = retries;
        self
    }

    /// Load the policy from `BULWARK_*` environment variables, falling back to
    /// the defaults for anything unset or unparsable.
    pub fn from_env() -> Result<Self, ValidationError> {
        let defaults = Self::default();
        let config = Self {
            max_failures: env_parse(ENV_MAX_FAILED_ATTEMPTS).unwrap_or(defaults.max_failures),
            lockout_duration: env_parse(ENV_LOCKOUT_MINUTES)
                .map(|minutes| minutes_to_duration(ENV_LOCKOUT_MINUTES, minutes))
                .transpose()?
                .unwrap_or(defaults.lockout_duration),
            reset_window: env_parse(ENV_RESET_WINDOW_MINUTES)
                .map(|minutes| minutes_to_duration(ENV_RESET_WINDOW_MINUTES, minutes))
                .transpose()?
                .unwrap_or(defaults.reset_window),
            max_update_retries: env_parse(ENV_MAX_UPDATE_RETRIES)
                .unwrap_or(defaults.max_update_retries),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject policies that could never lock or never unlock.
    ///
    /// Durations are capped at [`MAX_POLICY_DAYS`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        let max_duration = Duration::days(MAX_POLICY_DAYS);

        if self.max_failures == 0 {
            return Err(ValidationError::InvalidConfiguration(
                "max_failures must be greater than 0".to_string(),
            ));
        }

        if self.lockout_duration <= Duration::zero() {
            return Err(ValidationError::InvalidConfiguration(
                "lockout_duration must be positive".to_string(),
            ));
        }

        if self.reset_window <= Duration::zero() {
            return Err(ValidationError::InvalidConfiguration(
                "reset_window must be positive".to_string(),
            ));
        }

        if self.lockout_duration > max_duration {
            return Err(ValidationError::InvalidConfiguration(format!(
                "lockout_duration must not exceed {MAX_POLICY_DAYS} days"
            )));
        }

        if self.reset_window > max_duration {
            return Err(ValidationError::InvalidConfiguration(format!(
                "reset_window must not exceed {MAX_POLICY_DAYS} days"
            )));
        }

        Ok(())
    }
}

/// Read the field encryption secret from `BULWARK_FIELD_ENCRYPTION_KEY`.
pub fn field_encryption_key_from_env() -> Option<String> {
    env::var(ENV_FIELD_ENCRYPTION_KEY)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn minutes_to_duration(key: &str, minutes: i64) -> Result<Duration, ValidationError> {
    Duration::try_minutes(minutes).ok_or_else(|| {
        ValidationError::InvalidConfiguration(format!("{key} is out of range: {minutes}"))
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
