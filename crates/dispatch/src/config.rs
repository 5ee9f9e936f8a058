//! Runtime tuning knobs, read from the environment with sane defaults.

use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Tuning parameters of the dispatch pipeline.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum handler invocation attempts before giving up.
    pub retry_max_attempts: u32,
    /// Delay between retry attempts.
    pub retry_delay: Duration,
    /// Cap on commands and queries awaiting replies at once.
    pub max_in_flight: usize,
    /// Default deadline for `execute` calls.
    pub execute_timeout: Duration,
    /// How long handler idempotency records are kept.
    pub handler_record_retention: Duration,
}

impl RuntimeConfig {
    /// Reads the configuration from the environment, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self {
            retry_max_attempts: env_u64("RETRY_MAX_ATTEMPTS", 5) as u32,
            retry_delay: Duration::from_millis(env_u64("RETRY_DELAY_MS", 1000)),
            max_in_flight: env_u64("MAX_IN_FLIGHT", 2000) as usize,
            execute_timeout: Duration::from_millis(env_u64("EXECUTE_TIMEOUT_MS", 30_000)),
            handler_record_retention: Duration::from_secs(env_u64(
                "HANDLER_RECORD_RETENTION_SECS",
                3600,
            )),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: 5,
            retry_delay: Duration::from_millis(1000),
            max_in_flight: 2000,
            execute_timeout: Duration::from_millis(30_000),
            handler_record_retention: Duration::from_secs(3600),
        }
    }
}
