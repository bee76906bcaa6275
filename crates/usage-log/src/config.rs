// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MAX_LOG_AGE: Duration = Duration::from_secs(5 * 60);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEALTH_THRESHOLD: f64 = 0.9;

/// Limits and timings of a [`crate::Pipeline`].
///
/// Built once at process start and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Queue length that triggers an eager flush. A flush pass handles at most
    /// twice this many entries.
    pub batch_size: usize,
    /// Period of the flush timer
    pub flush_interval: Duration,
    /// Hard cap on queued entries; enqueues beyond it are dropped
    pub max_queue_size: usize,
    /// Retries allowed per entry before it is dropped
    pub max_retries: u32,
    /// Entries older than this are pruned without reaching the sink
    pub max_log_age: Duration,
    /// Upper bound on the final flush during shutdown
    pub shutdown_timeout: Duration,
    /// Backoff applied to retried entries
    pub retry: RetryPolicy,
    /// Fraction of `max_queue_size` under which the pipeline reports healthy
    pub health_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            max_log_age: DEFAULT_MAX_LOG_AGE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            retry: RetryPolicy::default(),
            health_threshold: DEFAULT_HEALTH_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    /// Create configuration from `USAGE_LOG_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let retry_defaults = RetryPolicy::default();

        let config = Self {
            batch_size: env_or("USAGE_LOG_BATCH_SIZE", defaults.batch_size),
            flush_interval: env_millis_or("USAGE_LOG_FLUSH_INTERVAL_MS", defaults.flush_interval),
            max_queue_size: env_or("USAGE_LOG_MAX_QUEUE_SIZE", defaults.max_queue_size),
            max_retries: env_or("USAGE_LOG_MAX_RETRIES", defaults.max_retries),
            max_log_age: env_millis_or("USAGE_LOG_MAX_AGE_MS", defaults.max_log_age),
            shutdown_timeout: env_millis_or(
                "USAGE_LOG_SHUTDOWN_TIMEOUT_MS",
                defaults.shutdown_timeout,
            ),
            retry: RetryPolicy {
                base_delay: env_millis_or("USAGE_LOG_RETRY_BASE_MS", retry_defaults.base_delay),
                max_delay: env_millis_or("USAGE_LOG_RETRY_MAX_MS", retry_defaults.max_delay),
                jitter: env_millis_or("USAGE_LOG_RETRY_JITTER_MS", retry_defaults.jitter),
            },
            health_threshold: defaults.health_threshold,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "max_queue_size must be greater than 0".to_string(),
            ));
        }
        if self.max_queue_size < self.batch_size {
            return Err(ConfigError::Invalid(format!(
                "max_queue_size ({}) must be at least batch_size ({})",
                self.max_queue_size, self.batch_size
            )));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "flush_interval must be greater than 0".to_string(),
            ));
        }
        if self.max_log_age.is_zero() {
            return Err(ConfigError::Invalid(
                "max_log_age must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(ConfigError::Invalid(
                "retry max_delay must not be smaller than base_delay".to_string(),
            ));
        }
        if !(self.health_threshold > 0.0 && self.health_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "health_threshold must be in (0, 1], got {}",
                self.health_threshold
            )));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {key}={raw:?}, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_millis_or(key: &str, default: Duration) -> Duration {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                warn!("Ignoring unparsable {key}={raw:?}, using default");
                default
            }
        },
        Err(_) => default,
    }
}
