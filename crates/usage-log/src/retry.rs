// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backoff computation and retryability classification for failed writes.

use crate::error::SinkError;
use std::time::Duration;

/// Exponential backoff with additive jitter.
///
/// The delay for attempt index `k` is `min(base_delay * 2^k, max_delay)` plus a
/// uniformly random offset in `[0, jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            jitter: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry with the given zero-based attempt index.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.exponential_delay(attempt) + self.random_jitter()
    }

    /// Deterministic part of [`RetryPolicy::backoff_delay`].
    #[must_use]
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        // 2^31 already saturates any realistic max_delay
        let factor = 1_u32 << attempt.min(31);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    fn random_jitter(&self) -> Duration {
        let range = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        if range == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(fastrand::u64(..range))
    }
}

/// Returns true when a failed write may succeed if attempted again.
///
/// Transport failures, pool exhaustion, server errors and rate limiting are
/// transient. Anything that says the record itself is unacceptable is not.
#[must_use]
pub fn is_retryable_error(error: &SinkError) -> bool {
    match error {
        SinkError::Connection(_)
        | SinkError::Timeout
        | SinkError::PoolExhausted
        | SinkError::Server { .. }
        | SinkError::RateLimited => true,
        SinkError::Client { .. } | SinkError::Validation(_) | SinkError::Serialization(_) => false,
    }
}
