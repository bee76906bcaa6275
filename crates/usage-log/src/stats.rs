// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative drop counters, one per cause. Never reset.
#[derive(Debug, Default)]
pub(crate) struct DropCounters {
    backpressure: AtomicU64,
    expired: AtomicU64,
    retries_exhausted: AtomicU64,
    non_retryable: AtomicU64,
    shutdown_lost: AtomicU64,
}

impl DropCounters {
    pub(crate) fn add_backpressure(&self, count: u64) {
        self.backpressure.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_expired(&self, count: u64) {
        self.expired.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_retries_exhausted(&self, count: u64) {
        self.retries_exhausted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_non_retryable(&self, count: u64) {
        self.non_retryable.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_shutdown_lost(&self, count: u64) {
        self.shutdown_lost.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DropBreakdown {
        DropBreakdown {
            backpressure: self.backpressure.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            non_retryable: self.non_retryable.load(Ordering::Relaxed),
            shutdown_lost: self.shutdown_lost.load(Ordering::Relaxed),
        }
    }
}

/// Dropped entries by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DropBreakdown {
    /// Rejected at enqueue because the queue was full
    pub backpressure: u64,
    /// Pruned for exceeding the maximum log age
    pub expired: u64,
    /// Failed with retryable errors more often than allowed
    pub retries_exhausted: u64,
    /// Rejected by the sink with a permanent error
    pub non_retryable: u64,
    /// Abandoned when the final flush ran out of time
    pub shutdown_lost: u64,
}

impl DropBreakdown {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.backpressure
            + self.expired
            + self.retries_exhausted
            + self.non_retryable
            + self.shutdown_lost
    }
}

/// Point-in-time view of a pipeline, for health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub queue_size: usize,
    pub max_queue_size: usize,
    pub is_flushing: bool,
    /// Entries taken out of the queue by the running flush and not yet settled
    pub in_flight: usize,
    /// Cumulative number of entries dropped for any reason
    pub dropped_logs: u64,
    pub drops: DropBreakdown,
    /// Age of the oldest queued entry, 0 when the queue is empty
    pub oldest_log_age_ms: u64,
}
