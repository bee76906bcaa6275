// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One flush pass over the queue.
//!
//! ```text
//!   queue ──prune──> expired (dropped, warned)
//!     │
//!     └──take ≤ 2×batch──> attempts (concurrent) ──┬── ok ──────> done
//!                                                  ├── retry ───> queue head
//!                                                  └── give up ─> dropped
//! ```

use crate::entry::{LogPayload, QueuedEntry};
use crate::error::SinkError;
use crate::queue::{lock, BoundedQueue};
use crate::retry::{is_retryable_error, RetryPolicy};
use crate::sink::PersistenceSink;
use crate::stats::DropCounters;
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Outcome counts of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries removed for exceeding the maximum age
    pub pruned: usize,
    /// Entries handed to the sink
    pub attempted: usize,
    pub succeeded: usize,
    /// Entries put back at the head of the queue for another attempt
    pub retrying: usize,
    /// Attempted entries given up on
    pub dropped: usize,
    /// Entries left in the queue that this pass did not touch
    pub remaining: usize,
}

/// What happens to an entry after its attempt.
#[derive(Debug)]
enum Settled<P> {
    Persisted,
    Retry(QueuedEntry<P>),
    Dropped {
        entry: QueuedEntry<P>,
        error: SinkError,
        retryable: bool,
    },
}

fn settle<P>(
    mut entry: QueuedEntry<P>,
    result: Result<(), SinkError>,
    max_retries: u32,
) -> Settled<P> {
    match result {
        Ok(()) => Settled::Persisted,
        Err(error) => {
            let retryable = is_retryable_error(&error);
            if retryable && entry.retry_count < max_retries {
                entry.retry_count += 1;
                Settled::Retry(entry)
            } else {
                Settled::Dropped {
                    entry,
                    error,
                    retryable,
                }
            }
        }
    }
}

/// Keeps the in-flight gauge accurate even when a flush is cancelled midway.
struct InFlight<'a> {
    gauge: &'a AtomicUsize,
    count: usize,
}

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a AtomicUsize, count: usize) -> Self {
        gauge.fetch_add(count, Ordering::AcqRel);
        Self { gauge, count }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.gauge.fetch_sub(self.count, Ordering::AcqRel);
    }
}

pub(crate) struct BatchProcessor<P> {
    sink: Arc<dyn PersistenceSink<P>>,
    retry: RetryPolicy,
    batch_size: usize,
    max_retries: u32,
    max_log_age: Duration,
}

impl<P: LogPayload> BatchProcessor<P> {
    pub(crate) fn new(
        sink: Arc<dyn PersistenceSink<P>>,
        retry: RetryPolicy,
        batch_size: usize,
        max_retries: u32,
        max_log_age: Duration,
    ) -> Self {
        Self {
            sink,
            retry,
            batch_size,
            max_retries,
            max_log_age,
        }
    }

    pub(crate) async fn process(
        &self,
        queue: &Mutex<BoundedQueue<QueuedEntry<P>>>,
        drops: &DropCounters,
        in_flight: &AtomicUsize,
    ) -> FlushReport {
        let now = Instant::now();
        let (expired, batch, guard) = {
            let mut queue = lock(queue);
            let expired = queue.prune(|entry| entry.age(now) > self.max_log_age);
            let batch = queue.take_front(self.batch_size.saturating_mul(2));
            // entered under the lock so stats never see an entry in neither place
            let guard = InFlight::enter(in_flight, batch.len());
            (expired, batch, guard)
        };

        for entry in &expired {
            warn!(
                "USAGE LOGS | Dropping {} log for {}: older than {} ms",
                entry.payload.kind(),
                entry.actor_id,
                self.max_log_age.as_millis()
            );
        }
        drops.add_expired(expired.len() as u64);

        let mut report = FlushReport {
            pruned: expired.len(),
            attempted: batch.len(),
            ..FlushReport::default()
        };
        if batch.is_empty() {
            return report;
        }

        debug!("USAGE LOGS | Flushing {} entries", batch.len());
        let results = join_all(batch.into_iter().map(|entry| self.attempt(entry))).await;

        let mut retries = Vec::new();
        for (entry, result) in results {
            match settle(entry, result, self.max_retries) {
                Settled::Persisted => report.succeeded += 1,
                Settled::Retry(entry) => {
                    debug!(
                        "USAGE LOGS | Will retry {} log for {} (retry {}/{})",
                        entry.payload.kind(),
                        entry.actor_id,
                        entry.retry_count,
                        self.max_retries
                    );
                    retries.push(entry);
                }
                Settled::Dropped {
                    entry,
                    error,
                    retryable,
                } => {
                    if retryable {
                        error!(
                            "USAGE LOGS | Dropping {} log for {} after {} retries: {error}",
                            entry.payload.kind(),
                            entry.actor_id,
                            entry.retry_count
                        );
                        drops.add_retries_exhausted(1);
                    } else {
                        error!(
                            "USAGE LOGS | Dropping {} log for {}, sink rejected it: {error}",
                            entry.payload.kind(),
                            entry.actor_id
                        );
                        drops.add_non_retryable(1);
                    }
                    report.dropped += 1;
                }
            }
        }

        let retry_count = retries.len();
        let (overflow, queued) = {
            let mut queue = lock(queue);
            let overflow = queue.requeue_front(retries);
            (overflow, queue.len())
        };
        drop(guard);

        if !overflow.is_empty() {
            warn!(
                "USAGE LOGS | Queue full, dropping {} entries that were due for retry",
                overflow.len()
            );
            drops.add_backpressure(overflow.len() as u64);
            report.dropped += overflow.len();
        }

        report.retrying = retry_count - overflow.len();
        report.remaining = queued - report.retrying;

        if report.retrying > 0 {
            info!(
                "USAGE LOGS | Flush finished: {} succeeded, {} retrying, {} remaining",
                report.succeeded, report.retrying, report.remaining
            );
        }
        report
    }

    async fn attempt(&self, entry: QueuedEntry<P>) -> (QueuedEntry<P>, Result<(), SinkError>) {
        if entry.retry_count > 0 {
            sleep(self.retry.backoff_delay(entry.retry_count - 1)).await;
        }
        let result = self.sink.write(&entry.actor_id, &entry.payload).await;
        (entry, result)
    }
}
