// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The pipeline aggregate and its producer-facing API.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use usage_log::{HttpSink, Pipeline, PipelineConfig, UsageRecord};
//!
//! let sink = Arc::new(HttpSink::new(url, None, Duration::from_secs(5))?);
//! let pipeline = Pipeline::start(PipelineConfig::from_env()?, sink)?;
//!
//! // cheap to clone, hand one to every request handler
//! let handle = pipeline.clone();
//! handle.log_usage("user-42", UsageRecord::new("openai", "chat").with_tokens(120, 480));
//!
//! pipeline.shutdown().await;
//! ```

use crate::config::PipelineConfig;
use crate::entry::{LogPayload, QueuedEntry};
use crate::error::ConfigError;
use crate::processor::{BatchProcessor, FlushReport};
use crate::queue::{lock, BoundedQueue, Push};
use crate::scheduler::{FlushOutcome, FlushScheduler, FlushState};
use crate::sink::PersistenceSink;
use crate::stats::{DropCounters, PipelineStats};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What [`Pipeline::enqueue`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Appended to the queue, which now holds this many entries
    Queued(usize),
    /// Discarded because the queue was full
    Dropped,
    /// Discarded because the actor id was empty. Counted with the
    /// non-retryable drops.
    Rejected,
}

struct Shared<P> {
    config: PipelineConfig,
    queue: Mutex<BoundedQueue<QueuedEntry<P>>>,
    flush_state: FlushState,
    drops: DropCounters,
    in_flight: AtomicUsize,
    processor: BatchProcessor<P>,
    timer: CancellationToken,
}

/// Handle to a usage log pipeline. Clones share the same queue.
pub struct Pipeline<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for Pipeline<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Non-owning handle held by the flush timer, so dropping every [`Pipeline`]
/// frees the queue and stops the timer at its next tick.
pub(crate) struct WeakPipeline<P> {
    shared: Weak<Shared<P>>,
}

impl<P> WeakPipeline<P> {
    pub(crate) fn upgrade(&self) -> Option<Pipeline<P>> {
        self.shared.upgrade().map(|shared| Pipeline { shared })
    }
}

impl<P: LogPayload> Pipeline<P> {
    /// Builds a pipeline without starting its flush timer. Flushes then only
    /// happen through the batch threshold or explicit [`Pipeline::flush`] calls.
    pub fn new(
        config: PipelineConfig,
        sink: Arc<dyn PersistenceSink<P>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let processor = BatchProcessor::new(
            sink,
            config.retry,
            config.batch_size,
            config.max_retries,
            config.max_log_age,
        );
        let shared = Shared {
            queue: Mutex::new(BoundedQueue::new(config.max_queue_size)),
            flush_state: FlushState::default(),
            drops: DropCounters::default(),
            in_flight: AtomicUsize::new(0),
            processor,
            timer: CancellationToken::new(),
            config,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Builds a pipeline and spawns its periodic flush timer on the current
    /// runtime. Fails with [`ConfigError::NoRuntime`] outside a Tokio runtime.
    pub fn start(
        config: PipelineConfig,
        sink: Arc<dyn PersistenceSink<P>>,
    ) -> Result<Self, ConfigError> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        let pipeline = Self::new(config, sink)?;
        FlushScheduler::spawn(
            &runtime,
            pipeline.downgrade(),
            pipeline.shared.config.flush_interval,
            pipeline.shared.timer.clone(),
        );
        debug!(
            "USAGE LOGS | Pipeline started, flushing every {} ms",
            pipeline.shared.config.flush_interval.as_millis()
        );
        Ok(pipeline)
    }

    /// Records one API usage event. Never blocks and never fails; a record
    /// that cannot be queued is counted as dropped.
    pub fn log_usage(&self, actor_id: impl Into<String>, record: P) {
        self.enqueue(actor_id, record);
    }

    /// Same as [`Pipeline::log_usage`] but reports what happened.
    pub fn enqueue(&self, actor_id: impl Into<String>, payload: P) -> Enqueued {
        let actor_id = actor_id.into();
        if actor_id.is_empty() {
            warn!(
                "USAGE LOGS | Rejecting {} log without actor id",
                payload.kind()
            );
            self.shared.drops.add_non_retryable(1);
            return Enqueued::Rejected;
        }

        let now = Instant::now();
        let pushed = lock(&self.shared.queue).push(QueuedEntry::new(actor_id, payload, now), now);

        match pushed {
            Push::Accepted(len) => {
                if len >= self.shared.config.batch_size && !self.shared.flush_state.is_flushing() {
                    FlushScheduler::trigger(self);
                }
                Enqueued::Queued(len)
            }
            Push::Rejected { warn } => {
                self.shared.drops.add_backpressure(1);
                if let Some(dropped) = warn {
                    warn!(
                        "USAGE LOGS | Queue full ({} entries), dropped {dropped} logs",
                        self.shared.config.max_queue_size
                    );
                }
                Enqueued::Dropped
            }
        }
    }

    /// Runs one flush pass unless another one is already running.
    pub async fn flush(&self) -> FlushOutcome {
        let Some(_permit) = self.shared.flush_state.try_begin() else {
            return FlushOutcome::Skipped;
        };
        let report = self
            .shared
            .processor
            .process(
                &self.shared.queue,
                &self.shared.drops,
                &self.shared.in_flight,
            )
            .await;
        FlushOutcome::Completed(report)
    }

    /// Point-in-time snapshot for health checks. Mutates nothing.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        let now = Instant::now();
        let (queue_size, oldest) = {
            let queue = lock(&self.shared.queue);
            let oldest = queue.iter().map(QueuedEntry::enqueued_at).min();
            (queue.len(), oldest)
        };
        let drops = self.shared.drops.snapshot();
        let oldest_log_age_ms = oldest.map_or(0, |enqueued_at| {
            u64::try_from(now.saturating_duration_since(enqueued_at).as_millis())
                .unwrap_or(u64::MAX)
        });

        PipelineStats {
            queue_size,
            max_queue_size: self.shared.config.max_queue_size,
            is_flushing: self.shared.flush_state.is_flushing(),
            in_flight: self.shared.in_flight.load(Ordering::Acquire),
            dropped_logs: drops.total(),
            drops,
            oldest_log_age_ms,
        }
    }

    /// True while the queue stays below the configured share of its capacity.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let stats = self.stats();
        (stats.queue_size as f64) < stats.max_queue_size as f64 * self.shared.config.health_threshold
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub(crate) fn downgrade(&self) -> WeakPipeline<P> {
        WeakPipeline {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub(crate) fn stop_timer(&self) {
        self.shared.timer.cancel();
    }

    /// Waits for a running flush to finish, then runs one. `owned` is set
    /// once this call holds the flush permit.
    pub(crate) async fn flush_after_idle(&self, owned: &AtomicBool) -> FlushReport {
        loop {
            if let Some(_permit) = self.shared.flush_state.try_begin() {
                owned.store(true, Ordering::Release);
                return self
                    .shared
                    .processor
                    .process(
                        &self.shared.queue,
                        &self.shared.drops,
                        &self.shared.in_flight,
                    )
                    .await;
            }
            self.shared.flush_state.wait_idle().await;
        }
    }

    /// Gives up on every entry not yet persisted and returns how many there
    /// were, in-flight ones included. Queued entries are discarded. In-flight
    /// entries are counted as lost only when `own_flush` holds them; a flush
    /// started elsewhere may still settle them.
    pub(crate) fn abandon(&self, own_flush: bool) -> usize {
        let (discarded, in_flight) = {
            let mut queue = lock(&self.shared.queue);
            let queued = queue.len();
            let discarded = queue.take_front(queued).len();
            (discarded, self.shared.in_flight.load(Ordering::Acquire))
        };
        let lost = if own_flush {
            discarded + in_flight
        } else {
            discarded
        };
        self.shared.drops.add_shutdown_lost(lost as u64);
        discarded + in_flight
    }
}
