// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process shutdown: wait for a reason to stop, then give the queue one last
//! bounded chance to reach the sink.

use crate::entry::LogPayload;
use crate::pipeline::Pipeline;
use crate::processor::FlushReport;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Reasons for pipeline shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Graceful shutdown requested through the shutdown token (e.g. input closed)
    GracefulShutdown,
    /// User-initiated shutdown (Ctrl+C)
    UserInterrupt,
    /// SIGTERM
    Terminated,
    /// Fatal error reported through the fatal trigger, or signal handling failed
    FatalError,
}

/// How the final flush ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Completed(FlushReport),
    /// The final flush was abandoned. `pending` entries (queued plus in
    /// flight) were not persisted; queued ones are discarded and counted as
    /// shutdown losses.
    TimedOut { pending: usize },
}

impl<P: LogPayload> Pipeline<P> {
    /// Stops the flush timer and runs a final flush bounded by the configured
    /// shutdown timeout.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        self.shutdown_with_timeout(self.config().shutdown_timeout)
            .await
    }

    /// Stops the flush timer and runs a final flush bounded by `timeout`.
    /// A flush already running is waited for first, inside the same deadline.
    /// Calling it again is harmless; the timer stays stopped and the queue is
    /// flushed once more.
    ///
    /// On timeout the queue is emptied and the abandoned entries are counted
    /// in [`crate::stats::DropBreakdown::shutdown_lost`].
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> ShutdownOutcome {
        self.stop_timer();
        info!(
            "USAGE LOGS | Shutting down, flushing {} queued logs",
            self.stats().queue_size
        );

        let owned = AtomicBool::new(false);
        let final_flush = self.flush_after_idle(&owned);
        tokio::pin!(final_flush);

        tokio::select! {
            report = &mut final_flush => {
                info!(
                    "USAGE LOGS | Final flush finished: {} succeeded, {} dropped, {} left in queue",
                    report.succeeded, report.dropped, report.remaining
                );
                ShutdownOutcome::Completed(report)
            }
            () = tokio::time::sleep(timeout) => {
                // counted before the flush future is dropped so in-flight entries are included
                let pending = self.abandon(owned.load(Ordering::Acquire));
                warn!(
                    "USAGE LOGS | Final flush timed out after {} ms, {pending} logs were not persisted",
                    timeout.as_millis()
                );
                ShutdownOutcome::TimedOut { pending }
            }
        }
    }
}

/// Ties a pipeline's lifetime to the process: waits for a signal, a graceful
/// request or a fatal error, then shuts the pipeline down.
pub struct ShutdownCoordinator<P> {
    pipeline: Pipeline<P>,
    requested: CancellationToken,
    fatal: CancellationToken,
}

impl<P: LogPayload> ShutdownCoordinator<P> {
    #[must_use]
    pub fn new(pipeline: Pipeline<P>) -> Self {
        Self {
            pipeline,
            requested: CancellationToken::new(),
            fatal: CancellationToken::new(),
        }
    }

    /// Token that requests a graceful shutdown when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.requested.clone()
    }

    /// Token that reports a fatal error when cancelled.
    #[must_use]
    pub fn fatal_trigger(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Chains a panic hook that fires the fatal trigger, so a panicking task
    /// still gets the final flush.
    pub fn install_panic_hook(&self) {
        let fatal = self.fatal.clone();
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |panic_info| {
            fatal.cancel();
            previous(panic_info);
        }));
    }

    /// Wait for a shutdown signal
    ///
    /// This blocks until a shutdown is requested via:
    /// - SIGTERM/SIGINT (Ctrl+C)
    /// - the shutdown token
    /// - the fatal trigger
    pub async fn wait_for_signal(&self) -> ShutdownReason {
        tokio::select! {
            biased;

            () = self.fatal.cancelled() => {
                error!("USAGE LOGS | Fatal error reported, initiating shutdown");
                ShutdownReason::FatalError
            }
            () = self.requested.cancelled() => {
                info!("USAGE LOGS | Shutdown requested via cancellation token");
                ShutdownReason::GracefulShutdown
            }
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("USAGE LOGS | Received Ctrl+C, initiating shutdown");
                    ShutdownReason::UserInterrupt
                }
                Err(e) => {
                    error!("USAGE LOGS | Failed to listen for Ctrl+C: {e}");
                    ShutdownReason::FatalError
                }
            },
            result = terminate() => match result {
                Ok(()) => {
                    info!("USAGE LOGS | Received SIGTERM, initiating shutdown");
                    ShutdownReason::Terminated
                }
                Err(e) => {
                    error!("USAGE LOGS | Failed to listen for SIGTERM: {e}");
                    ShutdownReason::FatalError
                }
            },
        }
    }

    /// Waits for a shutdown reason, then flushes the pipeline one last time.
    pub async fn run(self) -> (ShutdownReason, ShutdownOutcome) {
        let reason = self.wait_for_signal().await;
        let outcome = self.pipeline.shutdown().await;
        (reason, outcome)
    }
}

#[cfg(unix)]
async fn terminate() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> std::io::Result<()> {
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::SinkError;
    use crate::scheduler::FlushOutcome;
    use crate::sink::PersistenceSink;
    use async_trait::async_trait;
    use std::borrow::Cow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;
    use tracing_test::traced_test;

    struct Ping;

    impl LogPayload for Ping {
        fn kind(&self) -> Cow<'_, str> {
            Cow::Borrowed("test.ping")
        }
    }

    /// Sink whose writes take `delay`, or never finish when `delay` is `None`.
    struct SlowSink {
        delay: Option<Duration>,
        writes: AtomicUsize,
    }

    impl SlowSink {
        fn new(delay: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                delay,
                writes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PersistenceSink<Ping> for SlowSink {
        async fn write(&self, _actor_id: &str, _record: &Ping) -> Result<(), SinkError> {
            match self.delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pipeline(sink: Arc<SlowSink>) -> Pipeline<Ping> {
        let config = PipelineConfig {
            batch_size: 10,
            max_queue_size: 100,
            shutdown_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        Pipeline::<Ping>::new(config, sink).unwrap()
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_shutdown_flushes_queue() {
        let sink = SlowSink::new(Some(Duration::from_millis(10)));
        let pipeline = pipeline(sink.clone());
        for _ in 0..3 {
            pipeline.log_usage("user-1", Ping);
        }

        let outcome = pipeline.shutdown().await;

        let ShutdownOutcome::Completed(report) = outcome else {
            panic!("expected completed shutdown, got {outcome:?}");
        };
        assert_eq!(report.succeeded, 3);
        assert_eq!(sink.writes.load(Ordering::SeqCst), 3);
        assert!(logs_contain("Final flush finished"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_shutdown_times_out_on_hanging_sink() {
        let pipeline = pipeline(SlowSink::new(None));
        for _ in 0..4 {
            pipeline.log_usage("user-1", Ping);
        }

        let start = Instant::now();
        let outcome = pipeline.shutdown().await;

        assert_eq!(outcome, ShutdownOutcome::TimedOut { pending: 4 });
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_millis(2_100));
        assert!(logs_contain("4 logs were not persisted"));
        // the abandoned flush released the guard and the in-flight gauge
        let stats = pipeline.stats();
        assert!(!stats.is_flushing);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.drops.shutdown_lost, 4);
        assert_eq!(stats.dropped_logs, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_shutdown_discards_queue() {
        let pipeline = pipeline(SlowSink::new(None));
        pipeline.log_usage("user-1", Ping);
        let shutdown = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.shutdown_with_timeout(Duration::from_secs(1)).await })
        };
        tokio::task::yield_now().await;
        // the final flush holds the first entry, later ones wait in the queue
        assert_eq!(pipeline.stats().in_flight, 1);
        for _ in 0..4 {
            pipeline.log_usage("user-2", Ping);
        }

        let outcome = shutdown.await.unwrap();

        assert_eq!(outcome, ShutdownOutcome::TimedOut { pending: 5 });
        let stats = pipeline.stats();
        assert_eq!(stats.queue_size, 0);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.drops.shutdown_lost, 5);
        assert_eq!(stats.dropped_logs, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_leaves_foreign_flush_entries_uncounted() {
        let pipeline = pipeline(SlowSink::new(None));
        pipeline.log_usage("user-1", Ping);
        let running = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.flush().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(pipeline.stats().in_flight, 1);
        pipeline.log_usage("user-2", Ping);
        pipeline.log_usage("user-3", Ping);

        let outcome = pipeline.shutdown_with_timeout(Duration::from_secs(1)).await;

        // the running flush still owns its entry and may settle it later
        assert_eq!(outcome, ShutdownOutcome::TimedOut { pending: 3 });
        let stats = pipeline.stats();
        assert_eq!(stats.queue_size, 0);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.drops.shutdown_lost, 2);
        running.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_timed_out_shutdown_counts_once() {
        let pipeline = pipeline(SlowSink::new(None));
        for _ in 0..3 {
            pipeline.log_usage("user-1", Ping);
        }

        let first = pipeline.shutdown().await;
        let second = pipeline.shutdown().await;

        assert_eq!(first, ShutdownOutcome::TimedOut { pending: 3 });
        assert!(matches!(second, ShutdownOutcome::Completed(_)));
        assert_eq!(pipeline.stats().drops.shutdown_lost, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_running_flush() {
        let sink = SlowSink::new(Some(Duration::from_millis(200)));
        let pipeline = pipeline(sink.clone());
        pipeline.log_usage("user-1", Ping);

        let running = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.flush().await })
        };
        tokio::task::yield_now().await;
        assert!(pipeline.stats().is_flushing);
        pipeline.log_usage("user-2", Ping);

        let outcome = pipeline.shutdown_with_timeout(Duration::from_secs(1)).await;

        let ShutdownOutcome::Completed(report) = outcome else {
            panic!("expected completed shutdown, got {outcome:?}");
        };
        assert_eq!(report.succeeded, 1);
        assert_eq!(sink.writes.load(Ordering::SeqCst), 2);
        assert!(matches!(
            running.await.unwrap(),
            FlushOutcome::Completed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let sink = SlowSink::new(Some(Duration::from_millis(10)));
        let pipeline = pipeline(sink.clone());
        pipeline.log_usage("user-1", Ping);

        assert!(matches!(
            pipeline.shutdown().await,
            ShutdownOutcome::Completed(_)
        ));
        let second = pipeline.shutdown().await;

        assert_eq!(
            second,
            ShutdownOutcome::Completed(FlushReport::default())
        );
        assert_eq!(sink.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_graceful_request() {
        let sink = SlowSink::new(Some(Duration::from_millis(10)));
        let pipeline = pipeline(sink.clone());
        pipeline.log_usage("user-1", Ping);

        let coordinator = ShutdownCoordinator::new(pipeline);
        coordinator.shutdown_token().cancel();
        let (reason, outcome) = coordinator.run().await;

        assert_eq!(reason, ShutdownReason::GracefulShutdown);
        assert!(matches!(outcome, ShutdownOutcome::Completed(_)));
        assert_eq!(sink.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_fatal_wins_over_request() {
        let coordinator = ShutdownCoordinator::new(pipeline(SlowSink::new(None)));
        coordinator.shutdown_token().cancel();
        coordinator.fatal_trigger().cancel();

        assert_eq!(
            coordinator.wait_for_signal().await,
            ShutdownReason::FatalError
        );
    }
}
