// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flush timing and the single-flusher guard.
//!
//! A flush runs either on the periodic timer or eagerly when enqueue crosses
//! the batch threshold. Only one flush body runs at a time. A request that
//! arrives while a flush is running is skipped rather than queued; the next
//! tick or threshold crossing picks up what is left.

use crate::entry::LogPayload;
use crate::pipeline::{Pipeline, WeakPipeline};
use crate::processor::FlushReport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of [`Pipeline::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush was already running; nothing was done.
    Skipped,
    Completed(FlushReport),
}

/// `Idle -> Flushing -> Idle`, never `Flushing -> Flushing`.
#[derive(Debug, Default)]
pub(crate) struct FlushState {
    flushing: AtomicBool,
    idle: Notify,
}

impl FlushState {
    /// Enters `Flushing` unless already there.
    pub(crate) fn try_begin(&self) -> Option<FlushPermit<'_>> {
        self.flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlushPermit { state: self })
    }

    pub(crate) fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Resolves once no flush is running.
    pub(crate) async fn wait_idle(&self) {
        loop {
            // registered before the check so a release in between is not missed
            let idle = self.idle.notified();
            if !self.is_flushing() {
                return;
            }
            idle.await;
        }
    }
}

/// Held for the duration of a flush body. Dropping it, including when the
/// flush future is cancelled, returns the state to `Idle`.
pub(crate) struct FlushPermit<'a> {
    state: &'a FlushState,
}

impl Drop for FlushPermit<'_> {
    fn drop(&mut self) {
        self.state.flushing.store(false, Ordering::Release);
        self.state.idle.notify_waiters();
    }
}

pub(crate) struct FlushScheduler;

impl FlushScheduler {
    /// Spawns the periodic flush timer on `runtime`. It stops when `cancel`
    /// fires or once every pipeline handle is gone; a flush already running
    /// at that moment is allowed to finish.
    pub(crate) fn spawn<P: LogPayload>(
        runtime: &Handle,
        weak: WeakPipeline<P>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // discard first tick, which is instantaneous

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(pipeline) = weak.upgrade() else {
                            debug!("USAGE LOGS | Pipeline dropped without shutdown");
                            break;
                        };
                        if let FlushOutcome::Skipped = pipeline.flush().await {
                            debug!("USAGE LOGS | Periodic flush skipped, flush already running");
                        }
                    }
                }
            }
            debug!("USAGE LOGS | Flush timer stopped");
        })
    }

    /// Runs a flush on the current runtime without waiting for it. Outside a
    /// runtime the trigger is dropped and the timer catches up.
    pub(crate) fn trigger<P: LogPayload>(pipeline: &Pipeline<P>) {
        match Handle::try_current() {
            Ok(runtime) => {
                let pipeline = pipeline.clone();
                runtime.spawn(async move {
                    pipeline.flush().await;
                });
            }
            Err(_) => debug!("USAGE LOGS | No runtime for eager flush, waiting for timer"),
        }
    }
}
