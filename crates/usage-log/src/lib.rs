// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batched, retrying, backpressure-aware pipeline for API usage logs.
//!
//! Request handlers hand usage records to a [`Pipeline`] without waiting on
//! storage. The pipeline buffers them in a bounded in-memory queue and flushes
//! them to a [`PersistenceSink`] either periodically or as soon as a batch
//! worth of records has accumulated.
//!
//! ```text
//!   producers ──log_usage──> BoundedQueue ──flush──> BatchProcessor ──write──> sink
//!                                 ^                        │
//!                                 └──── retries (head) ────┘
//! ```
//!
//! - [`config`]: pipeline limits, loaded from the environment
//! - [`retry`]: backoff and error classification
//! - [`queue`]: bounded FIFO with backpressure
//! - [`processor`]: prune, select, attempt, requeue
//! - [`scheduler`]: periodic timer and the single-flusher guard
//! - [`shutdown`]: signal handling and the final bounded flush
//! - [`stats`]: read-only health snapshot

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod entry;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod record;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod sink;
pub mod stats;

pub use config::PipelineConfig;
pub use entry::{LogPayload, QueuedEntry};
pub use error::{ConfigError, SinkError};
pub use pipeline::{Enqueued, Pipeline};
pub use processor::FlushReport;
pub use record::UsageRecord;
pub use retry::RetryPolicy;
pub use scheduler::FlushOutcome;
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome, ShutdownReason};
pub use sink::{HttpSink, PersistenceSink};
pub use stats::PipelineStats;
