// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use usage_log::{
    ConfigError, HttpSink, PersistenceSink, Pipeline, PipelineConfig, ShutdownCoordinator,
    ShutdownOutcome, ShutdownReason, UsageRecord,
};

const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(5);

/// One line of input.
#[derive(Debug, Deserialize)]
struct IngestLine {
    actor_id: String,
    record: UsageRecord,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let log_level = env::var("USAGE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| "info".to_string());

    let env_filter = format!("hyper=off,reqwest=off,{log_level}");
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse log level in configuration")?,
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");

    let sink: Arc<dyn PersistenceSink<UsageRecord>> = Arc::new(sink_from_env()?);
    let config = PipelineConfig::from_env()?;
    info!(
        "Starting usage log agent: batch_size={}, flush_interval={} ms, max_queue_size={}",
        config.batch_size,
        config.flush_interval.as_millis(),
        config.max_queue_size
    );
    let pipeline = Pipeline::start(config, sink)?;

    let coordinator = ShutdownCoordinator::new(pipeline.clone());
    coordinator.install_panic_hook();

    let reader = tokio::spawn(read_until_eof(
        pipeline.clone(),
        coordinator.shutdown_token(),
    ));

    let (reason, outcome) = coordinator.run().await;
    reader.abort();

    let stats = pipeline.stats();
    info!(
        "Usage log agent stopped: {} logs dropped in total, {} left in queue",
        stats.dropped_logs, stats.queue_size
    );

    match (reason, outcome) {
        (ShutdownReason::FatalError, _) => anyhow::bail!("shut down after a fatal error"),
        (_, ShutdownOutcome::TimedOut { pending }) => {
            anyhow::bail!("final flush timed out with {pending} logs pending")
        }
        (_, ShutdownOutcome::Completed(_)) => Ok(()),
    }
}

fn sink_from_env() -> Result<HttpSink, ConfigError> {
    let url = env::var("USAGE_LOG_SINK_URL")
        .map_err(|_| ConfigError::Missing("USAGE_LOG_SINK_URL"))?;
    let token = env::var("USAGE_LOG_SINK_TOKEN").ok();
    let timeout = env::var("USAGE_LOG_SINK_TIMEOUT_MS")
        .ok()
        .and_then(|ms| ms.trim().parse::<u64>().ok())
        .map_or(DEFAULT_SINK_TIMEOUT, Duration::from_millis);

    HttpSink::new(url, token.as_deref(), timeout)
}

/// Feeds stdin into the pipeline and requests shutdown once input ends.
async fn read_until_eof(pipeline: Pipeline<UsageRecord>, shutdown: CancellationToken) {
    match ingest(tokio::io::stdin(), &pipeline).await {
        Ok(count) => info!("Input closed after {count} usage logs, shutting down"),
        Err(e) => error!("Failed to read input: {e}"),
    }
    shutdown.cancel();
}

/// Enqueues every well-formed NDJSON line from `input`. Malformed lines are
/// logged and skipped. Returns the number of records handed to the pipeline.
async fn ingest<R>(input: R, pipeline: &Pipeline<UsageRecord>) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut count = 0;
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IngestLine>(&line) {
            Ok(IngestLine { actor_id, record }) => {
                pipeline.log_usage(actor_id, record);
                count += 1;
            }
            Err(e) => warn!("Skipping malformed input line {line_number}: {e}"),
        }
    }
    Ok(count)
}
