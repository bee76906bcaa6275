// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;
use usage_log::{PersistenceSink, Pipeline, PipelineConfig, RetryPolicy, UsageRecord};

/// Config with fast, deterministic retries
#[allow(dead_code)]
pub fn test_config(batch_size: usize, max_queue_size: usize) -> PipelineConfig {
    PipelineConfig {
        batch_size,
        max_queue_size,
        flush_interval: Duration::from_secs(1),
        retry: RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter: Duration::ZERO,
        },
        ..Default::default()
    }
}

/// Pipeline without a flush timer
#[allow(dead_code)]
pub fn idle_pipeline<S>(config: PipelineConfig, sink: Arc<S>) -> Pipeline<UsageRecord>
where
    S: PersistenceSink<UsageRecord> + 'static,
{
    Pipeline::<UsageRecord>::new(config, sink).expect("invalid test config")
}

#[allow(dead_code)]
pub fn record(operation: &str) -> UsageRecord {
    UsageRecord::new("openai", operation).with_tokens(10, 20)
}

/// Polls `condition` every millisecond until it holds, panicking after `limit`.
#[allow(dead_code)]
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
