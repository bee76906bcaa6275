// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable storage the pipeline writes into.

mod http;

pub use http::HttpSink;

use crate::error::SinkError;
use async_trait::async_trait;

/// Storage collaborator consumed by the batch processor.
///
/// One call persists one record. A write may be repeated for the same logical
/// record after a retryable failure, so implementations must tolerate
/// duplicates. Implementations are expected to bound each call with their own
/// timeout; the pipeline does not.
#[async_trait]
pub trait PersistenceSink<P>: Send + Sync {
    async fn write(&self, actor_id: &str, record: &P) -> Result<(), SinkError>;
}
