// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Failures reported by a [`crate::PersistenceSink`] for a single record.
///
/// Whether a variant is worth retrying is decided by
/// [`crate::retry::is_retryable_error`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("connection pool exhausted")]
    PoolExhausted,

    #[error("sink server error: status {status}")]
    Server { status: u16 },

    #[error("rate limited by sink")]
    RateLimited,

    #[error("record rejected by sink: status {status}")]
    Client { status: u16 },

    #[error("invalid record: {0}")]
    Validation(String),

    #[error("failed to serialize record: {0}")]
    Serialization(String),
}

/// Errors raised while building or validating pipeline configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Pipeline must be started inside a Tokio runtime")]
    NoRuntime,

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
