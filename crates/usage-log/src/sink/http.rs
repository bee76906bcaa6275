// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::PersistenceSink;
use crate::entry::LogPayload;
use crate::error::{ConfigError, SinkError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct Envelope<'a, P> {
    actor_id: &'a str,
    record: &'a P,
}

/// Sink that POSTs each record as JSON to an ingestion endpoint.
///
/// The body is `{"actor_id": "...", "record": {...}}`. Any 2xx response counts
/// as persisted.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: String, token: Option<&str>, timeout: Duration) -> Result<Self, ConfigError> {
        if url.trim().is_empty() {
            return Err(ConfigError::Invalid("sink URL cannot be empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ConfigError::Invalid("sink token is not a valid header".to_string()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl<P> PersistenceSink<P> for HttpSink
where
    P: LogPayload + Serialize,
{
    async fn write(&self, actor_id: &str, record: &P) -> Result<(), SinkError> {
        let body = serde_json::to_vec(&Envelope { actor_id, record })
            .map_err(|e| SinkError::Serialization(e.to_string()))?;

        let time = std::time::Instant::now();
        let response = self
            .client
            .post(&self.url)
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        debug!(
            "HTTP sink | {status} for {} in {} ms",
            record.kind(),
            time.elapsed().as_millis()
        );
        classify_status(status)
    }
}

fn transport_error(error: reqwest::Error) -> SinkError {
    if error.is_timeout() {
        SinkError::Timeout
    } else if error.is_builder() {
        SinkError::Validation(error.to_string())
    } else {
        SinkError::Connection(error.to_string())
    }
}

fn classify_status(status: StatusCode) -> Result<(), SinkError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SinkError::RateLimited);
    }
    if status == StatusCode::REQUEST_TIMEOUT {
        return Err(SinkError::Timeout);
    }
    if status.is_server_error() {
        return Err(SinkError::Server {
            status: status.as_u16(),
        });
    }
    // Redirects are treated like client errors: retrying will not change them.
    Err(SinkError::Client {
        status: status.as_u16(),
    })
}
