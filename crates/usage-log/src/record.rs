// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::entry::LogPayload;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Usage of one outbound call to a third-party API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Provider that was called (e.g. `openai`, `nutritionix`)
    pub service: String,
    /// Operation or endpoint on that provider (e.g. `chat`, `barcode_lookup`)
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Status code returned by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl UsageRecord {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            model: None,
            input_tokens: None,
            output_tokens: None,
            cost_usd: None,
            status_code: None,
            duration_ms: None,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self
    }

    #[must_use]
    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status_code: u16, duration_ms: u64) -> Self {
        self.status_code = Some(status_code);
        self.duration_ms = Some(duration_ms);
        self
    }
}

impl LogPayload for UsageRecord {
    fn kind(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}.{}", self.service, self.operation))
    }
}
