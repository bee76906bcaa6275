// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock sinks for pipeline tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;
use usage_log::{PersistenceSink, SinkError, UsageRecord};

/// Mock sink that accepts everything and remembers what it was given
#[derive(Default)]
pub struct RecordingSink {
    delay: Option<Duration>,
    written: Mutex<Vec<(String, UsageRecord)>>,
}

#[allow(dead_code)]
impl RecordingSink {
    /// Each write takes `delay` before succeeding
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.written.lock().unwrap().len()
    }

    pub fn actors(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|(actor, _)| actor.clone())
            .collect()
    }
}

#[async_trait]
impl PersistenceSink<UsageRecord> for RecordingSink {
    async fn write(&self, actor_id: &str, record: &UsageRecord) -> Result<(), SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.written
            .lock()
            .unwrap()
            .push((actor_id.to_string(), record.clone()));
        Ok(())
    }
}

/// Mock sink that fails every call with the same error
pub struct FailingSink {
    error: SinkError,
    calls: Mutex<HashMap<String, usize>>,
}

#[allow(dead_code)]
impl FailingSink {
    pub fn new(error: SinkError) -> Self {
        Self {
            error,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls_for(&self, actor_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(actor_id)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PersistenceSink<UsageRecord> for FailingSink {
    async fn write(&self, actor_id: &str, _record: &UsageRecord) -> Result<(), SinkError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(actor_id.to_string())
            .or_default() += 1;
        Err(self.error.clone())
    }
}

/// Mock sink whose writes never finish
#[derive(Default)]
pub struct HangingSink {
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl HangingSink {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceSink<UsageRecord> for HangingSink {
    async fn write(&self, _actor_id: &str, _record: &UsageRecord) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Mock sink that hangs for `delay` on one actor and succeeds at once for
/// everyone else
pub struct SlowActorSink {
    slow_actor: &'static str,
    delay: Duration,
    seen: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl SlowActorSink {
    pub fn new(slow_actor: &'static str, delay: Duration) -> Self {
        Self {
            slow_actor,
            delay,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceSink<UsageRecord> for SlowActorSink {
    async fn write(&self, actor_id: &str, _record: &UsageRecord) -> Result<(), SinkError> {
        self.seen.lock().unwrap().push(actor_id.to_string());
        if actor_id == self.slow_actor {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

/// Mock sink whose writes block until the test hands out permits
pub struct GatedSink {
    gate: Semaphore,
    entered: AtomicUsize,
}

impl Default for GatedSink {
    fn default() -> Self {
        Self {
            gate: Semaphore::new(0),
            entered: AtomicUsize::new(0),
        }
    }
}

#[allow(dead_code)]
impl GatedSink {
    /// Lets `writes` more writes through the gate
    pub fn release(&self, writes: usize) {
        self.gate.add_permits(writes);
    }

    /// Writes that have started, finished or not
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceSink<UsageRecord> for GatedSink {
    async fn write(&self, _actor_id: &str, _record: &UsageRecord) -> Result<(), SinkError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.unwrap();
        Ok(())
    }
}
