// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::borrow::Cow;
use tokio::time::Instant;

/// A record the pipeline can carry. The pipeline never looks inside it beyond
/// [`LogPayload::kind`], which is only used as log context.
pub trait LogPayload: Send + Sync + 'static {
    /// Short label identifying what kind of record this is (e.g. `openai.chat`).
    fn kind(&self) -> Cow<'_, str>;
}

/// Unit of work held by the queue.
#[derive(Debug, Clone)]
pub struct QueuedEntry<P> {
    pub actor_id: String,
    pub payload: P,
    enqueued_at: Instant,
    pub(crate) retry_count: u32,
}

impl<P> QueuedEntry<P> {
    pub(crate) fn new(actor_id: String, payload: P, enqueued_at: Instant) -> Self {
        Self {
            actor_id,
            payload,
            enqueued_at,
            retry_count: 0,
        }
    }

    #[must_use]
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Time spent since insertion, saturating at zero.
    #[must_use]
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.enqueued_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_entry_age() {
        let entry = QueuedEntry::new("user-1".to_string(), (), Instant::now());
        assert_eq!(entry.retry_count(), 0);

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(entry.age(Instant::now()), Duration::from_millis(1_500));
        // an instant before insertion never underflows
        assert_eq!(entry.age(entry.enqueued_at() - Duration::from_secs(1)), Duration::ZERO);
    }
}
