// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO queue that owns the backpressure decision.
//!
//! Unlike an evicting buffer, a full queue rejects the *incoming* item and
//! keeps what it already holds. Rejections are counted and surfaced through a
//! rate-limited warning so a sustained overload produces one log line per
//! window instead of one per dropped item.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between two backpressure warnings.
pub const OVERFLOW_WARNING_INTERVAL: Duration = Duration::from_secs(10);

/// Result of [`BoundedQueue::push`].
#[derive(Debug, PartialEq, Eq)]
pub enum Push {
    /// The item was appended; carries the new queue length.
    Accepted(usize),
    /// The queue was full and the item was discarded. `warn` carries the
    /// number of items dropped since the previous warning when a new warning
    /// is due, `None` while the warning is rate limited.
    Rejected { warn: Option<u64> },
}

/// Tracks drops between two backpressure warnings.
#[derive(Debug, Default)]
struct OverflowWarning {
    dropped_since_warning: u64,
    last_warning: Option<Instant>,
}

impl OverflowWarning {
    fn record(&mut self, now: Instant) -> Option<u64> {
        self.dropped_since_warning += 1;
        let due = self
            .last_warning
            .map_or(true, |last| now.saturating_duration_since(last) >= OVERFLOW_WARNING_INTERVAL);
        if !due {
            return None;
        }
        self.last_warning = Some(now);
        Some(std::mem::take(&mut self.dropped_since_warning))
    }
}

#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    overflow: OverflowWarning,
}

impl<T> BoundedQueue<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
            overflow: OverflowWarning::default(),
        }
    }

    /// Appends `item` at the tail unless the queue is full.
    pub fn push(&mut self, item: T, now: Instant) -> Push {
        if self.items.len() >= self.capacity {
            return Push::Rejected {
                warn: self.overflow.record(now),
            };
        }
        self.items.push_back(item);
        Push::Accepted(self.items.len())
    }

    /// Removes every item matching `expired`, preserving the order of the rest.
    pub fn prune(&mut self, mut expired: impl FnMut(&T) -> bool) -> Vec<T> {
        if !self.items.iter().any(&mut expired) {
            return Vec::new();
        }
        let (gone, kept): (Vec<T>, Vec<T>) = self.items.drain(..).partition(|item| expired(item));
        self.items = kept.into();
        gone
    }

    /// Takes up to `max` items from the head.
    pub fn take_front(&mut self, max: usize) -> Vec<T> {
        let count = max.min(self.items.len());
        self.items.drain(..count).collect()
    }

    /// Reinserts `items` at the head, ahead of everything queued, keeping
    /// their relative order. Items that would push the queue past capacity
    /// are returned instead of inserted; the tail of `items` goes first.
    pub fn requeue_front(&mut self, mut items: Vec<T>) -> Vec<T> {
        let room = self.capacity.saturating_sub(self.items.len());
        let overflow = if items.len() > room {
            items.split_off(room)
        } else {
            Vec::new()
        };
        for item in items.into_iter().rev() {
            self.items.push_front(item);
        }
        overflow
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Locks a queue mutex. A producer that panicked mid-push cannot leave the
/// queue structurally broken, so poisoning is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
