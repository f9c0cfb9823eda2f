//! Batch Processor - Pure Batching Abstraction
//!
//! [`BatchBuffer`] holds queued items and decides when they are due for
//! export. It has no locks, atomics or tasks of its own; the
//! [`BatchQueue`](crate::BatchQueue) wraps it in a mutex and drives it from a
//! background flush task.
//!
//! A buffer is due when either
//!
//! - it holds at least `max_export_batch_size` items, or
//! - `scheduled_delay` has elapsed since the oldest item was pushed.
//!
//! Taking the buffer swaps it for an empty one, so producers keep appending
//! while the previous contents are exported. [`into_batches`] then splits
//! the taken items into export-sized batches without reordering them.

use crate::error::EnqueueError;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for batch processing
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of items buffered; further items are dropped
    pub max_queue_size: usize,
    /// Maximum number of items handed to the exporter in one batch
    pub max_export_batch_size: usize,
    /// Maximum time an item waits before its batch is exported
    pub scheduled_delay: Duration,
    /// Deadline for a single export call
    pub export_timeout: Duration,
    /// Maximum concurrent export operations
    pub max_concurrent_exports: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
            export_timeout: Duration::from_secs(30),
            max_concurrent_exports: 1,
        }
    }
}

impl BatchConfig {
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size.max(1);
        self
    }

    pub fn with_max_export_batch_size(mut self, size: usize) -> Self {
        self.max_export_batch_size = size.max(1);
        self
    }

    pub fn with_scheduled_delay(mut self, delay: Duration) -> Self {
        self.scheduled_delay = delay;
        self
    }

    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_exports(mut self, n: usize) -> Self {
        self.max_concurrent_exports = n.max(1);
        self
    }

    /// Batch size never exceeds the queue size.
    fn effective_batch_size(&self) -> usize {
        self.max_export_batch_size
            .clamp(1, self.max_queue_size.max(1))
    }
}

/// An ordered group of items handed to an exporter in one call.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub items: Vec<T>,
}

impl<T> Batch<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn with_items(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn add(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded buffer that decides when queued items should be exported.
#[derive(Debug)]
pub struct BatchBuffer<T> {
    items: Vec<T>,
    /// When the oldest buffered item arrived
    oldest: Option<Instant>,
    closed: bool,
    config: BatchConfig,
}

impl<T> BatchBuffer<T> {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            items: Vec::new(),
            oldest: None,
            closed: false,
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Appends `item`, or hands the rejection back when the buffer is full
    /// or closed. The rejected item is dropped.
    ///
    /// On success returns `true` when the flush task should re-evaluate:
    /// the buffer just became non-empty (a new linger deadline starts) or a
    /// full batch is ready.
    pub fn push(&mut self, item: T, now: Instant) -> Result<bool, EnqueueError> {
        if self.closed {
            return Err(EnqueueError::Closed);
        }
        if self.items.len() >= self.config.max_queue_size {
            return Err(EnqueueError::Full);
        }

        let was_empty = self.items.is_empty();
        self.items.push(item);
        if was_empty {
            self.oldest = Some(now);
        }
        Ok(was_empty || self.batch_ready())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Rejects every later push.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// At least one full export batch is buffered.
    pub fn batch_ready(&self) -> bool {
        self.items.len() >= self.config.effective_batch_size()
    }

    /// When the oldest buffered item's linger time runs out.
    pub fn deadline(&self) -> Option<Instant> {
        self.oldest.map(|t| t + self.config.scheduled_delay)
    }

    pub fn should_flush(&self, now: Instant) -> bool {
        !self.items.is_empty()
            && (self.batch_ready() || self.deadline().is_some_and(|d| now >= d))
    }

    /// Takes everything buffered, leaving an empty buffer behind.
    pub fn take(&mut self) -> Vec<T> {
        self.oldest = None;
        std::mem::take(&mut self.items)
    }

    /// Takes everything and splits it into export-sized batches.
    pub fn take_batches(&mut self) -> Vec<Batch<T>> {
        let size = self.config.effective_batch_size();
        into_batches(self.take(), size)
    }
}

/// Splits `items` into batches of at most `max` items, preserving order.
pub fn into_batches<T>(items: Vec<T>, max: usize) -> Vec<Batch<T>> {
    let max = max.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(max));
    let mut current = Vec::with_capacity(max.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == max {
            batches.push(Batch::with_items(std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        batches.push(Batch::with_items(current));
    }
    batches
}
