//! Retry decorator for any [`Exporter`].
//!
//! Exporters make a single attempt per batch. Wrapping one in a
//! [`RetryingExporter`] adds exponential backoff for transient failures
//! without changing anything on the producer side of the queue.

use crate::batch_processor::Batch;
use crate::exporter::{ExportError, Exporter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt).
    pub max_retries: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 = double delay each retry).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the given attempt (0-indexed; attempt 0 never waits).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Retries retryable export failures with exponential backoff.
///
/// Only transport errors, timeouts and the 429/502/503/504 statuses are
/// retried; anything else is returned as is. When every attempt fails the
/// result is [`ExportError::RetriesExhausted`].
pub struct RetryingExporter<E> {
    inner: E,
    config: RetryConfig,
    /// Metrics: total retry attempts made
    total_retries: AtomicU64,
    /// Metrics: successful exports after retry (not first attempt)
    recovered_exports: AtomicU64,
}

impl<E> RetryingExporter<E> {
    pub fn new(inner: E, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
            recovered_exports: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: E) -> Self {
        Self::new(inner, RetryConfig::default())
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn recovered_exports(&self) -> u64 {
        self.recovered_exports.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<T, E> Exporter<T> for RetryingExporter<E>
where
    T: Clone + Send + Sync,
    E: Exporter<T>,
{
    async fn export(&self, batch: Batch<T>) -> Result<(), ExportError> {
        if batch.is_empty() {
            return Ok(());
        }

        let max_attempts = self.config.max_retries + 1;
        for attempt in 0..max_attempts {
            let delay = self.config.delay_for_attempt(attempt);
            if !delay.is_zero() {
                self.total_retries.fetch_add(1, Ordering::Relaxed);
                sleep(delay).await;
            }

            match self.inner.export(batch.clone()).await {
                Ok(()) => {
                    if attempt > 0 {
                        self.recovered_exports.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!(attempt, error = %e, "export attempt failed");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ExportError::RetriesExhausted {
            attempts: max_attempts,
        })
    }

    fn name(&self) -> &str {
        Exporter::<T>::name(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// An exporter that fails with `error` a configurable number of times
    /// before succeeding.
    struct FailingExporter {
        failures_remaining: AtomicU32,
        export_count: AtomicU32,
        error: ExportError,
    }

    impl FailingExporter {
        fn new(fail_count: u32, error: ExportError) -> Self {
            Self {
                failures_remaining: AtomicU32::new(fail_count),
                export_count: AtomicU32::new(0),
                error,
            }
        }

        fn export_count(&self) -> u32 {
            self.export_count.load(Ordering::Relaxed)
        }
    }

    impl Exporter<u32> for FailingExporter {
        async fn export(&self, _batch: Batch<u32>) -> Result<(), ExportError> {
            self.export_count.fetch_add(1, Ordering::Relaxed);
            let remaining = self.failures_remaining.load(Ordering::Relaxed);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::Relaxed);
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        }
    }

    fn batch() -> Batch<u32> {
        Batch::with_items(vec![1, 2, 3])
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let base = FailingExporter::new(2, ExportError::Transport("reset".into()));
        let retrying = RetryingExporter::new(base, fast_config(3));

        assert!(retrying.export(batch()).await.is_ok());
        assert_eq!(retrying.total_retries(), 2);
        assert_eq!(retrying.recovered_exports(), 1);
        assert_eq!(retrying.inner().export_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let base = FailingExporter::new(10, ExportError::Status { code: 503 });
        let retrying = RetryingExporter::new(base, fast_config(2));

        let result = retrying.export(batch()).await;
        assert_eq!(result, Err(ExportError::RetriesExhausted { attempts: 3 }));
        assert_eq!(retrying.inner().export_count(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_immediately() {
        let base = FailingExporter::new(10, ExportError::Status { code: 400 });
        let retrying = RetryingExporter::new(base, fast_config(5));

        let result = retrying.export(batch()).await;
        assert_eq!(result, Err(ExportError::Status { code: 400 }));
        assert_eq!(retrying.inner().export_count(), 1);
        assert_eq!(retrying.total_retries(), 0);
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(8), Duration::from_millis(500));
    }
}
