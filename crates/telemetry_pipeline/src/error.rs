use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`BatchQueue::enqueue`](crate::BatchQueue::enqueue).
///
/// Both variants are counted as drops; instrumentation ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// Queue is at capacity, the new item was dropped
    #[error("queue full, item dropped")]
    Full,
    /// Queue has been shut down
    #[error("queue is closed")]
    Closed,
}

impl EnqueueError {
    /// A full queue drains on the next flush; a closed one never reopens.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Errors returned by queue and pipeline shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShutdownError {
    /// The deadline passed before the final export completed; the
    /// in-flight batch is lost.
    #[error("shutdown timed out after {0:?}")]
    Timeout(Duration),
    /// The flush task panicked or was cancelled.
    #[error("flush task failed: {0}")]
    TaskFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_full_is_recoverable() {
        assert!(EnqueueError::Full.is_recoverable());
        assert!(!EnqueueError::Closed.is_recoverable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ShutdownError::Timeout(Duration::from_millis(250)).to_string(),
            "shutdown timed out after 250ms"
        );
    }
}
