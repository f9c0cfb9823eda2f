use crate::batch_processor::Batch;
use serde::Serialize;
use std::future::Future;
use std::io::Write;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Error types for export operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// Transport-layer error (connect, TLS, broken connection)
    #[error("transport error: {0}")]
    Transport(String),
    /// Collector answered with a non-2xx status
    #[error("collector responded with status {code}")]
    Status { code: u16 },
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Export operation timed out
    #[error("export operation timed out")]
    Timeout,
    /// All retry attempts exhausted
    #[error("all retry attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },
}

impl ExportError {
    /// Whether sending the same batch again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Status { code } => matches!(code, 429 | 502 | 503 | 504),
            Self::Serialization(_) | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Trait for exporting batches of one signal type to a backend.
///
/// Uses native async fn in traits instead of `#[async_trait]`. An export is
/// a single attempt; wrap the exporter in a
/// [`RetryingExporter`](crate::RetryingExporter) to retry.
pub trait Exporter<T>: Send + Sync {
    /// Exports a batch. An empty batch succeeds without doing any work.
    fn export(&self, batch: Batch<T>) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Returns the exporter name for diagnostics.
    fn name(&self) -> &str;
}

/// Object-safe version of [`Exporter`] for dynamic dispatch.
pub trait ExporterBoxed<T>: Send + Sync {
    fn export_boxed(
        &self,
        batch: Batch<T>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any Exporter can be used as ExporterBoxed
impl<T: 'static, E: Exporter<T>> ExporterBoxed<T> for E {
    fn export_boxed(
        &self,
        batch: Batch<T>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.export(batch))
    }

    fn name(&self) -> &str {
        <E as Exporter<T>>::name(self)
    }
}

impl<T, E: Exporter<T>> Exporter<T> for Arc<E> {
    fn export(&self, batch: Batch<T>) -> impl Future<Output = Result<(), ExportError>> + Send {
        <E as Exporter<T>>::export(self, batch)
    }

    fn name(&self) -> &str {
        <E as Exporter<T>>::name(self)
    }
}

/// Writes each item as one line of JSON to stdout, for local debugging.
pub struct StdoutExporter<T> {
    pretty: bool,
    _signal: PhantomData<fn(T)>,
}

impl<T> StdoutExporter<T> {
    pub fn new(pretty: bool) -> Self {
        Self {
            pretty,
            _signal: PhantomData,
        }
    }
}

impl<T> Default for StdoutExporter<T> {
    fn default() -> Self {
        Self::new(false)
    }
}

impl<T: Serialize + Send> Exporter<T> for StdoutExporter<T> {
    async fn export(&self, batch: Batch<T>) -> Result<(), ExportError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut out = String::new();
        for item in &batch.items {
            let line = if self.pretty {
                serde_json::to_string_pretty(item)
            } else {
                serde_json::to_string(item)
            };
            let line = line.map_err(|e| ExportError::Serialization(e.to_string()))?;
            out.push_str(&line);
            out.push('\n');
        }

        std::io::stdout()
            .lock()
            .write_all(out.as_bytes())
            .map_err(|e| ExportError::Transport(e.to_string()))
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Exporter that discards everything (for benchmarking and disabled signals)
#[derive(Debug, Clone, Copy, Default)]
pub struct NullExporter;

impl NullExporter {
    pub fn new() -> Self {
        Self
    }
}

impl<T: Send> Exporter<T> for NullExporter {
    async fn export(&self, _batch: Batch<T>) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Test exporter that records every exported batch for verification
#[cfg(test)]
pub(crate) struct TestExporter<T> {
    batches: std::sync::Mutex<Vec<Vec<T>>>,
}

#[cfg(test)]
impl<T> TestExporter<T> {
    pub fn new() -> Self {
        Self {
            batches: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn exported_count(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
impl<T: Clone> TestExporter<T> {
    pub fn batches(&self) -> Vec<Vec<T>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.batches().into_iter().flatten().collect()
    }
}

#[cfg(test)]
impl<T: Send> Exporter<T> for TestExporter<T> {
    async fn export(&self, batch: Batch<T>) -> Result<(), ExportError> {
        if !batch.is_empty() {
            self.batches.lock().unwrap().push(batch.items);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stdout_exporter() {
        let exporter = StdoutExporter::new(false);
        let result = exporter.export(Batch::with_items(vec![1, 2, 3])).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_null_exporter_through_dyn() {
        let exporter: Box<dyn ExporterBoxed<u32>> = Box::new(NullExporter::new());
        assert_eq!(exporter.name(), "null");
        let batch = Batch::with_items(vec![1, 2]);
        assert!(exporter.export_boxed(batch).await.is_ok());
    }

    #[tokio::test]
    async fn test_test_exporter_skips_empty_batches() {
        let exporter = TestExporter::new();
        exporter
            .export(Batch::with_items(vec!["a", "b"]))
            .await
            .unwrap();
        exporter.export(Batch::new()).await.unwrap();
        assert_eq!(exporter.batches(), vec![vec!["a", "b"]]);
        assert_eq!(exporter.exported_count(), 2);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ExportError::Transport("reset".into()).is_retryable());
        assert!(ExportError::Timeout.is_retryable());
        assert!(ExportError::Status { code: 503 }.is_retryable());
        assert!(ExportError::Status { code: 429 }.is_retryable());
        assert!(!ExportError::Status { code: 400 }.is_retryable());
        assert!(!ExportError::Serialization("bad".into()).is_retryable());
    }
}
