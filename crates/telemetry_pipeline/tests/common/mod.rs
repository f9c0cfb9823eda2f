#![allow(dead_code)]

use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use telemetry_pipeline::batch_processor::Batch;
use telemetry_pipeline::{
    ErrorHandler, ExportError, Exporter, HelloHandler, HttpRequest, LogRecord, LoopbackTransport,
    Pipeline, ProxyHandler, Resource, Router, TracedClient, TracedHandler,
};

/// Records every exported batch. Clones share the same storage.
pub struct InMemoryExporter<T> {
    batches: Arc<Mutex<Vec<Vec<T>>>>,
}

impl<T> Clone for InMemoryExporter<T> {
    fn clone(&self) -> Self {
        Self {
            batches: Arc::clone(&self.batches),
        }
    }
}

impl<T> InMemoryExporter<T> {
    pub fn new() -> Self {
        Self {
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn exported_count(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }
}

impl<T: Clone> InMemoryExporter<T> {
    pub fn items(&self) -> Vec<T> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .cloned()
            .collect()
    }
}

impl<T: Send> Exporter<T> for InMemoryExporter<T> {
    async fn export(&self, batch: Batch<T>) -> Result<(), ExportError> {
        if !batch.is_empty() {
            self.batches.lock().unwrap().push(batch.items);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// Never completes an export.
pub struct HangingExporter;

impl<T: Send> Exporter<T> for HangingExporter {
    async fn export(&self, _batch: Batch<T>) -> Result<(), ExportError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    fn name(&self) -> &str {
        "hanging"
    }
}

/// Sleeps before recording, to keep exports in flight.
pub struct SlowExporter<T> {
    pub delay: Duration,
    pub inner: InMemoryExporter<T>,
}

impl<T: Send> Exporter<T> for SlowExporter<T> {
    async fn export(&self, batch: Batch<T>) -> Result<(), ExportError> {
        tokio::time::sleep(self.delay).await;
        self.inner.export(batch).await
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Always fails.
pub struct FailingExporter(pub ExportError);

impl<T: Send> Exporter<T> for FailingExporter {
    async fn export(&self, _batch: Batch<T>) -> Result<(), ExportError> {
        Err(self.0.clone())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

pub fn get(uri: &str) -> HttpRequest {
    http::Request::get(uri).body(Bytes::new()).unwrap()
}

/// A pipeline exporting into memory, with local log mirroring off.
pub fn pipeline() -> (
    Pipeline,
    InMemoryExporter<telemetry_pipeline::FinishedSpan>,
    InMemoryExporter<LogRecord>,
) {
    let spans = InMemoryExporter::new();
    let logs = InMemoryExporter::new();
    let pipeline = Pipeline::builder(Resource::new("e2e"))
        .with_span_exporter(spans.clone())
        .with_log_exporter(logs.clone())
        .with_log_mirror(false)
        .build();
    (pipeline, spans, logs)
}

pub const SHUTDOWN: Duration = Duration::from_secs(2);

/// The demo server's routes, traced, with its proxy pointed at `upstream`
/// over an in-process transport.
pub fn server_routes(pipeline: &Pipeline, upstream: Arc<Router>) -> Router {
    let tracer = pipeline.tracer();
    let logs = pipeline.logs();
    let client = TracedClient::new(LoopbackTransport::new(upstream), tracer.clone());
    Router::new()
        .route(
            "/hello",
            TracedHandler::new(HelloHandler::new(logs.clone()), tracer.clone(), "hello"),
        )
        .route(
            "/error",
            TracedHandler::new(ErrorHandler::new(logs.clone()), tracer.clone(), "error"),
        )
        .route(
            "/httpbin/",
            TracedHandler::new(
                ProxyHandler::new(client, logs, "/httpbin/", "http://upstream.test"),
                tracer,
                "httpbin",
            ),
        )
}
