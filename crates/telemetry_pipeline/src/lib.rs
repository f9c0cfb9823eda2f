//! Telemetry pipeline for HTTP services
//!
//! Propagates W3C trace context and baggage across HTTP hops, records spans and
//! correlated log records, and exports both in batches to an OTLP collector
//! from a background task, so request handling never waits on the network.
//!
//! # Rust 2024 Edition Features
//!
//! This crate uses native async traits (no `#[async_trait]` macro). Trace
//! context is always passed explicitly; there is no global tracer and no
//! task-local "current span".
//!
//! ```no_run
//! use std::time::Duration;
//! use telemetry_pipeline::{Pipeline, Resource, SpanKind};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = Pipeline::builder(Resource::new("checkout")).build();
//! let tracer = pipeline.tracer();
//!
//! let mut span = tracer.start_span("charge", SpanKind::Internal, None);
//! pipeline.logs().info("charging card", Some(span.context()));
//! span.end();
//!
//! pipeline.shutdown(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

pub mod baggage;
pub mod batch_processor;
pub mod config;
pub mod context;
pub mod error;
pub mod exporter;
pub mod handler;
pub mod handlers;
pub mod instrument;
pub mod log;
pub mod logging;
pub mod otlp;
pub mod pipeline;
pub mod propagation;
pub mod queue;
pub mod resilient_exporter;
pub mod resource;
pub mod sampler;
pub mod semconv;
pub mod span;
pub mod tracer;
pub mod transport;

// Re-export main types
pub use crate::config::Settings;
pub use baggage::Baggage;
pub use batch_processor::{Batch, BatchBuffer, BatchConfig};
pub use context::{SpanId, TraceContext, TraceFlags, TraceId, TraceState};
pub use error::{EnqueueError, ShutdownError};
pub use exporter::{ExportError, Exporter, ExporterBoxed, NullExporter, StdoutExporter};
pub use handler::{Handler, HandlerBoxed, HttpRequest, HttpResponse, Router, text_response};
pub use handlers::{ErrorHandler, HelloHandler, ProxyHandler};
pub use instrument::{HttpStatusError, TracedClient, TracedHandler};
pub use log::{Correlation, LogEmitter, LogRecord, Severity};
pub use otlp::{Encoding, ExporterConfig, OtlpHttpExporter, OtlpSignal};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use propagation::{Extractor, Injector, PropagationError, extract, inject};
pub use queue::{BatchQueue, ExportMetrics, MetricsSnapshot, TelemetrySink};
pub use resilient_exporter::{RetryConfig, RetryingExporter};
pub use resource::Resource;
pub use sampler::{AlwaysOff, AlwaysOn, Sampler, SamplingDecision, SamplingParams, TraceIdRatio};
pub use span::{
    AttributeValue, Attributes, FinishedSpan, SpanData, SpanEvent, SpanKind, SpanStatus,
};
pub use tracer::{ActiveSpan, Tracer};
pub use transport::{LoopbackTransport, ReqwestTransport, Transport, TransportError};
