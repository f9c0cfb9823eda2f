//! Wiring of tracer, log emitter and their export queues.

use crate::batch_processor::BatchConfig;
use crate::config::Settings;
use crate::error::ShutdownError;
use crate::exporter::{ExportError, ExporterBoxed, NullExporter, StdoutExporter};
use crate::log::{LogEmitter, LogRecord};
use crate::otlp::{ExporterConfig, OtlpHttpExporter};
use crate::queue::{BatchQueue, MetricsSnapshot, TelemetrySink};
use crate::resilient_exporter::RetryingExporter;
use crate::resource::Resource;
use crate::sampler::{AlwaysOn, Sampler};
use crate::span::FinishedSpan;
use crate::tracer::Tracer;
use std::sync::Arc;
use std::time::Duration;

/// A running telemetry pipeline: one queue per signal, each with its own
/// flush task.
///
/// Handles returned by [`tracer`](Self::tracer) and [`logs`](Self::logs)
/// stay usable after shutdown; whatever they produce is then dropped.
pub struct Pipeline {
    resource: Arc<Resource>,
    tracer: Tracer,
    logs: LogEmitter,
    span_queue: Arc<BatchQueue<FinishedSpan>>,
    log_queue: Arc<BatchQueue<LogRecord>>,
}

impl Pipeline {
    pub fn builder(resource: Resource) -> PipelineBuilder {
        PipelineBuilder::new(resource)
    }

    /// Pipeline exporting to the configured collector, or to stdout when
    /// the SDK is disabled. Must be called within a Tokio runtime.
    pub fn from_settings(settings: &Settings, resource: Resource) -> Result<Self, ExportError> {
        let builder = Self::builder(resource)
            .with_sampler(settings.sampler())
            .with_span_batch_config(settings.batch_config())
            .with_log_batch_config(settings.batch_config());

        if settings.sdk_disabled {
            return Ok(builder
                .with_span_exporter(StdoutExporter::<FinishedSpan>::new(false))
                .with_log_exporter(StdoutExporter::<LogRecord>::new(false))
                .build());
        }

        let config = ExporterConfig::default().with_endpoint(&settings.exporter_otlp_endpoint);
        let resource = Arc::clone(&builder.resource);
        let spans = OtlpHttpExporter::<FinishedSpan>::new(config.clone(), Arc::clone(&resource))?;
        let logs = OtlpHttpExporter::<LogRecord>::new(config, resource)?;

        Ok(builder
            .with_span_exporter(RetryingExporter::with_defaults(spans))
            .with_log_exporter(RetryingExporter::with_defaults(logs))
            .build())
    }

    /// Cheap handle for starting spans.
    pub fn tracer(&self) -> Tracer {
        self.tracer.clone()
    }

    pub fn logs(&self) -> LogEmitter {
        self.logs.clone()
    }

    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    pub fn span_metrics(&self) -> MetricsSnapshot {
        self.span_queue.metrics().snapshot()
    }

    pub fn log_metrics(&self) -> MetricsSnapshot {
        self.log_queue.metrics().snapshot()
    }

    /// Exports everything buffered on both queues and waits for it.
    pub async fn force_flush(&self) -> Result<(), ShutdownError> {
        let (spans, logs) = tokio::join!(
            self.span_queue.force_flush(),
            self.log_queue.force_flush()
        );
        spans.and(logs)
    }

    /// Shuts both queues down concurrently, each bounded by `timeout`.
    ///
    /// Both queues are always shut down; the first error is returned.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let (spans, logs) = tokio::join!(
            self.span_queue.shutdown(timeout),
            self.log_queue.shutdown(timeout)
        );
        let result = spans.and(logs);
        match &result {
            Ok(()) => tracing::debug!("telemetry pipeline shut down"),
            Err(e) => tracing::warn!(error = %e, "telemetry pipeline shutdown incomplete"),
        }
        result
    }
}

/// Builder for [`Pipeline`]. Exporters default to [`NullExporter`].
pub struct PipelineBuilder {
    resource: Arc<Resource>,
    sampler: Arc<dyn Sampler>,
    span_exporter: Arc<dyn ExporterBoxed<FinishedSpan>>,
    log_exporter: Arc<dyn ExporterBoxed<LogRecord>>,
    span_batch: BatchConfig,
    log_batch: BatchConfig,
    mirror_logs: bool,
}

impl PipelineBuilder {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource: Arc::new(resource),
            sampler: Arc::new(AlwaysOn),
            span_exporter: Arc::new(NullExporter::new()),
            log_exporter: Arc::new(NullExporter::new()),
            span_batch: BatchConfig::default(),
            log_batch: BatchConfig::default(),
            mirror_logs: true,
        }
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_span_exporter(
        mut self,
        exporter: impl ExporterBoxed<FinishedSpan> + 'static,
    ) -> Self {
        self.span_exporter = Arc::new(exporter);
        self
    }

    pub fn with_log_exporter(mut self, exporter: impl ExporterBoxed<LogRecord> + 'static) -> Self {
        self.log_exporter = Arc::new(exporter);
        self
    }

    pub fn with_span_batch_config(mut self, config: BatchConfig) -> Self {
        self.span_batch = config;
        self
    }

    pub fn with_log_batch_config(mut self, config: BatchConfig) -> Self {
        self.log_batch = config;
        self
    }

    /// Whether emitted log records are also written to local `tracing`
    /// output (on by default).
    pub fn with_log_mirror(mut self, mirror: bool) -> Self {
        self.mirror_logs = mirror;
        self
    }

    /// Spawns both flush tasks. Must be called within a Tokio runtime.
    pub fn build(self) -> Pipeline {
        let span_queue = Arc::new(BatchQueue::new("spans", self.span_batch, self.span_exporter));
        let log_queue = Arc::new(BatchQueue::new("logs", self.log_batch, self.log_exporter));

        let span_sink: Arc<dyn TelemetrySink<FinishedSpan>> = span_queue.clone();
        let log_sink: Arc<dyn TelemetrySink<LogRecord>> = log_queue.clone();

        tracing::info!(
            service.name = self.resource.service_name().unwrap_or_default(),
            sampler = %self.sampler.description(),
            "telemetry pipeline started"
        );

        Pipeline {
            resource: self.resource,
            tracer: Tracer::with_sampler(span_sink, self.sampler),
            logs: LogEmitter::new(log_sink).with_mirror(self.mirror_logs),
            span_queue,
            log_queue,
        }
    }
}
