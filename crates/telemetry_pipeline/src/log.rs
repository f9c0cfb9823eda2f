//! Log records correlated with the trace that produced them.

use crate::context::{SpanId, TraceContext, TraceFlags, TraceId};
use crate::queue::TelemetrySink;
use crate::span::{Attributes, unix_nanos};
use serde::Serialize;
use std::sync::Arc;

/// Log severity, numbered as in the OpenTelemetry log data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// First severity number of the range.
    pub fn number(self) -> i32 {
        match self {
            Self::Trace => 1,
            Self::Debug => 5,
            Self::Info => 9,
            Self::Warn => 13,
            Self::Error => 17,
            Self::Fatal => 21,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

/// Trace identity copied into a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Correlation {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub trace_flags: TraceFlags,
}

/// One structured log record. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// When the event happened (Unix nanoseconds)
    pub timestamp: u64,
    /// When the record was built (Unix nanoseconds)
    pub observed_timestamp: u64,
    pub severity: Severity,
    pub body: String,
    pub attributes: Attributes,
    /// Present only when emitted inside a sampled trace
    pub correlation: Option<Correlation>,
}

impl LogRecord {
    pub fn new(severity: Severity, body: impl Into<String>, attributes: Attributes) -> Self {
        let now = unix_nanos();
        Self {
            timestamp: now,
            observed_timestamp: now,
            severity,
            body: body.into(),
            attributes,
            correlation: None,
        }
    }

    /// Copies the ids of `cx` if it is valid and sampled.
    pub fn correlated_with(mut self, cx: Option<&TraceContext>) -> Self {
        self.correlation = cx
            .filter(|cx| cx.is_valid() && cx.is_sampled())
            .map(|cx| Correlation {
                trace_id: cx.trace_id,
                span_id: cx.span_id,
                trace_flags: cx.trace_flags,
            });
        self
    }

    pub fn trace_id(&self) -> Option<TraceId> {
        self.correlation.map(|c| c.trace_id)
    }

    pub fn span_id(&self) -> Option<SpanId> {
        self.correlation.map(|c| c.span_id)
    }
}

/// Builds log records, stamps them with the caller's trace and enqueues them
/// on the log queue.
///
/// Every record is also written to the process' own `tracing` output, so a
/// local console shows the same lines the collector receives.
#[derive(Clone)]
pub struct LogEmitter {
    sink: Arc<dyn TelemetrySink<LogRecord>>,
    mirror: bool,
}

impl LogEmitter {
    pub fn new(sink: Arc<dyn TelemetrySink<LogRecord>>) -> Self {
        Self { sink, mirror: true }
    }

    /// Enables or disables writing records to local `tracing` output.
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn emit(
        &self,
        severity: Severity,
        body: impl Into<String>,
        attributes: Attributes,
        cx: Option<&TraceContext>,
    ) {
        let record = LogRecord::new(severity, body, attributes).correlated_with(cx);
        if self.mirror {
            mirror(&record);
        }
        self.sink.offer(record);
    }

    pub fn info(&self, body: impl Into<String>, cx: Option<&TraceContext>) {
        self.emit(Severity::Info, body, Attributes::new(), cx);
    }

    pub fn warn(&self, body: impl Into<String>, cx: Option<&TraceContext>) {
        self.emit(Severity::Warn, body, Attributes::new(), cx);
    }

    pub fn error(&self, body: impl Into<String>, cx: Option<&TraceContext>) {
        self.emit(Severity::Error, body, Attributes::new(), cx);
    }
}

impl std::fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEmitter")
            .field("mirror", &self.mirror)
            .finish_non_exhaustive()
    }
}

fn mirror(record: &LogRecord) {
    let trace_id = record.trace_id().map(|id| id.to_hex());
    let span_id = record.span_id().map(|id| id.to_hex());
    let trace_id = trace_id.as_deref();
    let span_id = span_id.as_deref();
    let attributes = serde_json::to_string(&record.attributes).unwrap_or_default();
    let body = record.body.as_str();

    match record.severity {
        Severity::Trace => tracing::trace!(trace_id, span_id, attributes = %attributes, "{body}"),
        Severity::Debug => tracing::debug!(trace_id, span_id, attributes = %attributes, "{body}"),
        Severity::Info => tracing::info!(trace_id, span_id, attributes = %attributes, "{body}"),
        Severity::Warn => tracing::warn!(trace_id, span_id, attributes = %attributes, "{body}"),
        Severity::Error | Severity::Fatal => {
            tracing::error!(trace_id, span_id, attributes = %attributes, "{body}")
        }
    }
}
