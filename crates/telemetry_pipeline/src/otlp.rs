//! OTLP/HTTP exporter.
//!
//! Batches are encoded as OTLP JSON (`ExportTraceServiceRequest` /
//! `ExportLogsServiceRequest`) and POSTed to `{endpoint}/v1/traces` or
//! `{endpoint}/v1/logs`. Any 2xx response is success. Each export is one
//! attempt; retries belong to [`RetryingExporter`](crate::RetryingExporter).

use crate::batch_processor::Batch;
use crate::exporter::{ExportError, Exporter};
use crate::log::LogRecord;
use crate::resource::Resource;
use crate::span::{AttributeValue, Attributes, FinishedSpan, SpanEvent, SpanKind, SpanStatus};
use http::header::CONTENT_TYPE;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Wire encoding of exported batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// OTLP JSON
    #[default]
    Json,
}

impl Encoding {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
        }
    }
}

/// Configuration for the collector endpoint
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Base URL of the collector, without the signal path
    pub endpoint: String,
    pub encoding: Encoding,
    /// Extra request headers (e.g. authentication)
    pub headers: Vec<(String, String)>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4318".to_string(),
            encoding: Encoding::Json,
            headers: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ExporterConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A signal type that can be sent to an OTLP collector.
pub trait OtlpSignal: Sized + Send + Sync + 'static {
    /// Path appended to the collector endpoint
    const PATH: &'static str;

    fn encode(resource: &Resource, items: &[Self]) -> Result<Vec<u8>, serde_json::Error>;
}

/// Sends batches of `T` to an OTLP/HTTP collector.
pub struct OtlpHttpExporter<T> {
    client: reqwest::Client,
    url: String,
    config: ExporterConfig,
    resource: Arc<Resource>,
    _signal: PhantomData<fn(T)>,
}

impl<T: OtlpSignal> OtlpHttpExporter<T> {
    pub fn new(config: ExporterConfig, resource: Arc<Resource>) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExportError::Transport(e.to_string()))?;
        let url = signal_url(&config.endpoint, T::PATH);

        Ok(Self {
            client,
            url,
            config,
            resource,
            _signal: PhantomData,
        })
    }

    /// Full URL batches are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl<T: OtlpSignal> Exporter<T> for OtlpHttpExporter<T> {
    async fn export(&self, batch: Batch<T>) -> Result<(), ExportError> {
        if batch.is_empty() {
            return Ok(());
        }

        let body = T::encode(&self.resource, &batch.items)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, self.config.encoding.content_type())
            .body(body);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExportError::Timeout
            } else {
                ExportError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            tracing::debug!(url = %self.url, %status, "collector rejected batch");
            Err(ExportError::Status {
                code: status.as_u16(),
            })
        }
    }

    fn name(&self) -> &str {
        "otlp-http"
    }
}

fn signal_url(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}

// OTLP JSON data model. 64-bit integers are strings, ids are lowercase hex.

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyValue<'a> {
    key: &'a str,
    value: AnyValue<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum AnyValue<'a> {
    StringValue(&'a str),
    IntValue(String),
    DoubleValue(f64),
    BoolValue(bool),
}

#[derive(Serialize)]
struct OtlpResource<'a> {
    attributes: Vec<KeyValue<'a>>,
}

#[derive(Serialize)]
struct InstrumentationScope {
    name: &'static str,
    version: &'static str,
}

const SCOPE: InstrumentationScope = InstrumentationScope {
    name: env!("CARGO_PKG_NAME"),
    version: env!("CARGO_PKG_VERSION"),
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TracesRequest<'a> {
    resource_spans: Vec<ResourceSpans<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSpans<'a> {
    resource: OtlpResource<'a>,
    scope_spans: Vec<ScopeSpans<'a>>,
}

#[derive(Serialize)]
struct ScopeSpans<'a> {
    scope: InstrumentationScope,
    spans: Vec<OtlpSpan<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpSpan<'a> {
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    trace_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<String>,
    flags: u32,
    name: &'a str,
    kind: i32,
    start_time_unix_nano: String,
    end_time_unix_nano: String,
    attributes: Vec<KeyValue<'a>>,
    events: Vec<OtlpEvent<'a>>,
    status: OtlpStatus<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpEvent<'a> {
    time_unix_nano: String,
    name: &'a str,
    attributes: Vec<KeyValue<'a>>,
}

#[derive(Serialize)]
struct OtlpStatus<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    code: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogsRequest<'a> {
    resource_logs: Vec<ResourceLogs<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceLogs<'a> {
    resource: OtlpResource<'a>,
    scope_logs: Vec<ScopeLogs<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeLogs<'a> {
    scope: InstrumentationScope,
    log_records: Vec<OtlpLogRecord<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpLogRecord<'a> {
    time_unix_nano: String,
    observed_time_unix_nano: String,
    severity_number: i32,
    severity_text: &'static str,
    body: AnyValue<'a>,
    attributes: Vec<KeyValue<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<u32>,
}

fn any_value(value: &AttributeValue) -> AnyValue<'_> {
    match value {
        AttributeValue::String(s) => AnyValue::StringValue(s),
        AttributeValue::Int(i) => AnyValue::IntValue(i.to_string()),
        AttributeValue::Float(f) => AnyValue::DoubleValue(*f),
        AttributeValue::Bool(b) => AnyValue::BoolValue(*b),
    }
}

fn key_values(attributes: &Attributes) -> Vec<KeyValue<'_>> {
    attributes
        .iter()
        .map(|(key, value)| KeyValue {
            key,
            value: any_value(value),
        })
        .collect()
}

fn resource(resource: &Resource) -> OtlpResource<'_> {
    OtlpResource {
        attributes: key_values(resource.attributes()),
    }
}

fn span_kind(kind: SpanKind) -> i32 {
    match kind {
        SpanKind::Internal => 1,
        SpanKind::Server => 2,
        SpanKind::Client => 3,
    }
}

fn status(status: &SpanStatus) -> OtlpStatus<'_> {
    match status {
        SpanStatus::Unset => OtlpStatus {
            message: None,
            code: 0,
        },
        SpanStatus::Ok => OtlpStatus {
            message: None,
            code: 1,
        },
        SpanStatus::Error { message } => OtlpStatus {
            message: Some(message),
            code: 2,
        },
    }
}

fn event(event: &SpanEvent) -> OtlpEvent<'_> {
    OtlpEvent {
        time_unix_nano: event.timestamp.to_string(),
        name: &event.name,
        attributes: key_values(&event.attributes),
    }
}

fn span(span: &FinishedSpan) -> OtlpSpan<'_> {
    OtlpSpan {
        trace_id: span.context.trace_id.to_hex(),
        span_id: span.context.span_id.to_hex(),
        trace_state: span.context.trace_state.header_value(),
        parent_span_id: span.parent_span_id.map(|id| id.to_hex()),
        flags: u32::from(span.context.trace_flags.bits()),
        name: &span.name,
        kind: span_kind(span.kind),
        start_time_unix_nano: span.start_time.to_string(),
        end_time_unix_nano: span.end_time().to_string(),
        attributes: key_values(&span.attributes),
        events: span.events.iter().map(event).collect(),
        status: status(&span.status),
    }
}

fn log_record(record: &LogRecord) -> OtlpLogRecord<'_> {
    OtlpLogRecord {
        time_unix_nano: record.timestamp.to_string(),
        observed_time_unix_nano: record.observed_timestamp.to_string(),
        severity_number: record.severity.number(),
        severity_text: record.severity.text(),
        body: AnyValue::StringValue(&record.body),
        attributes: key_values(&record.attributes),
        trace_id: record.correlation.map(|c| c.trace_id.to_hex()),
        span_id: record.correlation.map(|c| c.span_id.to_hex()),
        flags: record.correlation.map(|c| u32::from(c.trace_flags.bits())),
    }
}

impl OtlpSignal for FinishedSpan {
    const PATH: &'static str = "/v1/traces";

    fn encode(res: &Resource, items: &[Self]) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&TracesRequest {
            resource_spans: vec![ResourceSpans {
                resource: resource(res),
                scope_spans: vec![ScopeSpans {
                    scope: SCOPE,
                    spans: items.iter().map(span).collect(),
                }],
            }],
        })
    }
}

impl OtlpSignal for LogRecord {
    const PATH: &'static str = "/v1/logs";

    fn encode(res: &Resource, items: &[Self]) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&LogsRequest {
            resource_logs: vec![ResourceLogs {
                resource: resource(res),
                scope_logs: vec![ScopeLogs {
                    scope: SCOPE,
                    log_records: items.iter().map(log_record).collect(),
                }],
            }],
        })
    }
}
