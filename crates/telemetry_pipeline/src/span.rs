use crate::context::{SpanId, TraceContext, TraceId};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::SystemTime;

/// Attribute map shared by spans, events, log records and the resource.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Scalar attribute values
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u16> for AttributeValue {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Span status
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum SpanStatus {
    /// No status recorded
    #[default]
    Unset,
    /// Explicitly marked successful
    Ok,
    /// Completed with error
    Error { message: String },
}

impl SpanStatus {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Span kind according to OpenTelemetry specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpanKind {
    /// Internal operation span
    Internal,
    /// Server-side RPC span
    Server,
    /// Client-side RPC span
    Client,
}

/// Timestamped annotation on a span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub name: String,
    /// Unix nanoseconds
    pub timestamp: u64,
    pub attributes: Attributes,
}

impl SpanEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: unix_nanos(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Represents a single distributed tracing span
#[derive(Debug, Clone, Serialize)]
pub struct SpanData {
    /// Own identity (trace id, span id, flags, trace state)
    pub context: TraceContext,
    /// Parent span identifier (`None` for a root span)
    pub parent_span_id: Option<SpanId>,
    /// Operation name
    pub name: String,
    /// Span kind
    pub kind: SpanKind,
    /// Span start time (Unix nanoseconds)
    pub start_time: u64,
    /// Span end time (Unix nanoseconds), unset while recording
    pub end_time: Option<u64>,
    /// Span status
    pub status: SpanStatus,
    /// Span attributes
    pub attributes: Attributes,
    /// Span events in the order they were added
    pub events: Vec<SpanEvent>,
}

impl SpanData {
    pub(crate) fn new(
        context: TraceContext,
        parent_span_id: Option<SpanId>,
        name: String,
        kind: SpanKind,
    ) -> Self {
        Self {
            context,
            parent_span_id,
            name,
            kind,
            start_time: unix_nanos(),
            end_time: None,
            status: SpanStatus::Unset,
            attributes: Attributes::new(),
            events: Vec::new(),
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.context.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.context.span_id
    }

    /// Duration of the span in nanoseconds (zero while still recording)
    pub fn duration_nanos(&self) -> u64 {
        self.end_time
            .map_or(0, |end| end.saturating_sub(self.start_time))
    }
}

/// A span that has ended.
///
/// Shares its data behind an `Arc` and only hands out shared references, so
/// nothing can mutate a span once it is queued for export.
#[derive(Debug, Clone)]
pub struct FinishedSpan(Arc<SpanData>);

impl FinishedSpan {
    pub(crate) fn new(mut data: SpanData) -> Self {
        if data.end_time.is_none() {
            data.end_time = Some(unix_nanos().max(data.start_time));
        }
        Self(Arc::new(data))
    }

    /// End time in Unix nanoseconds.
    pub fn end_time(&self) -> u64 {
        self.0.end_time.unwrap_or(self.0.start_time)
    }
}

impl Deref for FinishedSpan {
    type Target = SpanData;

    fn deref(&self) -> &SpanData {
        &self.0
    }
}

impl Serialize for FinishedSpan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// Current wall-clock time in Unix nanoseconds.
pub(crate) fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
