//! Trace identity: the immutable value that travels with every request.
//!
//! A [`TraceContext`] names one span inside one trace. It is created by the
//! [`Tracer`](crate::Tracer), carried across process boundaries by the
//! [`propagation`](crate::propagation) codec, and copied into log records by
//! the [`LogEmitter`](crate::LogEmitter). It is never mutated in place; child
//! contexts are new values.

use crate::baggage::Baggage;
use crate::propagation::PropagationError;
use serde::{Serialize, Serializer};
use std::fmt;

/// 128-bit trace identifier. All-zero is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    /// The all-zero identifier, never produced by [`TraceId::random`].
    pub const INVALID: Self = Self(0);

    /// Generates a fresh non-zero trace id.
    pub fn random() -> Self {
        loop {
            let id = rand::random::<u128>();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub const fn to_u128(self) -> u128 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// 32 lowercase hex characters.
    pub fn to_hex(self) -> String {
        format!("{:032x}", self.0)
    }

    /// Parses exactly 32 lowercase hex characters.
    pub fn from_hex(s: &str) -> Result<Self, PropagationError> {
        if s.len() != 32 || !is_lower_hex(s) {
            return Err(PropagationError::InvalidTraceId(s.to_string()));
        }
        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| PropagationError::InvalidTraceId(s.to_string()))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// 64-bit span identifier. All-zero is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    pub const INVALID: Self = Self(0);

    /// Generates a fresh non-zero span id.
    pub fn random() -> Self {
        loop {
            let id = rand::random::<u64>();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub const fn to_u64(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// 16 lowercase hex characters.
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }

    /// Parses exactly 16 lowercase hex characters.
    pub fn from_hex(s: &str) -> Result<Self, PropagationError> {
        if s.len() != 16 || !is_lower_hex(s) {
            return Err(PropagationError::InvalidSpanId(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| PropagationError::InvalidSpanId(s.to_string()))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Trace flags byte. Only the sampled bit has defined meaning; the other
/// bits are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct TraceFlags(u8);

impl TraceFlags {
    pub const NONE: Self = Self(0x00);
    pub const SAMPLED: Self = Self(0x01);

    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn is_sampled(self) -> bool {
        self.0 & Self::SAMPLED.0 != 0
    }

    pub fn with_sampled(self, sampled: bool) -> Self {
        if sampled {
            Self(self.0 | Self::SAMPLED.0)
        } else {
            Self(self.0 & !Self::SAMPLED.0)
        }
    }
}

/// Ordered vendor key/value pairs carried in the `tracestate` header.
///
/// Entries this process does not understand are kept verbatim and in order.
/// Keys are unique; [`TraceState::with_entry`] moves an updated key to the
/// front as the W3C format requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct TraceState {
    entries: Vec<(String, String)>,
}

impl TraceState {
    /// Maximum number of list members kept.
    pub const MAX_ENTRIES: usize = 32;

    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a trace state from validated entries, preserving their order.
    pub fn from_entries<I, K, V>(entries: I) -> Result<Self, PropagationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut state = Self::new();
        for (key, value) in entries {
            let (key, value) = (key.into(), value.into());
            validate_entry(&key, &value)?;
            if state.get(&key).is_some() {
                return Err(PropagationError::InvalidTraceState(format!("duplicate key {key}")));
            }
            if state.entries.len() == Self::MAX_ENTRIES {
                return Err(PropagationError::InvalidTraceState(format!(
                    "more than {} entries",
                    Self::MAX_ENTRIES
                )));
            }
            state.entries.push((key, value));
        }
        Ok(state)
    }

    /// Returns a copy with `key` set to `value`, placed first.
    pub fn with_entry(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, PropagationError> {
        let (key, value) = (key.into(), value.into());
        validate_entry(&key, &value)?;

        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.push((key.clone(), value));
        entries.extend(self.entries.iter().filter(|(k, _)| *k != key).cloned());
        entries.truncate(Self::MAX_ENTRIES);
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the `tracestate` header value.
    pub fn header_value(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses a `tracestate` header value.
    ///
    /// Malformed members are skipped and logged; well-formed ones are kept in
    /// order. A repeated key keeps its first occurrence.
    pub fn parse_header(value: &str) -> Self {
        let mut entries: Vec<(String, String)> = Vec::new();
        for member in value.split(',') {
            let member = member.trim_matches(|c: char| c == ' ' || c == '\t');
            if member.is_empty() {
                continue;
            }
            let Some((key, val)) = member.split_once('=') else {
                tracing::debug!(member, "skipping tracestate member without '='");
                continue;
            };
            if let Err(e) = validate_entry(key, val) {
                tracing::debug!(member, error = %e, "skipping malformed tracestate member");
                continue;
            }
            if entries.iter().any(|(k, _)| k == key) {
                continue;
            }
            if entries.len() == Self::MAX_ENTRIES {
                tracing::debug!("tracestate truncated at {} entries", Self::MAX_ENTRIES);
                break;
            }
            entries.push((key.to_string(), val.to_string()));
        }
        Self { entries }
    }
}

/// Non-alphanumeric characters allowed in a `tracestate` key.
const KEY_SYMBOLS: &[u8] = b"_-*/@";

fn validate_entry(key: &str, value: &str) -> Result<(), PropagationError> {
    let key_ok = key.len() <= 256
        && key
            .bytes()
            .next()
            .is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        && key.bytes().all(|b| {
            b.is_ascii_lowercase() || b.is_ascii_digit() || KEY_SYMBOLS.contains(&b)
        });
    if !key_ok {
        return Err(PropagationError::InvalidTraceState(format!("bad key {key:?}")));
    }

    let value_ok = !value.is_empty()
        && value.len() <= 256
        && !value.ends_with(' ')
        && value
            .bytes()
            .all(|b| (0x20..=0x7e).contains(&b) && b != b',' && b != b'=');
    if !value_ok {
        return Err(PropagationError::InvalidTraceState(format!(
            "bad value {value:?} for key {key}"
        )));
    }
    Ok(())
}

pub(crate) fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Identity of one span within one trace, as propagated between services,
/// plus the baggage riding along with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub trace_flags: TraceFlags,
    pub trace_state: TraceState,
    /// Propagated to downstream calls, never exported with the span.
    #[serde(skip)]
    pub baggage: Baggage,
}

impl TraceContext {
    pub fn new(trace_id: TraceId, span_id: SpanId, trace_flags: TraceFlags) -> Self {
        Self {
            trace_id,
            span_id,
            trace_flags,
            trace_state: TraceState::default(),
            baggage: Baggage::default(),
        }
    }

    pub fn with_trace_state(mut self, trace_state: TraceState) -> Self {
        self.trace_state = trace_state;
        self
    }

    pub fn with_baggage(mut self, baggage: Baggage) -> Self {
        self.baggage = baggage;
        self
    }

    /// Both identifiers are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }

    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }
}
