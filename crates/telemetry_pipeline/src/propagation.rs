//! W3C Trace Context propagation.
//!
//! [`inject`] writes a [`TraceContext`] into any string-keyed carrier as a
//! `traceparent` header (`version-traceid-spanid-flags`) and, when the trace
//! state is non-empty, a `tracestate` header. Non-empty [`Baggage`] goes
//! into a `baggage` header. [`extract`] reads all three back.
//!
//! Extraction never fails loudly: a missing or malformed `traceparent`
//! yields `None` so the caller starts a fresh root trace. The reason is
//! logged at debug level and nothing reaches the request path. Baggage is
//! only read alongside a valid `traceparent`.
//!
//! Carriers implement [`Injector`] / [`Extractor`]; implementations are
//! provided for [`http::HeaderMap`] and `HashMap<String, String>`.

use crate::baggage::Baggage;
use crate::context::{SpanId, TraceContext, TraceFlags, TraceId, TraceState, is_lower_hex};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use thiserror::Error;

/// Header carrying version, trace id, span id and flags.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// Header carrying vendor trace state.
pub const TRACESTATE_HEADER: &str = "tracestate";
/// Header carrying application baggage.
pub const BAGGAGE_HEADER: &str = "baggage";

const SUPPORTED_VERSION: &str = "00";

/// Reasons a carrier could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropagationError {
    /// No `traceparent` header present.
    #[error("no traceparent header")]
    MissingHeader,
    /// The header does not have the `version-traceid-spanid-flags` shape.
    #[error("malformed traceparent: {0:?}")]
    InvalidTraceParent(String),
    /// Version `ff` is forbidden.
    #[error("unsupported traceparent version {0:?}")]
    UnsupportedVersion(String),
    #[error("invalid trace id {0:?}")]
    InvalidTraceId(String),
    #[error("invalid span id {0:?}")]
    InvalidSpanId(String),
    #[error("invalid trace flags {0:?}")]
    InvalidFlags(String),
    #[error("invalid tracestate: {0}")]
    InvalidTraceState(String),
    #[error("invalid baggage: {0}")]
    InvalidBaggage(String),
}

/// Write side of a carrier.
pub trait Injector {
    /// Sets `key` to `value`, replacing any previous value.
    fn set(&mut self, key: &str, value: String);
}

/// Read side of a carrier.
pub trait Extractor {
    /// First value stored under `key`.
    fn get(&self, key: &str) -> Option<&str>;

    /// All values stored under `key`, in order.
    fn get_all(&self, key: &str) -> Vec<&str> {
        self.get(key).into_iter().collect()
    }
}

impl Injector for HeaderMap {
    fn set(&mut self, key: &str, value: String) {
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!(key, error = %e, "cannot inject trace header name");
                return;
            }
        };
        let value = match HeaderValue::from_str(&value) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(key, error = %e, "cannot inject trace header value");
                return;
            }
        };
        self.insert(name, value);
    }
}

impl Extractor for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|v| v.to_str().ok())
    }

    fn get_all(&self, key: &str) -> Vec<&str> {
        HeaderMap::get_all(self, key)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }
}

impl Injector for HashMap<String, String> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_ascii_lowercase(), value);
    }
}

impl Extractor for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key)
            .or_else(|| {
                self.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }
}

impl TraceContext {
    /// Renders the `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        format!(
            "{}-{}-{}-{:02x}",
            SUPPORTED_VERSION,
            self.trace_id.to_hex(),
            self.span_id.to_hex(),
            self.trace_flags.bits()
        )
    }

    /// Parses a `traceparent` header value. The result has an empty trace
    /// state.
    ///
    /// Versions above `00` are accepted as long as the first four fields
    /// parse; trailing fields are ignored.
    pub fn from_traceparent(value: &str) -> Result<Self, PropagationError> {
        let value = value.trim();
        let parts: Vec<&str> = value.split('-').collect();
        if parts.len() < 4 {
            return Err(PropagationError::InvalidTraceParent(value.to_string()));
        }

        let version = parts[0];
        if version.len() != 2 || !is_lower_hex(version) {
            return Err(PropagationError::InvalidTraceParent(value.to_string()));
        }
        if version == "ff" {
            return Err(PropagationError::UnsupportedVersion(version.to_string()));
        }
        if version == SUPPORTED_VERSION && parts.len() != 4 {
            return Err(PropagationError::InvalidTraceParent(value.to_string()));
        }

        let trace_id = TraceId::from_hex(parts[1])?;
        let span_id = SpanId::from_hex(parts[2])?;
        if !trace_id.is_valid() {
            return Err(PropagationError::InvalidTraceId(parts[1].to_string()));
        }
        if !span_id.is_valid() {
            return Err(PropagationError::InvalidSpanId(parts[2].to_string()));
        }

        let flags = parts[3];
        if flags.len() != 2 || !is_lower_hex(flags) {
            return Err(PropagationError::InvalidFlags(flags.to_string()));
        }
        let flags = u8::from_str_radix(flags, 16)
            .map_err(|_| PropagationError::InvalidFlags(flags.to_string()))?;

        Ok(Self::new(trace_id, span_id, TraceFlags::new(flags)))
    }
}

/// Writes `cx` into `carrier`.
pub fn inject(cx: &TraceContext, carrier: &mut dyn Injector) {
    if !cx.is_valid() {
        return;
    }
    carrier.set(TRACEPARENT_HEADER, cx.to_traceparent());
    if !cx.trace_state.is_empty() {
        carrier.set(TRACESTATE_HEADER, cx.trace_state.header_value());
    }
    if !cx.baggage.is_empty() {
        carrier.set(BAGGAGE_HEADER, cx.baggage.header_value());
    }
}

/// Reads a context from `carrier`, or `None` if absent or malformed.
pub fn extract(carrier: &dyn Extractor) -> Option<TraceContext> {
    match try_extract(carrier) {
        Ok(cx) => Some(cx),
        Err(PropagationError::MissingHeader) => None,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring incoming trace context");
            None
        }
    }
}

/// Like [`extract`] but reports why decoding failed.
pub fn try_extract(carrier: &dyn Extractor) -> Result<TraceContext, PropagationError> {
    let traceparent = carrier
        .get(TRACEPARENT_HEADER)
        .ok_or(PropagationError::MissingHeader)?;
    let mut cx = TraceContext::from_traceparent(traceparent)?;

    let tracestate = carrier.get_all(TRACESTATE_HEADER).join(",");
    if !tracestate.is_empty() {
        cx = cx.with_trace_state(TraceState::parse_header(&tracestate));
    }
    let baggage = carrier.get_all(BAGGAGE_HEADER).join(",");
    if !baggage.is_empty() {
        cx = cx.with_baggage(Baggage::parse_header(&baggage));
    }
    Ok(cx)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn sample_context() -> TraceContext {
        TraceContext::new(
            TraceId::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736),
            SpanId::from_u64(0x00f0_67aa_0ba9_02b7),
            TraceFlags::SAMPLED,
        )
    }

    #[test]
    fn test_traceparent_format() {
        assert_eq!(sample_context().to_traceparent(), VALID);
    }

    #[test]
    fn test_round_trip_through_header_map() {
        let entries = [("congo", "t61rcWkgMzE"), ("unknown@vendor", "x:y;z")];
        let state = TraceState::from_entries(entries).unwrap();
        let cx = sample_context().with_trace_state(state);

        let mut headers = HeaderMap::new();
        inject(&cx, &mut headers);

        assert_eq!(headers.get(TRACEPARENT_HEADER).unwrap(), VALID);
        assert_eq!(extract(&headers), Some(cx));
    }

    #[test]
    fn test_round_trip_through_hash_map() {
        let cx = sample_context();
        let mut carrier: HashMap<String, String> = HashMap::new();
        inject(&cx, &mut carrier);
        assert!(!carrier.contains_key(TRACESTATE_HEADER));
        assert_eq!(extract(&carrier), Some(cx));
    }

    #[test]
    fn test_hash_map_lookup_is_case_insensitive() {
        let mut carrier = HashMap::new();
        carrier.insert("TraceParent".to_string(), VALID.to_string());
        assert_eq!(extract(&carrier), Some(sample_context()));
    }

    #[test]
    fn test_multiple_tracestate_headers_are_combined() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACEPARENT_HEADER, HeaderValue::from_static(VALID));
        headers.append(TRACESTATE_HEADER, HeaderValue::from_static("a=1"));
        headers.append(TRACESTATE_HEADER, HeaderValue::from_static("b=2"));

        let cx = extract(&headers).unwrap();
        assert_eq!(cx.trace_state.header_value(), "a=1,b=2");
    }

    #[test]
    fn test_baggage_round_trip() {
        let baggage = Baggage::from_entries([("userId", "alice"), ("note", "two words")]).unwrap();
        let cx = sample_context().with_baggage(baggage);

        let mut headers = HeaderMap::new();
        inject(&cx, &mut headers);
        assert_eq!(
            headers.get(BAGGAGE_HEADER).unwrap(),
            "userId=alice,note=two%20words"
        );
        assert_eq!(extract(&headers), Some(cx));
    }

    #[test]
    fn test_multiple_baggage_headers_are_combined() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACEPARENT_HEADER, HeaderValue::from_static(VALID));
        headers.append(BAGGAGE_HEADER, HeaderValue::from_static("a=1"));
        headers.append(BAGGAGE_HEADER, HeaderValue::from_static("b=2;p"));

        let cx = extract(&headers).unwrap();
        assert_eq!(cx.baggage.header_value(), "a=1,b=2;p");
    }

    #[test]
    fn test_baggage_without_traceparent_is_ignored() {
        let mut carrier = HashMap::new();
        carrier.insert(BAGGAGE_HEADER.to_string(), "userId=alice".to_string());
        assert_eq!(extract(&carrier), None);
    }

    #[test]
    fn test_missing_header_is_none() {
        assert_eq!(
            try_extract(&HeaderMap::new()),
            Err(PropagationError::MissingHeader)
        );
        assert_eq!(extract(&HeaderMap::new()), None);
    }

    #[test]
    fn test_malformed_traceparent_is_none() {
        let cases = [
            "",
            "garbage",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "0-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e473-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-1",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-zz",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-+0f067aa0ba902b7-01",
        ];
        for case in cases {
            let mut carrier = HashMap::new();
            carrier.insert(TRACEPARENT_HEADER.to_string(), case.to_string());
            assert_eq!(extract(&carrier), None, "accepted {case:?}");
        }
    }

    #[test]
    fn test_future_version_ignores_trailing_fields() {
        let mut carrier = HashMap::new();
        carrier.insert(
            TRACEPARENT_HEADER.to_string(),
            "cc-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-what-the-future-holds"
                .to_string(),
        );
        assert_eq!(extract(&carrier), Some(sample_context()));
    }

    #[test]
    fn test_invalid_context_is_not_injected() {
        let cx = TraceContext::new(TraceId::INVALID, SpanId::random(), TraceFlags::SAMPLED);
        let mut headers = HeaderMap::new();
        inject(&cx, &mut headers);
        assert!(headers.is_empty());
    }
}
