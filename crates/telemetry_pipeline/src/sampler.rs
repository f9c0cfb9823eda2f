//! Root span sampling policies
//!
//! A sampler is only consulted for root spans. Child spans inherit the
//! sampled flag of their parent so a trace is kept or dropped as a whole.

use crate::context::TraceId;
use crate::span::SpanKind;
use std::fmt::Debug;

/// Sampling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingDecision {
    /// Don't record or export
    Drop,
    /// Record and export
    RecordAndSample,
}

impl SamplingDecision {
    pub fn is_sampled(&self) -> bool {
        matches!(self, SamplingDecision::RecordAndSample)
    }
}

/// Inputs available to a sampler when a root span starts.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams<'a> {
    pub trace_id: TraceId,
    pub name: &'a str,
    pub kind: SpanKind,
}

/// Pluggable root sampling policy.
pub trait Sampler: Send + Sync + Debug {
    fn should_sample(&self, params: &SamplingParams<'_>) -> SamplingDecision;

    /// Short human readable description, used in startup logs.
    fn description(&self) -> String;
}

/// Samples every trace. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOn;

impl Sampler for AlwaysOn {
    fn should_sample(&self, _params: &SamplingParams<'_>) -> SamplingDecision {
        SamplingDecision::RecordAndSample
    }

    fn description(&self) -> String {
        "AlwaysOn".to_string()
    }
}

/// Samples nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOff;

impl Sampler for AlwaysOff {
    fn should_sample(&self, _params: &SamplingParams<'_>) -> SamplingDecision {
        SamplingDecision::Drop
    }

    fn description(&self) -> String {
        "AlwaysOff".to_string()
    }
}

/// Samples a deterministic fraction of traces, keyed on the low 64 bits of
/// the trace id so every service makes the same choice for a given trace.
#[derive(Debug, Clone, Copy)]
pub struct TraceIdRatio {
    ratio: f64,
}

impl TraceIdRatio {
    /// `ratio` is clamped to `0.0..=1.0`.
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio: if ratio.is_nan() {
                0.0
            } else {
                ratio.clamp(0.0, 1.0)
            },
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }
}

impl Sampler for TraceIdRatio {
    fn should_sample(&self, params: &SamplingParams<'_>) -> SamplingDecision {
        if self.ratio >= 1.0 {
            return SamplingDecision::RecordAndSample;
        }
        if self.ratio <= 0.0 {
            return SamplingDecision::Drop;
        }

        let key = params.trace_id.to_u128() as u64;
        if (key as f64 / u64::MAX as f64) < self.ratio {
            SamplingDecision::RecordAndSample
        } else {
            SamplingDecision::Drop
        }
    }

    fn description(&self) -> String {
        format!("TraceIdRatioBased{{{}}}", self.ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(trace_id: TraceId) -> SamplingParams<'static> {
        SamplingParams {
            trace_id,
            name: "op",
            kind: SpanKind::Internal,
        }
    }

    #[test]
    fn test_always_on_and_off() {
        let p = params(TraceId::random());
        assert!(AlwaysOn.should_sample(&p).is_sampled());
        assert!(!AlwaysOff.should_sample(&p).is_sampled());
    }

    #[test]
    fn test_ratio_bounds() {
        let p = params(TraceId::from_u128(u128::from(u64::MAX)));
        assert!(TraceIdRatio::new(1.0).should_sample(&p).is_sampled());
        assert!(!TraceIdRatio::new(0.0).should_sample(&p).is_sampled());
        assert_eq!(TraceIdRatio::new(7.0).ratio(), 1.0);
        assert_eq!(TraceIdRatio::new(f64::NAN).ratio(), 0.0);
    }

    #[test]
    fn test_ratio_uses_low_bits() {
        let sampler = TraceIdRatio::new(0.5);
        let low = TraceId::from_u128((u128::MAX << 64) | 1);
        let high = TraceId::from_u128(u128::from(u64::MAX - 1));
        assert!(sampler.should_sample(&params(low)).is_sampled());
        assert!(!sampler.should_sample(&params(high)).is_sampled());
    }

    #[test]
    fn test_ratio_is_roughly_proportional() {
        let sampler = TraceIdRatio::new(0.25);
        let sampled = (0..10_000)
            .map(|_| params(TraceId::random()))
            .filter(|p| sampler.should_sample(p).is_sampled())
            .count();
        assert!((1_500..3_500).contains(&sampled), "sampled {sampled}");
    }
}
