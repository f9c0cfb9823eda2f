//! Span lifecycle: start, record, end.
//!
//! There is no ambient "current span". Callers pass the parent context
//! explicitly and get the new span's context back from
//! [`ActiveSpan::context`].
//!
//! An [`ActiveSpan`] is owned by the code path that started it. Ending it
//! freezes the data into a [`FinishedSpan`] and offers it to the span queue
//! exactly once; dropping an active span ends it, so every exit path
//! (early return, `?`, panic unwinding) still produces a span.

use crate::context::{SpanId, TraceContext, TraceFlags, TraceId};
use crate::queue::TelemetrySink;
use crate::sampler::{AlwaysOn, Sampler, SamplingParams};
use crate::semconv;
use crate::span::{AttributeValue, FinishedSpan, SpanData, SpanEvent, SpanKind, SpanStatus};
use std::error::Error;
use std::sync::Arc;

/// Creates spans and hands finished ones to a sink.
#[derive(Clone)]
pub struct Tracer {
    sampler: Arc<dyn Sampler>,
    sink: Arc<dyn TelemetrySink<FinishedSpan>>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("sampler", &self.sampler.description())
            .finish_non_exhaustive()
    }
}

impl Tracer {
    /// A tracer that samples every root span.
    pub fn new(sink: Arc<dyn TelemetrySink<FinishedSpan>>) -> Self {
        Self::with_sampler(sink, Arc::new(AlwaysOn))
    }

    pub fn with_sampler(
        sink: Arc<dyn TelemetrySink<FinishedSpan>>,
        sampler: Arc<dyn Sampler>,
    ) -> Self {
        Self { sampler, sink }
    }

    /// Starts a span.
    ///
    /// With a valid parent the span joins the parent's trace, inherits its
    /// sampled flag, trace state and baggage, and records the parent span
    /// id. Without one (or with an invalid one) it starts a new trace with
    /// empty baggage and the sampler decides.
    pub fn start_span(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        parent: Option<&TraceContext>,
    ) -> ActiveSpan {
        let name = name.into();
        let parent = parent.filter(|p| p.is_valid());

        let context = match parent {
            Some(parent) => {
                let span_id = SpanId::random();
                TraceContext::new(parent.trace_id, span_id, parent.trace_flags)
                    .with_trace_state(parent.trace_state.clone())
                    .with_baggage(parent.baggage.clone())
            }
            None => {
                let trace_id = TraceId::random();
                let decision = self.sampler.should_sample(&SamplingParams {
                    trace_id,
                    name: &name,
                    kind,
                });
                let flags = TraceFlags::NONE.with_sampled(decision.is_sampled());
                TraceContext::new(trace_id, SpanId::random(), flags)
            }
        };

        let data = context.is_sampled().then(|| {
            SpanData::new(context.clone(), parent.map(|p| p.span_id), name, kind)
        });

        ActiveSpan {
            context,
            data,
            sink: Arc::clone(&self.sink),
        }
    }

    /// Ends `span`. Returns the finished span the first time, `None` after
    /// that or when the span was not sampled.
    pub fn end_span(&self, span: &mut ActiveSpan) -> Option<FinishedSpan> {
        span.end()
    }

    /// Marks `span` as failed with `error`.
    pub fn record_error<E: Error + ?Sized>(&self, span: &mut ActiveSpan, error: &E) {
        span.record_error(error);
    }
}

/// A span that is still recording.
///
/// Spans that were not sampled still carry a valid context (so it can be
/// propagated) but record nothing and are never exported.
pub struct ActiveSpan {
    context: TraceContext,
    data: Option<SpanData>,
    sink: Arc<dyn TelemetrySink<FinishedSpan>>,
}

impl ActiveSpan {
    /// This span's own context, to pass to children and to inject.
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// False once ended, and always for spans that were not sampled.
    pub fn is_recording(&self) -> bool {
        self.data.is_some()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if let Some(data) = &mut self.data {
            data.attributes.insert(key.into(), value.into());
        }
    }

    pub fn add_event(&mut self, event: SpanEvent) {
        if let Some(data) = &mut self.data {
            data.events.push(event);
        }
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(data) = &mut self.data {
            data.status = status;
        }
    }

    /// Sets the error status and adds an `exception` event carrying the
    /// error's type name and message.
    pub fn record_error<E: Error + ?Sized>(&mut self, error: &E) {
        if let Some(data) = &mut self.data {
            let message = error.to_string();
            data.events.push(
                SpanEvent::new(semconv::EXCEPTION_EVENT)
                    .with_attribute(semconv::EXCEPTION_TYPE, std::any::type_name::<E>())
                    .with_attribute(semconv::EXCEPTION_MESSAGE, message.clone()),
            );
            data.status = SpanStatus::Error { message };
        }
    }

    /// Freezes the span and offers it to the sink. Only the first call has
    /// any effect.
    pub fn end(&mut self) -> Option<FinishedSpan> {
        let data = self.data.take()?;
        let finished = FinishedSpan::new(data);
        self.sink.offer(finished.clone());
        Some(finished)
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.end();
    }
}

impl std::fmt::Debug for ActiveSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSpan")
            .field("context", &self.context)
            .field("recording", &self.is_recording())
            .finish_non_exhaustive()
    }
}
