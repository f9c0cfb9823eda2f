//! Tracing wrappers for both sides of an HTTP call.
//!
//! [`TracedClient`] starts a client span, injects its context (baggage
//! included) into the outgoing headers and records the outcome.
//! [`TracedHandler`] extracts the incoming context, starts a server span
//! around the wrapped handler and passes the span's context into it.

use crate::context::TraceContext;
use crate::handler::{Handler, HttpRequest, HttpResponse};
use crate::propagation;
use crate::semconv;
use crate::span::{SpanKind, SpanStatus};
use crate::tracer::{ActiveSpan, Tracer};
use crate::transport::{Transport, TransportError};
use http::StatusCode;
use http::header::HOST;
use thiserror::Error;

/// A response with a 5xx status, recorded on client spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("server responded with {0}")]
pub struct HttpStatusError(pub StatusCode);

/// Server-side wrapper that owns the handler it decorates.
pub struct TracedHandler<H> {
    inner: H,
    tracer: Tracer,
    name: String,
}

impl<H: Handler> TracedHandler<H> {
    /// `name` is the server span's name.
    pub fn new(inner: H, tracer: Tracer, name: impl Into<String>) -> Self {
        Self {
            inner,
            tracer,
            name: name.into(),
        }
    }
}

impl<H: Handler> Handler for TracedHandler<H> {
    /// The parent is the context carried in the request headers; without
    /// one, the context handed in by the caller (if any) is used.
    async fn call(&self, cx: Option<TraceContext>, request: HttpRequest) -> HttpResponse {
        let parent = propagation::extract(request.headers()).or(cx);
        let mut span = self
            .tracer
            .start_span(self.name.as_str(), SpanKind::Server, parent.as_ref());

        span.set_attribute(semconv::HTTP_REQUEST_METHOD, request.method().as_str());
        span.set_attribute(semconv::URL_PATH, request.uri().path());
        if let Some(host) = request.headers().get(HOST).and_then(|h| h.to_str().ok()) {
            span.set_attribute(semconv::SERVER_ADDRESS, host);
        }

        let response = self.inner.call(Some(span.context().clone()), request).await;

        let status = response.status();
        span.set_attribute(semconv::HTTP_RESPONSE_STATUS_CODE, status.as_u16());
        if status.is_server_error() {
            span.set_status(SpanStatus::error(status.to_string()));
        }
        span.end();
        response
    }
}

/// Client-side wrapper around a [`Transport`].
pub struct TracedClient<T> {
    transport: T,
    tracer: Tracer,
}

impl<T: Transport> TracedClient<T> {
    pub fn new(transport: T, tracer: Tracer) -> Self {
        Self { transport, tracer }
    }

    /// Sends `request` inside a client span named `name`, child of
    /// `parent`. The span ends before this returns.
    pub async fn send(
        &self,
        name: &str,
        parent: Option<&TraceContext>,
        mut request: HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        let mut span = self.tracer.start_span(name, SpanKind::Client, parent);
        span.set_attribute(semconv::HTTP_REQUEST_METHOD, request.method().as_str());
        span.set_attribute(semconv::URL_FULL, request.uri().to_string());
        if let Some(host) = request.uri().host() {
            span.set_attribute(semconv::SERVER_ADDRESS, host);
        }
        propagation::inject(span.context(), request.headers_mut());

        let result = self.transport.send(request).await;
        record_outcome(&mut span, &result);
        span.end();
        result
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }
}

fn record_outcome(span: &mut ActiveSpan, result: &Result<HttpResponse, TransportError>) {
    match result {
        Ok(response) => {
            let status = response.status();
            span.set_attribute(semconv::HTTP_RESPONSE_STATUS_CODE, status.as_u16());
            if status.is_server_error() {
                span.record_error(&HttpStatusError(status));
            }
        }
        Err(e) => span.record_error(e),
    }
}
