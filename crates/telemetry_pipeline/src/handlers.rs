//! Reference handlers served by the demo server.

use crate::context::TraceContext;
use crate::handler::{Handler, HttpRequest, HttpResponse, text_response};
use crate::instrument::TracedClient;
use crate::log::{LogEmitter, Severity};
use crate::semconv;
use crate::span::{AttributeValue, Attributes};
use crate::transport::Transport;
use bytes::Bytes;
use http::StatusCode;
use http::header::CONTENT_TYPE;

fn log_request(logs: &LogEmitter, request: &HttpRequest, cx: Option<&TraceContext>) {
    let mut attributes = Attributes::new();
    attributes.insert(
        semconv::HTTP_REQUEST_METHOD.to_string(),
        AttributeValue::from(request.method().as_str()),
    );
    attributes.insert(
        semconv::URL_PATH.to_string(),
        AttributeValue::from(request.uri().path()),
    );
    logs.emit(Severity::Info, "Received request", attributes, cx);
}

/// Answers `Hello, World`.
#[derive(Debug, Clone)]
pub struct HelloHandler {
    logs: LogEmitter,
}

impl HelloHandler {
    pub fn new(logs: LogEmitter) -> Self {
        Self { logs }
    }
}

impl Handler for HelloHandler {
    async fn call(&self, cx: Option<TraceContext>, request: HttpRequest) -> HttpResponse {
        log_request(&self.logs, &request, cx.as_ref());
        text_response(StatusCode::OK, "Hello, World")
    }
}

/// Always fails with 500.
#[derive(Debug, Clone)]
pub struct ErrorHandler {
    logs: LogEmitter,
}

impl ErrorHandler {
    pub fn new(logs: LogEmitter) -> Self {
        Self { logs }
    }
}

impl Handler for ErrorHandler {
    async fn call(&self, cx: Option<TraceContext>, request: HttpRequest) -> HttpResponse {
        log_request(&self.logs, &request, cx.as_ref());
        self.logs.error("request failed on purpose", cx.as_ref());
        text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error\n")
    }
}

/// Forwards `GET {prefix}/rest` to `{upstream}/rest` through a traced
/// client, using the incoming context as the parent of the client span.
pub struct ProxyHandler<T> {
    client: TracedClient<T>,
    logs: LogEmitter,
    prefix: String,
    upstream: String,
}

impl<T: Transport> ProxyHandler<T> {
    pub fn new(
        client: TracedClient<T>,
        logs: LogEmitter,
        prefix: impl Into<String>,
        upstream: impl Into<String>,
    ) -> Self {
        Self {
            client,
            logs,
            prefix: prefix.into(),
            upstream: upstream.into(),
        }
    }

    /// Upstream URL for a request path, or `None` if the path is outside
    /// the prefix.
    pub fn target_url(&self, path_and_query: &str) -> Option<String> {
        let rest = path_and_query.strip_prefix(self.prefix.trim_end_matches('/'))?;
        if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('?')) {
            return None;
        }
        let base = self.upstream.trim_end_matches('/');
        if rest.starts_with('/') {
            Some(format!("{base}{rest}"))
        } else {
            Some(format!("{base}/{rest}"))
        }
    }

    fn failure(&self, reason: &str, cx: Option<&TraceContext>) -> HttpResponse {
        self.logs.warn(format!("upstream request failed: {reason}"), cx);
        text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch data from upstream\n",
        )
    }
}

impl<T: Transport> Handler for ProxyHandler<T> {
    async fn call(&self, cx: Option<TraceContext>, request: HttpRequest) -> HttpResponse {
        log_request(&self.logs, &request, cx.as_ref());

        let path_and_query = request
            .uri()
            .path_and_query()
            .map_or_else(|| request.uri().path(), |pq| pq.as_str());
        let Some(url) = self.target_url(path_and_query) else {
            return text_response(StatusCode::NOT_FOUND, "404 page not found\n");
        };

        let outbound = match http::Request::get(url.as_str()).body(Bytes::new()) {
            Ok(outbound) => outbound,
            Err(e) => return self.failure(&e.to_string(), cx.as_ref()),
        };

        match self.client.send("GET", cx.as_ref(), outbound).await {
            Ok(upstream) => {
                let mut response = http::Response::new(upstream.body().clone());
                *response.status_mut() = upstream.status();
                if let Some(content_type) = upstream.headers().get(CONTENT_TYPE) {
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, content_type.clone());
                }
                response
            }
            Err(e) => self.failure(&e.to_string(), cx.as_ref()),
        }
    }
}
