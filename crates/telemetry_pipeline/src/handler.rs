//! Request handlers and path routing.
//!
//! A [`Handler`] turns a request into a response. The caller's trace context
//! travels as an explicit argument, so a handler can parent its own spans
//! and correlate its logs without any task-local state.

use crate::context::TraceContext;
use bytes::Bytes;
use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderValue, LOCATION};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HttpRequest = http::Request<Bytes>;
pub type HttpResponse = http::Response<Bytes>;

/// Something that can answer a request.
pub trait Handler: Send + Sync {
    fn call(
        &self,
        cx: Option<TraceContext>,
        request: HttpRequest,
    ) -> impl Future<Output = HttpResponse> + Send;
}

/// Object-safe version of [`Handler`], used by the [`Router`].
pub trait HandlerBoxed: Send + Sync {
    fn call_boxed(
        &self,
        cx: Option<TraceContext>,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = HttpResponse> + Send + '_>>;
}

impl<H: Handler> HandlerBoxed for H {
    fn call_boxed(
        &self,
        cx: Option<TraceContext>,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = HttpResponse> + Send + '_>> {
        Box::pin(self.call(cx, request))
    }
}

impl<H: Handler> Handler for Arc<H> {
    fn call(
        &self,
        cx: Option<TraceContext>,
        request: HttpRequest,
    ) -> impl Future<Output = HttpResponse> + Send {
        H::call(self, cx, request)
    }
}

/// Plain text response with the given status.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = http::Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Maps request paths to handlers.
///
/// A pattern ending in `/` matches its whole subtree; any other pattern
/// matches exactly. Exact matches win, then the longest subtree pattern.
/// A request for a subtree root without the trailing slash is redirected to
/// it. Anything else is a 404.
#[derive(Default)]
pub struct Router {
    exact: HashMap<String, Arc<dyn HandlerBoxed>>,
    subtrees: Vec<(String, Arc<dyn HandlerBoxed>)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `pattern`. A later registration of the same
    /// pattern replaces the earlier one.
    pub fn route(mut self, pattern: impl Into<String>, handler: impl Handler + 'static) -> Self {
        let pattern = pattern.into();
        let handler: Arc<dyn HandlerBoxed> = Arc::new(handler);
        if pattern.ends_with('/') {
            self.subtrees.retain(|(p, _)| *p != pattern);
            self.subtrees.push((pattern, handler));
            // longest first so the first prefix hit is the most specific
            self.subtrees.sort_by_key(|(p, _)| Reverse(p.len()));
        } else {
            self.exact.insert(pattern, handler);
        }
        self
    }

    fn lookup(&self, path: &str) -> Option<&Arc<dyn HandlerBoxed>> {
        self.exact.get(path).or_else(|| {
            self.subtrees
                .iter()
                .find(|(pattern, _)| path.starts_with(pattern.as_str()))
                .map(|(_, handler)| handler)
        })
    }

    fn redirect_target(&self, path: &str) -> Option<String> {
        let with_slash = format!("{path}/");
        self.subtrees
            .iter()
            .any(|(pattern, _)| *pattern == with_slash)
            .then_some(with_slash)
    }
}

impl Handler for Router {
    async fn call(&self, cx: Option<TraceContext>, request: HttpRequest) -> HttpResponse {
        let path = request.uri().path().to_string();
        if let Some(handler) = self.lookup(&path) {
            return handler.call_boxed(cx, request).await;
        }

        if let Some(target) = self.redirect_target(&path) {
            let mut response = text_response(StatusCode::MOVED_PERMANENTLY, Bytes::new());
            if let Ok(location) = HeaderValue::from_str(&target) {
                response.headers_mut().insert(LOCATION, location);
            }
            return response;
        }

        text_response(StatusCode::NOT_FOUND, "404 page not found\n")
    }
}
