mod common;

use common::{SHUTDOWN, get, pipeline, server_routes};
use http::StatusCode;
use http::header::{HeaderMap, HeaderValue};
use std::sync::{Arc, Mutex};
use telemetry_pipeline::propagation::{BAGGAGE_HEADER, TRACEPARENT_HEADER};
use telemetry_pipeline::{
    FinishedSpan, Handler, HelloHandler, HttpRequest, HttpResponse, LoopbackTransport, Router,
    SpanKind, SpanStatus, TraceContext, TracedClient, TracedHandler, extract, text_response,
};

/// Upstream that answers 200 and keeps the headers it was sent.
#[derive(Default)]
struct HeaderCapture(Mutex<Option<HeaderMap>>);

impl Handler for HeaderCapture {
    async fn call(&self, _cx: Option<TraceContext>, request: HttpRequest) -> HttpResponse {
        *self.0.lock().unwrap() = Some(request.headers().clone());
        text_response(StatusCode::OK, "captured")
    }
}

fn span<'a>(spans: &'a [FinishedSpan], name: &str) -> &'a FinishedSpan {
    spans
        .iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("no span named {name}"))
}

#[tokio::test]
async fn test_hello_round_trip() {
    let (pipeline, span_exporter, log_exporter) = pipeline();
    let server = Arc::new(server_routes(&pipeline, Arc::new(Router::new())));
    let client = TracedClient::new(LoopbackTransport::new(server), pipeline.tracer());

    let response = client
        .send("GET", None, get("http://localhost:3030/hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"Hello, World");

    pipeline.shutdown(SHUTDOWN).await.unwrap();

    // both spans leave in the single shutdown flush
    assert_eq!(span_exporter.batch_sizes(), vec![2]);
    let spans = span_exporter.items();
    let client_span = span(&spans, "GET");
    let server_span = span(&spans, "hello");
    assert_eq!(client_span.kind, SpanKind::Client);
    assert_eq!(server_span.kind, SpanKind::Server);
    assert_eq!(client_span.trace_id(), server_span.trace_id());
    assert_eq!(server_span.parent_span_id, Some(client_span.span_id()));
    assert_eq!(client_span.parent_span_id, None);

    // the handler's log is correlated with the server span
    let logs = log_exporter.items();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].body, "Received request");
    assert_eq!(logs[0].trace_id(), Some(server_span.trace_id()));
    assert_eq!(logs[0].span_id(), Some(server_span.span_id()));
}

#[tokio::test]
async fn test_error_route_marks_span_and_correlates_log() {
    let (pipeline, span_exporter, log_exporter) = pipeline();
    let server = server_routes(&pipeline, Arc::new(Router::new()));

    let response = server.call(None, get("/error")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body().as_ref(), b"Internal Server Error\n");

    pipeline.shutdown(SHUTDOWN).await.unwrap();

    let spans = span_exporter.items();
    assert_eq!(spans.len(), 1);
    let server_span = &spans[0];
    assert!(matches!(server_span.status, SpanStatus::Error { .. }));

    let logs = log_exporter.items();
    assert!(!logs.is_empty());
    assert!(
        logs.iter()
            .all(|record| record.trace_id() == Some(server_span.trace_id()))
    );
}

#[tokio::test]
async fn test_proxy_builds_one_trace_chain() {
    let (pipeline, span_exporter, _) = pipeline();
    let upstream = Arc::new(Router::new().route(
        "/get",
        TracedHandler::new(
            HelloHandler::new(pipeline.logs()),
            pipeline.tracer(),
            "upstream",
        ),
    ));
    let server = server_routes(&pipeline, upstream);

    let response = server.call(None, get("/httpbin/get")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"Hello, World");

    pipeline.shutdown(SHUTDOWN).await.unwrap();

    let spans = span_exporter.items();
    assert_eq!(spans.len(), 3);
    let proxy = span(&spans, "httpbin");
    let outbound = span(&spans, "GET");
    let upstream = span(&spans, "upstream");

    assert_eq!(proxy.parent_span_id, None);
    assert_eq!(outbound.parent_span_id, Some(proxy.span_id()));
    assert_eq!(upstream.parent_span_id, Some(outbound.span_id()));
    assert_eq!(outbound.kind, SpanKind::Client);
    assert!(spans.iter().all(|s| s.trace_id() == proxy.trace_id()));
}

#[tokio::test]
async fn test_proxy_forwards_incoming_baggage() {
    let (pipeline, span_exporter, _) = pipeline();
    let capture = Arc::new(HeaderCapture::default());
    let upstream = Arc::new(Router::new().route("/anything", Arc::clone(&capture)));
    let server = server_routes(&pipeline, upstream);

    let mut request = get("/httpbin/anything");
    request.headers_mut().insert(
        TRACEPARENT_HEADER,
        HeaderValue::from_static("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
    );
    request.headers_mut().insert(
        BAGGAGE_HEADER,
        HeaderValue::from_static("userId=alice,session=s%201;ttl=30"),
    );

    let response = server.call(None, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    pipeline.shutdown(SHUTDOWN).await.unwrap();

    let headers = capture.0.lock().unwrap().clone().unwrap();
    assert_eq!(
        headers.get(BAGGAGE_HEADER).unwrap(),
        "userId=alice,session=s%201;ttl=30"
    );
    let forwarded = extract(&headers).unwrap();
    let outbound = span(&span_exporter.items(), "GET").clone();
    assert_eq!(
        forwarded.trace_id.to_hex(),
        "4bf92f3577b34da6a3ce929d0e0e4736"
    );
    assert_eq!(forwarded.span_id, outbound.span_id());
    assert_eq!(forwarded.baggage.get("session"), Some("s 1"));
}

#[tokio::test]
async fn test_proxy_passes_upstream_status_through() {
    let (pipeline, span_exporter, _) = pipeline();
    let server = server_routes(&pipeline, Arc::new(Router::new()));

    let response = server.call(None, get("/httpbin/missing")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    pipeline.shutdown(SHUTDOWN).await.unwrap();

    // a 4xx is not an error on either side
    let spans = span_exporter.items();
    assert!(spans.iter().all(|s| s.status == SpanStatus::Unset));
}

#[tokio::test]
async fn test_unknown_path_creates_no_span() {
    let (pipeline, span_exporter, _) = pipeline();
    let server = server_routes(&pipeline, Arc::new(Router::new()));

    let response = server.call(None, get("/nope")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    pipeline.shutdown(SHUTDOWN).await.unwrap();
    assert_eq!(span_exporter.exported_count(), 0);
}
