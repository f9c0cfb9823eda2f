//! Demo HTTP server with traced handlers.
//!
//! Routes:
//! - `/hello`     answers `Hello, World`
//! - `/error`     answers 500
//! - `/httpbin/*` proxies to the upstream base URL with a traced client
//!
//! Configuration comes from the environment (see `telemetry_pipeline::config`).

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use telemetry_pipeline::{
    ErrorHandler, Handler, HelloHandler, Pipeline, ProxyHandler, ReqwestTransport, Resource,
    Router, Settings, TracedClient, TracedHandler, logging,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

const SERVICE_NAME: &str = "example-otel/server";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::new()?;
    logging::init(&settings)?;

    let resource = Resource::new(settings.service_name_or(SERVICE_NAME))
        .with_version(env!("CARGO_PKG_VERSION"));
    let pipeline = Pipeline::from_settings(&settings, resource)?;
    let tracer = pipeline.tracer();
    let logs = pipeline.logs();

    let upstream = TracedClient::new(ReqwestTransport::new(UPSTREAM_TIMEOUT)?, tracer.clone());
    let routes = Router::new()
        .route(
            "/hello",
            TracedHandler::new(HelloHandler::new(logs.clone()), tracer.clone(), "hello"),
        )
        .route(
            "/error",
            TracedHandler::new(ErrorHandler::new(logs.clone()), tracer.clone(), "error"),
        )
        .route(
            "/httpbin/",
            TracedHandler::new(
                ProxyHandler::new(upstream, logs, "/httpbin/", settings.upstream_url.clone()),
                tracer,
                "httpbin",
            ),
        );

    let app = axum::Router::new()
        .fallback(dispatch)
        .with_state(Arc::new(routes));

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, upstream = %settings.upstream_url, "server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("flushing telemetry");
    if let Err(e) = pipeline.shutdown(SHUTDOWN_TIMEOUT).await {
        warn!(error = %e, "telemetry not fully exported");
    }

    served?;
    Ok(())
}

/// Hands every request to the traced router.
async fn dispatch(State(routes): State<Arc<Router>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    routes
        .call(None, http::Request::from_parts(parts, body))
        .await
        .map(Body::from)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!(error = %e, "cannot listen for ctrl-c, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
