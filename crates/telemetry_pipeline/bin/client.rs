//! Demo client: one traced GET inside a root span.

use bytes::Bytes;
use clap::Parser;
use std::time::Duration;
use telemetry_pipeline::{
    Pipeline, ReqwestTransport, Resource, Settings, SpanKind, TracedClient, logging,
};

const SERVICE_NAME: &str = "example-otel/client";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "client", about = "Sends one traced request to the demo server")]
struct Args {
    /// Server URL
    #[arg(long, default_value = "http://localhost:3030/hello")]
    server: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::new()?;
    logging::init(&settings)?;

    let resource = Resource::new(settings.service_name_or(SERVICE_NAME))
        .with_version(env!("CARGO_PKG_VERSION"));
    let pipeline = Pipeline::from_settings(&settings, resource)?;
    let tracer = pipeline.tracer();
    let logs = pipeline.logs();
    let client = TracedClient::new(ReqwestTransport::new(REQUEST_TIMEOUT)?, tracer.clone());

    let request = http::Request::get(args.server.as_str()).body(Bytes::new())?;

    let mut root = tracer.start_span("request start", SpanKind::Internal, None);
    println!("Sending request...");
    let result = client.send("GET", Some(root.context()), request).await;
    let outcome = match result {
        Ok(response) => {
            let status = response.status();
            logs.info(
                format!("response received with status {}", status.as_u16()),
                Some(root.context()),
            );
            let body = String::from_utf8_lossy(response.body()).into_owned();
            Ok((status, body))
        }
        Err(e) => {
            root.record_error(&e);
            logs.error(format!("request failed: {e}"), Some(root.context()));
            Err(e)
        }
    };
    root.end();

    let shutdown = pipeline.shutdown(SHUTDOWN_TIMEOUT).await;

    let (status, body) = outcome?;
    println!("Response Received: {body}");
    println!("Response status: {}", status.as_u16());

    shutdown?;
    Ok(())
}
