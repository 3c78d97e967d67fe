//! Emitter HTTP Server
//!
//! Serves the registry snapshot on `GET /metrics` and liveness on
//! `GET /healthz`. Every handled request increments the built-in
//! `obsflow_http_requests_total` counter and observes
//! `obsflow_http_request_duration_seconds` before the response is produced.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::model::Labels;
use crate::emitter::exposition;
use crate::emitter::registry::MetricRegistry;
use crate::error::{Error, Result};

/// Names of the built-in request series.
pub const REQUESTS_TOTAL: &str = "obsflow_http_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "obsflow_http_request_duration_seconds";

/// Register the built-in request instrumentation families.
///
/// Idempotent; called once at server startup.
pub fn register_builtin(registry: &MetricRegistry) -> Result<()> {
    registry.register_counter(REQUESTS_TOTAL)?;
    registry.register_histogram_with_buckets(
        REQUEST_DURATION_SECONDS,
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
    )?;
    Ok(())
}

/// Handle one request against the registry.
///
/// Instrumentation happens first so the snapshot served by `/metrics`
/// already includes the request being handled.
pub fn handle_request(
    registry: &MetricRegistry,
    path: &str,
    started: Instant,
) -> Response<Full<Bytes>> {
    let path_labels = Labels::empty().with("path", path);
    if let Ok(requests) = registry.register_counter(REQUESTS_TOTAL) {
        requests.with_labels(path_labels.clone()).inc();
    }
    if let Ok(duration) = registry.register_histogram(REQUEST_DURATION_SECONDS) {
        duration
            .with_labels(path_labels)
            .observe_duration(started.elapsed());
    }

    match path {
        "/metrics" => {
            let body = exposition::render(registry);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .unwrap()
        }
        "/healthz" | "/livez" => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .unwrap(),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .unwrap(),
    }
}

/// Run the emitter server until cancelled or the listener fails.
pub async fn run_emitter_server(
    addr: &str,
    registry: Arc<MetricRegistry>,
    cancel: CancellationToken,
) -> Result<()> {
    register_builtin(&registry)?;

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("invalid emitter listen address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind emitter server: {}", e)))?;

    info!("Emitter serving metrics on {}", addr);

    loop {
        let (stream, _) = tokio::select! {
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("emitter accept error: {}", e)))?,
            _ = cancel.cancelled() => {
                info!("Emitter server stopping");
                return Ok(());
            }
        };

        let io = TokioIo::new(stream);
        let registry = registry.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let registry = registry.clone();
                async move {
                    let started = Instant::now();
                    let response = handle_request(&registry, req.uri().path(), started);
                    Ok::<_, std::convert::Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Emitter connection error: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_instrumentation_precedes_response() {
        let registry = MetricRegistry::new();
        register_builtin(&registry).unwrap();

        let response = handle_request(&registry, "/metrics", Instant::now());
        assert_eq!(response.status(), StatusCode::OK);

        // The snapshot the handler just served was taken after the
        // increment, so a second render must show the first request.
        let text = exposition::render(&registry);
        assert!(text.contains("obsflow_http_requests_total{path=\"/metrics\"} 1"));
        assert!(text.contains("obsflow_http_request_duration_seconds_count{path=\"/metrics\"} 1"));
    }

    #[test]
    fn test_unknown_path_is_404_but_counted() {
        let registry = MetricRegistry::new();
        register_builtin(&registry).unwrap();

        let response = handle_request(&registry, "/nope", Instant::now());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let text = exposition::render(&registry);
        assert!(text.contains("obsflow_http_requests_total{path=\"/nope\"} 1"));
    }

    #[test]
    fn test_healthz() {
        let registry = MetricRegistry::new();
        register_builtin(&registry).unwrap();

        let response = handle_request(&registry, "/healthz", Instant::now());
        assert_eq!(response.status(), StatusCode::OK);
    }
}
