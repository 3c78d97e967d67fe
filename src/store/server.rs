//! Store Ingest and Search API
//!
//! HTTP surface of the log store: batch ingestion, record search, and
//! store counters.

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::model::{LogBatch, LogRecord};
use crate::error::{Error, Result};
use crate::store::index::{tokenize, LogQuery};
use crate::store::ingest::{IngestSummary, LogStore};

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    #[serde(flatten)]
    pub summary: IngestSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub status: String,
    pub count: usize,
    pub records: Vec<LogRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}

// =============================================================================
// Handlers
// =============================================================================

fn parse_query_params(query: Option<&str>) -> Vec<(String, String)> {
    let Some(query) = query else {
        return vec![];
    };
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            let key = urlencoding::decode(key).ok()?.into_owned();
            let value = urlencoding::decode(value).ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}

/// Translate search URL parameters into a store query.
pub fn parse_search_query(query: Option<&str>) -> Result<LogQuery> {
    let mut out = LogQuery::default();

    for (key, value) in parse_query_params(query) {
        match key.as_str() {
            "query" => out.tokens = tokenize(&value),
            "start_ms" => {
                out.start_ms = Some(
                    value
                        .parse()
                        .map_err(|_| Error::Query(format!("invalid start_ms: {}", value)))?,
                );
            }
            "end_ms" => {
                out.end_ms = Some(
                    value
                        .parse()
                        .map_err(|_| Error::Query(format!("invalid end_ms: {}", value)))?,
                );
            }
            "limit" => {
                out.limit = Some(
                    value
                        .parse()
                        .map_err(|_| Error::Query(format!("invalid limit: {}", value)))?,
                );
            }
            other => {
                if let Some(field) = other.strip_prefix("field.") {
                    out.fields.push((field.to_string(), value));
                }
                // Unknown parameters are ignored
            }
        }
    }

    Ok(out)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let payload = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(payload)))
        .unwrap()
}

fn error_response(status: StatusCode, error: String) -> Response<Full<Bytes>> {
    json_response(
        status,
        &ErrorResponse {
            status: "error".to_string(),
            error,
        },
    )
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    store: Arc<LogStore>,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    match (method.as_str(), path.as_str()) {
        ("POST", "/api/v1/batch") => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        format!("failed to read body: {}", e),
                    )
                }
            };
            match serde_json::from_slice::<LogBatch>(&body) {
                Ok(batch) => {
                    let summary = store.ingest(&batch);
                    json_response(
                        StatusCode::OK,
                        &IngestResponse {
                            status: "success".to_string(),
                            summary,
                        },
                    )
                }
                Err(e) => {
                    error_response(StatusCode::BAD_REQUEST, format!("invalid batch: {}", e))
                }
            }
        }
        ("GET", "/api/v1/search") => match parse_search_query(query.as_deref()) {
            Ok(query) => {
                let hits = store.search(&query);
                json_response(
                    StatusCode::OK,
                    &SearchResponse {
                        status: "success".to_string(),
                        count: hits.len(),
                        records: hits.into_iter().map(|h| h.record).collect(),
                    },
                )
            }
            Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        },
        ("GET", "/api/v1/stats") => json_response(StatusCode::OK, &store.stats()),
        ("GET", "/healthz") | ("GET", "/livez") => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .unwrap(),
        _ => error_response(StatusCode::NOT_FOUND, "not found".to_string()),
    }
}

/// Run the store server until cancelled or the listener fails.
pub async fn run_store_server(
    addr: &str,
    store: Arc<LogStore>,
    cancel: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("invalid store listen address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind store server: {}", e)))?;

    info!("Log store listening on {}", addr);

    loop {
        let (stream, _) = tokio::select! {
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("store accept error: {}", e)))?,
            _ = cancel.cancelled() => {
                info!("Log store stopping");
                return Ok(());
            }
        };

        let io = TokioIo::new(stream);
        let store = store.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let store = store.clone();
                async move { Ok::<_, std::convert::Infallible>(handle(req, store).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Store connection error: {}", e);
            }
        });
    }
}
