//! Collector Query API
//!
//! Read-only HTTP surface over the series store: range queries and
//! per-target scrape status.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::collector::scrape::Scraper;
use crate::collector::store::SeriesStore;
use crate::domain::model::Labels;
use crate::error::{Error, Result};

// =============================================================================
// Wire Types
// =============================================================================

/// Envelope for every query API response.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: String,
    pub data: QueryData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    pub result: Vec<QuerySeries>,
}

/// One matched series: its full label set (metric name under `__name__`)
/// and `[timestamp_ms, "value"]` pairs in time order.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuerySeries {
    pub metric: BTreeMap<String, String>,
    pub values: Vec<(i64, String)>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// Decode `k=v&k2=v2` query strings.
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

/// Build the range-query response for one request.
pub fn handle_query_range(store: &SeriesStore, query: Option<&str>) -> Result<QueryResponse> {
    let params = parse_query_params(query);

    let mut name = None;
    let mut start_ms = i64::MIN;
    let mut end_ms = i64::MAX;
    let mut matchers = Labels::empty();

    for (key, value) in params {
        match key.as_str() {
            "name" => name = Some(value),
            "start_ms" => {
                start_ms = value
                    .parse()
                    .map_err(|_| Error::Query(format!("invalid start_ms: {}", value)))?;
            }
            "end_ms" => {
                end_ms = value
                    .parse()
                    .map_err(|_| Error::Query(format!("invalid end_ms: {}", value)))?;
            }
            other => {
                if let Some(label) = other.strip_prefix("label.") {
                    matchers.insert(label, value);
                }
                // Unknown parameters are ignored
            }
        }
    }

    let name = name.ok_or_else(|| Error::Query("missing required parameter: name".into()))?;

    let result = store
        .range_query(&name, &matchers, start_ms, end_ms)
        .into_iter()
        .map(|(key, samples)| {
            let mut metric: BTreeMap<String, String> = key
                .labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            metric.insert("__name__".to_string(), key.name);
            QuerySeries {
                metric,
                values: samples
                    .into_iter()
                    .map(|s| (s.timestamp_ms, s.value.to_string()))
                    .collect(),
            }
        })
        .collect();

    Ok(QueryResponse {
        status: "success".to_string(),
        data: QueryData {
            result_type: "matrix".to_string(),
            result,
        },
    })
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
    store: Arc<SeriesStore>,
    scraper: Arc<Scraper>,
) -> Response<Full<Bytes>> {
    match (req.method().as_str(), req.uri().path()) {
        ("GET", "/api/v1/query_range") => {
            match handle_query_range(&store, req.uri().query()) {
                Ok(response) => json_response(StatusCode::OK, &response),
                Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
            }
        }
        ("GET", "/api/v1/targets") => json_response(StatusCode::OK, &scraper.statuses()),
        ("GET", "/api/v1/names") => json_response(StatusCode::OK, &store.metric_names()),
        ("GET", "/healthz") | ("GET", "/livez") => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .unwrap(),
        _ => error_response(StatusCode::NOT_FOUND, "not found".to_string()),
    }
}

/// Run the collector query server until cancelled or the listener fails.
pub async fn run_collector_server(
    addr: &str,
    store: Arc<SeriesStore>,
    scraper: Arc<Scraper>,
    cancel: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("invalid collector listen address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind collector server: {}", e)))?;

    info!("Collector query API listening on {}", addr);

    loop {
        let (stream, _) = tokio::select! {
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("collector accept error: {}", e)))?,
            _ = cancel.cancelled() => {
                info!("Collector query API stopping");
                return Ok(());
            }
        };

        let io = TokioIo::new(stream);
        let store = store.clone();
        let scraper = scraper.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let store = store.clone();
                let scraper = scraper.clone();
                async move {
                    Ok::<_, std::convert::Infallible>(handle(req, store, scraper).await)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Collector connection error: {}", e);
            }
        });
    }
}
