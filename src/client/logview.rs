//! Log Viewer
//!
//! Fetches matching records from the store's search API and formats
//! them one line per record, oldest first.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::domain::model::LogRecord;
use crate::error::{Error, Result};
use crate::store::server::SearchResponse;

/// Read-only client for the log store search API.
pub struct LogViewClient {
    client: Client,
    base_url: String,
}

/// Search parameters forwarded to the store.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub query: Option<String>,
    pub fields: Vec<(String, String)>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub limit: Option<usize>,
}

impl LogViewClient {
    pub fn new(store_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: store_url.trim_end_matches('/').to_string(),
        })
    }

    /// Run one search against the store.
    pub async fn search(&self, params: &SearchParams) -> Result<SearchResponse> {
        let mut url = format!("{}/api/v1/search?", self.base_url);
        if let Some(query) = &params.query {
            url.push_str(&format!("query={}&", urlencoding::encode(query)));
        }
        for (name, value) in &params.fields {
            url.push_str(&format!("field.{}={}&", name, urlencoding::encode(value)));
        }
        if let Some(start_ms) = params.start_ms {
            url.push_str(&format!("start_ms={}&", start_ms));
        }
        if let Some(end_ms) = params.end_ms {
            url.push_str(&format!("end_ms={}&", end_ms));
        }
        if let Some(limit) = params.limit {
            url.push_str(&format!("limit={}&", limit));
        }
        let url = url.trim_end_matches(['&', '?']).to_string();

        debug!("Log search: {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Error::ShipConnection)?;

        if !response.status().is_success() {
            return Err(Error::Query(format!(
                "store returned status {}",
                response.status().as_u16()
            )));
        }

        response
            .json::<SearchResponse>()
            .await
            .map_err(Error::ShipConnection)
    }

    /// Fetch and format matching records, one line each.
    pub async fn render(&self, params: &SearchParams) -> Result<String> {
        let response = self.search(params).await?;

        if response.records.is_empty() {
            return Ok("no matching records\n".to_string());
        }

        let mut out = String::new();
        for record in &response.records {
            out.push_str(&render_record(record));
            out.push('\n');
        }
        out.push_str(&format!("{} records\n", response.count));
        Ok(out)
    }
}

/// Format one record as a single line.
pub fn render_record(record: &LogRecord) -> String {
    let mut line = format!(
        "{} [{}] {}",
        record.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        record.id(),
        record.message
    );
    for (name, value) in &record.fields {
        line.push_str(&format!(" {}={}", name, value));
    }
    line
}
