//! Dashboard Renderer
//!
//! Fetches a metric window from the collector's range-query API and
//! renders each matched series as a fixed-width text panel.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use reqwest::Client;
use tracing::debug;

use crate::collector::server::{QueryResponse, QuerySeries};
use crate::domain::model::Labels;
use crate::error::{Error, Result};

const PANEL_WIDTH: usize = 60;

/// Read-only client for the collector query API.
pub struct DashboardClient {
    client: Client,
    base_url: String,
}

impl DashboardClient {
    pub fn new(collector_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: collector_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch samples for one metric over a time window.
    pub async fn query_range(
        &self,
        name: &str,
        matchers: &Labels,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<QueryResponse> {
        let mut url = format!(
            "{}/api/v1/query_range?name={}&start_ms={}&end_ms={}",
            self.base_url,
            urlencoding::encode(name),
            start_ms,
            end_ms
        );
        for (label, value) in matchers.iter() {
            url.push_str(&format!(
                "&label.{}={}",
                label,
                urlencoding::encode(value)
            ));
        }

        debug!("Dashboard query: {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Error::ScrapeConnection)?;

        if !response.status().is_success() {
            return Err(Error::Query(format!(
                "collector returned status {}",
                response.status().as_u16()
            )));
        }

        response
            .json::<QueryResponse>()
            .await
            .map_err(Error::ScrapeConnection)
    }

    /// Fetch and render a metric window as a text panel per series.
    pub async fn render_panel(
        &self,
        name: &str,
        matchers: &Labels,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<String> {
        let response = self.query_range(name, matchers, start_ms, end_ms).await?;

        if response.data.result.is_empty() {
            return Ok(format!("{}: no data in window\n", name));
        }

        let mut out = String::new();
        for series in &response.data.result {
            out.push_str(&render_series(series));
            out.push('\n');
        }
        Ok(out)
    }
}

/// Render one series: a header, a bar per sample scaled to the series
/// maximum, and a min/max/avg footer.
pub fn render_series(series: &QuerySeries) -> String {
    let name = series
        .metric
        .get("__name__")
        .map(String::as_str)
        .unwrap_or("?");
    let labels: Vec<String> = series
        .metric
        .iter()
        .filter(|(k, _)| k.as_str() != "__name__")
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect();

    let mut out = if labels.is_empty() {
        format!("=== {} ===\n", name)
    } else {
        format!("=== {}{{{}}} ===\n", name, labels.join(","))
    };

    let values: Vec<(i64, f64)> = series
        .values
        .iter()
        .filter_map(|(ts, v)| v.parse::<f64>().ok().map(|v| (*ts, v)))
        .collect();

    if values.is_empty() {
        out.push_str("(no samples)\n");
        return out;
    }

    let max = values.iter().map(|(_, v)| *v).fold(f64::MIN, f64::max);
    let min = values.iter().map(|(_, v)| *v).fold(f64::MAX, f64::min);
    let sum: f64 = values.iter().map(|(_, v)| *v).sum();
    let avg = sum / values.len() as f64;

    for (ts, value) in &values {
        let width = if max > 0.0 {
            ((value / max) * PANEL_WIDTH as f64).round() as usize
        } else {
            0
        };
        let when = Utc
            .timestamp_millis_opt(*ts)
            .single()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| ts.to_string());
        out.push_str(&format!(
            "{} |{:<width$}| {}\n",
            when,
            "#".repeat(width),
            value,
            width = PANEL_WIDTH
        ));
    }

    out.push_str(&format!(
        "min={} max={} avg={:.2} samples={}\n",
        min,
        max,
        avg,
        values.len()
    ));
    out
}
