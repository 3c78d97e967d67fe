//! Batch Sinks
//!
//! Implementations of the `BatchSink` port: the production HTTP
//! forwarder and an in-memory collector for tests.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::domain::model::LogBatch;
use crate::domain::ports::BatchSink;
use crate::error::{Error, Result};

/// Forwards batches to the log store's ingest endpoint as JSON.
pub struct HttpBatchSink {
    client: Client,
    endpoint: String,
}

impl HttpBatchSink {
    /// Create a sink posting to `<destination>/api/v1/batch`.
    pub fn new(destination: &str, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/v1/batch", destination.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl BatchSink for HttpBatchSink {
    async fn send(&self, batch: &LogBatch) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(batch)
            .send()
            .await
            .map_err(Error::ShipConnection)?;

        if !response.status().is_success() {
            return Err(Error::ShipRejected {
                status: response.status().as_u16(),
            });
        }

        debug!(
            "Shipped batch {} ({} records)",
            batch.batch_id,
            batch.len()
        );
        Ok(())
    }
}

/// In-memory batch collector for testing.
///
/// Collects delivered batches for later inspection during tests.
#[derive(Debug, Default)]
pub struct InMemoryBatchSink {
    batches: parking_lot::RwLock<Vec<LogBatch>>,
}

impl InMemoryBatchSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All batches delivered so far.
    pub fn batches(&self) -> Vec<LogBatch> {
        self.batches.read().clone()
    }

    /// Number of delivered batches.
    pub fn len(&self) -> usize {
        self.batches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.read().is_empty()
    }

    /// Total records across delivered batches.
    pub fn record_count(&self) -> usize {
        self.batches.read().iter().map(|b| b.len()).sum()
    }
}

#[async_trait]
impl BatchSink for InMemoryBatchSink {
    async fn send(&self, batch: &LogBatch) -> Result<()> {
        self.batches.write().push(batch.clone());
        Ok(())
    }
}
