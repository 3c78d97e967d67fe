//! Domain Ports
//!
//! Traits at the component seams. Infrastructure adapters (HTTP client
//! implementations) and in-memory test doubles both implement these, so the
//! scrape and ship paths can be exercised without a network.

use async_trait::async_trait;

use crate::domain::model::{LogBatch, ScrapeTarget};
use crate::error::Result;

/// Port for pulling one exposition snapshot from a scrape target.
///
/// The collector drives this on every tick; the production implementation
/// is an HTTP GET against `target.url()`.
#[async_trait]
pub trait ScrapeFetcher: Send + Sync {
    /// Fetch the raw text exposition from a target.
    async fn fetch(&self, target: &ScrapeTarget) -> Result<String>;
}

/// Port for delivering a log batch downstream.
///
/// Delivery is at-least-once: the store deduplicates, so implementations
/// may redeliver a batch that already succeeded.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Deliver one batch. An error means the whole batch was not accepted.
    async fn send(&self, batch: &LogBatch) -> Result<()>;
}
