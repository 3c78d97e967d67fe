//! ObsFlow - Application Metrics and Log Pipeline
//!
//! A pull-based metrics pipeline and an at-least-once log pipeline
//! sharing one binary, with read-only query clients on top.
//!
//! # Architecture
//!
//! ```text
//! Emitter ──pull── Collector ──query── Dashboard
//! Shipper ──push── Log Store ──query── Log Viewer
//! ```
//!
//! The emitter and shipper are passive producers inside (or beside) the
//! instrumented application; the collector and store are the active
//! poller and ingester; the dashboard and log viewer are stateless
//! query clients. No component depends on another for correctness
//! beyond availability.
//!
//! # Modules
//!
//! - [`client`] - Dashboard and log-viewer query clients
//! - [`collector`] - Scrape scheduler, series store, query API
//! - [`domain`] - Shared value objects and component ports
//! - [`emitter`] - In-process metric registry and pull endpoint
//! - [`error`] - Error types
//! - [`shipper`] - Tail-and-flush log forwarder
//! - [`store`] - Deduplicating log store and search API

pub mod client;
pub mod collector;
pub mod domain;
pub mod emitter;
pub mod error;
pub mod shipper;
pub mod store;

// Re-export commonly used types
pub use client::{DashboardClient, LogViewClient};
pub use collector::{Scraper, SeriesStore};
pub use domain::model::{Labels, LogBatch, LogRecord, Sample, ScrapeTarget, SeriesKey};
pub use emitter::MetricRegistry;
pub use error::{Error, Result};
pub use shipper::Shipper;
pub use store::LogStore;
