//! Error types for the obsflow pipeline

use thiserror::Error;

use crate::domain::model::MetricKind;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Scrape connection error (timeout, refused, DNS)
    #[error("scrape connection error: {0}")]
    ScrapeConnection(#[source] reqwest::Error),

    /// Scrape returned a non-success HTTP status
    #[error("scrape of {target} failed with status {status}")]
    ScrapeStatus { target: String, status: u16 },

    /// Scrape did not complete within the per-target timeout
    #[error("scrape of {target} timed out")]
    ScrapeTimeout { target: String },

    /// A metric name was re-registered with a different kind
    #[error("metric {name} already registered as {existing}, cannot re-register as {requested}")]
    MetricKindConflict {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    /// Ship connection error
    #[error("ship connection error: {0}")]
    ShipConnection(#[source] reqwest::Error),

    /// The log store rejected a shipped batch
    #[error("batch rejected by store with status {status}")]
    ShipRejected { status: u16 },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file parse error
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Query error (bad parameters, unreachable backend)
    #[error("query error: {0}")]
    Query(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}
