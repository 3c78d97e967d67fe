//! Pipeline Value Objects
//!
//! Core immutable data types shared by every pipeline component: metric
//! samples and series identity, log records and their dedup identity, and
//! scrape target configuration.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Labels
// =============================================================================

/// An ordered label set identifying a series.
///
/// Labels are stored sorted by name so that two logically equal label sets
/// always hash, compare, and render identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// Create an empty label set.
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insertion.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Insert a label, replacing any previous value for the name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Look up a label value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Iterate label pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that every pair in `matchers` is present with an equal value.
    ///
    /// Label names absent from the matchers are unconstrained.
    pub fn matches(&self, matchers: &Labels) -> bool {
        matchers
            .iter()
            .all(|(name, value)| self.get(name) == Some(value))
    }
}

impl std::fmt::Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}=\"{}\"", name, value)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// =============================================================================
// Samples and Series Identity
// =============================================================================

/// A single timestamped measurement. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// The measured value.
    pub value: f64,
}

impl Sample {
    /// Create a sample with the given timestamp and value.
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }

    /// Create a sample stamped with the current wall-clock time.
    pub fn now(value: f64) -> Self {
        Self::new(Utc::now().timestamp_millis(), value)
    }
}

/// Identity of a series: metric name plus its full label set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub name: String,
    pub labels: Labels,
}

impl SeriesKey {
    pub fn new(name: impl Into<String>, labels: Labels) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.labels.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}", self.name, self.labels)
        }
    }
}

/// The kind of a registered metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Histogram => write!(f, "histogram"),
        }
    }
}

// =============================================================================
// Log Records
// =============================================================================

/// A structured log record. Immutable once shipped.
///
/// `source` and `offset` together identify the record for deduplication:
/// the offset is the record's position in its source stream and never
/// changes across redeliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub offset: u64,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub message: String,
}

impl LogRecord {
    /// Dedup identity of this record.
    pub fn id(&self) -> RecordId {
        RecordId {
            source: self.source.clone(),
            offset: self.offset,
        }
    }

    /// Validate the record for ingestion.
    ///
    /// A record must name its source and carry either a message or at
    /// least one structured field.
    pub fn validate(&self) -> Result<(), String> {
        if self.source.is_empty() {
            return Err("record has no source".to_string());
        }
        if self.message.is_empty() && self.fields.is_empty() {
            return Err("record has neither message nor fields".to_string());
        }
        Ok(())
    }
}

/// Dedup identity of a log record: source plus original offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub source: String,
    pub offset: u64,
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.source, self.offset)
    }
}

/// A bounded group of records shipped together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    pub batch_id: Uuid,
    pub source: String,
    pub records: Vec<LogRecord>,
}

impl LogBatch {
    /// Create a batch with a fresh id.
    pub fn new(source: impl Into<String>, records: Vec<LogRecord>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            source: source.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =============================================================================
// Scrape Targets
// =============================================================================

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// An endpoint configured for periodic metrics collection.
///
/// Configuration only; runtime scrape state lives in the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTarget {
    /// Host and port, e.g. `app-1:8080`.
    pub address: String,
    /// Exposition path on the target.
    #[serde(default = "default_metrics_path")]
    pub path: String,
    /// Per-target scrape interval override in seconds.
    #[serde(default)]
    pub interval_seconds: Option<u64>,
}

impl ScrapeTarget {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            path: default_metrics_path(),
            interval_seconds: None,
        }
    }

    /// Full pull URL for this target.
    pub fn url(&self) -> String {
        format!("http://{}{}", self.address, self.path)
    }
}
