//! Metrics Collector
//!
//! Polls configured scrape targets on a fixed interval, appends the
//! returned samples to an in-memory series store, and answers range
//! queries over HTTP. A failing target is marked down for the tick and
//! never blocks the others.

pub mod parse;
pub mod scrape;
pub mod server;
pub mod store;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::model::ScrapeTarget;
use crate::error::{Error, Result};

pub use scrape::{Scraper, TargetStatus};
pub use server::run_collector_server;
pub use store::SeriesStore;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the scrape scheduler.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Interval between scrape ticks.
    pub interval: Duration,

    /// Per-target fetch timeout within a tick.
    pub timeout: Duration,

    /// Targets to poll.
    pub targets: Vec<ScrapeTarget>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(5),
            targets: vec![],
        }
    }
}

/// On-disk YAML shape of the scrape configuration.
///
/// ```yaml
/// interval_seconds: 15
/// timeout_seconds: 5
/// targets:
///   - address: app-1:8080
///   - address: app-2:8080
///     path: /prom
/// ```
#[derive(Debug, Serialize, Deserialize)]
struct ScrapeConfigFile {
    #[serde(default = "default_interval_seconds")]
    interval_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default)]
    targets: Vec<ScrapeTarget>,
}

fn default_interval_seconds() -> u64 {
    15
}

fn default_timeout_seconds() -> u64 {
    5
}

impl ScrapeConfig {
    /// Load from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Parse from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: ScrapeConfigFile = serde_yaml::from_str(text)?;
        if file.interval_seconds == 0 {
            return Err(Error::Config("interval_seconds must be non-zero".into()));
        }
        if file.timeout_seconds == 0 {
            return Err(Error::Config("timeout_seconds must be non-zero".into()));
        }
        Ok(Self {
            interval: Duration::from_secs(file.interval_seconds),
            timeout: Duration::from_secs(file.timeout_seconds),
            targets: file.targets,
        })
    }
}
