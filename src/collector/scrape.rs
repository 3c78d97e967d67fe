//! Scrape Scheduler
//!
//! Polls every configured target on each tick, concurrently and each
//! under its own timeout. A failing target is marked down for the tick
//! (its `up` series records 0) and the remaining targets proceed
//! unaffected.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::collector::parse::parse_exposition;
use crate::collector::store::SeriesStore;
use crate::collector::ScrapeConfig;
use crate::domain::model::{Labels, Sample, ScrapeTarget, SeriesKey};
use crate::domain::ports::ScrapeFetcher;
use crate::error::{Error, Result};

// =============================================================================
// HTTP Fetcher
// =============================================================================

/// Production fetcher: HTTP GET against the target's pull URL.
pub struct HttpScrapeFetcher {
    client: Client,
}

impl HttpScrapeFetcher {
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ScrapeFetcher for HttpScrapeFetcher {
    async fn fetch(&self, target: &ScrapeTarget) -> Result<String> {
        let response = self
            .client
            .get(target.url())
            .send()
            .await
            .map_err(Error::ScrapeConnection)?;

        if !response.status().is_success() {
            return Err(Error::ScrapeStatus {
                target: target.address.clone(),
                status: response.status().as_u16(),
            });
        }

        response.text().await.map_err(Error::ScrapeConnection)
    }
}

// =============================================================================
// Target Status
// =============================================================================

/// Last observed scrape outcome for one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub address: String,
    pub up: bool,
    pub last_scrape: DateTime<Utc>,
    pub last_error: Option<String>,
    pub samples_appended: u64,
    pub lines_skipped: u64,
}

// =============================================================================
// Scraper
// =============================================================================

/// Drives the scrape loop and appends results to the series store.
pub struct Scraper {
    config: ScrapeConfig,
    fetcher: Arc<dyn ScrapeFetcher>,
    store: Arc<SeriesStore>,
    statuses: DashMap<String, TargetStatus>,
}

impl Scraper {
    /// Create a scraper with the production HTTP fetcher.
    pub fn new(config: ScrapeConfig, store: Arc<SeriesStore>) -> Result<Arc<Self>> {
        let fetcher = Arc::new(HttpScrapeFetcher::new(config.timeout)?);
        Ok(Self::with_fetcher(config, store, fetcher))
    }

    /// Create a scraper with a custom fetcher (used by tests).
    pub fn with_fetcher(
        config: ScrapeConfig,
        store: Arc<SeriesStore>,
        fetcher: Arc<dyn ScrapeFetcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            fetcher,
            store,
            statuses: DashMap::new(),
        })
    }

    /// Last scrape outcome per target, sorted by address.
    pub fn statuses(&self) -> Vec<TargetStatus> {
        let mut out: Vec<TargetStatus> = self
            .statuses
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }

    /// Run the scrape loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Scrape loop starting: {} targets every {:?}",
            self.config.targets.len(),
            self.config.interval
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = cancel.cancelled() => {
                    info!("Scrape loop stopping");
                    return;
                }
            }
        }
    }

    /// Scrape all due targets concurrently. One failing target never
    /// blocks or fails the others.
    pub async fn tick(&self) {
        let due: Vec<&ScrapeTarget> = self
            .config
            .targets
            .iter()
            .filter(|t| self.is_due(t))
            .collect();

        join_all(due.iter().map(|target| self.scrape_target(target))).await;
    }

    /// Honor a per-target interval override by skipping early ticks.
    fn is_due(&self, target: &ScrapeTarget) -> bool {
        let Some(override_seconds) = target.interval_seconds else {
            return true;
        };
        match self.statuses.get(&target.address) {
            Some(status) => {
                let elapsed = Utc::now() - status.last_scrape;
                elapsed.num_seconds() >= override_seconds as i64
            }
            None => true,
        }
    }

    #[instrument(skip(self), fields(target = %target.address))]
    async fn scrape_target(&self, target: &ScrapeTarget) {
        let scraped_at = Utc::now();
        let scrape_ms = scraped_at.timestamp_millis();

        let fetched = tokio::time::timeout(self.config.timeout, self.fetcher.fetch(target))
            .await
            .unwrap_or_else(|_| {
                Err(Error::ScrapeTimeout {
                    target: target.address.clone(),
                })
            });

        let status = match fetched {
            Ok(text) => {
                let outcome = parse_exposition(&text);
                if outcome.samples.is_empty() && outcome.skipped_lines > 0 {
                    // Nothing usable came back; treat the payload as malformed
                    warn!(
                        "Target {} returned an unparseable payload ({} lines skipped)",
                        target.address, outcome.skipped_lines
                    );
                    self.record_up(target, false, scrape_ms);
                    TargetStatus {
                        address: target.address.clone(),
                        up: false,
                        last_scrape: scraped_at,
                        last_error: Some("unparseable exposition payload".to_string()),
                        samples_appended: 0,
                        lines_skipped: outcome.skipped_lines as u64,
                    }
                } else {
                    let mut appended = 0u64;
                    for sample in outcome.samples {
                        let labels = sample
                            .labels
                            .with("instance", target.address.clone());
                        let key = SeriesKey::new(sample.name, labels);
                        let timestamp_ms = sample.timestamp_ms.unwrap_or(scrape_ms);
                        if self
                            .store
                            .append(key, Sample::new(timestamp_ms, sample.value))
                        {
                            appended += 1;
                        }
                    }
                    debug!(
                        "Scraped {}: {} samples, {} lines skipped",
                        target.address, appended, outcome.skipped_lines
                    );
                    self.record_up(target, true, scrape_ms);
                    TargetStatus {
                        address: target.address.clone(),
                        up: true,
                        last_scrape: scraped_at,
                        last_error: None,
                        samples_appended: appended,
                        lines_skipped: outcome.skipped_lines as u64,
                    }
                }
            }
            Err(e) => {
                warn!("Scrape of {} failed: {}", target.address, e);
                self.record_up(target, false, scrape_ms);
                TargetStatus {
                    address: target.address.clone(),
                    up: false,
                    last_scrape: scraped_at,
                    last_error: Some(e.to_string()),
                    samples_appended: 0,
                    lines_skipped: 0,
                }
            }
        };

        self.statuses.insert(target.address.clone(), status);
    }

    /// Record the per-target `up` series for this tick.
    fn record_up(&self, target: &ScrapeTarget, up: bool, scrape_ms: i64) {
        let key = SeriesKey::new(
            "up",
            Labels::empty().with("instance", target.address.clone()),
        );
        self.store
            .append(key, Sample::new(scrape_ms, if up { 1.0 } else { 0.0 }));
    }
}
