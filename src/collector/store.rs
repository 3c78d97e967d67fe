//! Series Store
//!
//! In-memory append-only storage for collected samples. One entry per
//! series key; appends enforce non-decreasing timestamps per series and
//! range queries return samples in time order.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::domain::model::{Labels, Sample, SeriesKey};

/// Append and rejection counters for the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub samples_appended: u64,
    pub samples_rejected: u64,
    pub series_count: usize,
}

/// In-memory time-series storage.
///
/// Each series is owned by exactly one store; appends to one series come
/// from a single scrape loop, so per-series ordering is enforced, not
/// reconstructed.
#[derive(Default)]
pub struct SeriesStore {
    series: DashMap<SeriesKey, Vec<Sample>>,
    appended: AtomicU64,
    rejected: AtomicU64,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one sample to a series.
    ///
    /// Returns `false` (and counts a rejection) when the sample's
    /// timestamp precedes the series tail; equal timestamps are accepted.
    pub fn append(&self, key: SeriesKey, sample: Sample) -> bool {
        let mut entry = self.series.entry(key).or_default();
        if let Some(last) = entry.last() {
            if sample.timestamp_ms < last.timestamp_ms {
                debug!(
                    "Rejecting out-of-order sample: {} < {}",
                    sample.timestamp_ms, last.timestamp_ms
                );
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }
        entry.push(sample);
        self.appended.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Range query: all series with the given name whose labels satisfy
    /// the matchers, restricted to `[start_ms, end_ms]` inclusive.
    ///
    /// Results are sorted by series key; samples are in time order.
    pub fn range_query(
        &self,
        name: &str,
        matchers: &Labels,
        start_ms: i64,
        end_ms: i64,
    ) -> Vec<(SeriesKey, Vec<Sample>)> {
        let mut results: Vec<(SeriesKey, Vec<Sample>)> = self
            .series
            .iter()
            .filter(|entry| entry.key().name == name && entry.key().labels.matches(matchers))
            .map(|entry| {
                let samples = entry.value();
                let from = samples.partition_point(|s| s.timestamp_ms < start_ms);
                let to = samples.partition_point(|s| s.timestamp_ms <= end_ms);
                (entry.key().clone(), samples[from..to].to_vec())
            })
            .filter(|(_, samples)| !samples.is_empty())
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Latest sample of a series, if any.
    pub fn latest(&self, key: &SeriesKey) -> Option<Sample> {
        self.series.get(key).and_then(|s| s.last().copied())
    }

    /// Distinct metric names currently stored, sorted.
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .series
            .iter()
            .map(|entry| entry.key().name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            samples_appended: self.appended.load(Ordering::Relaxed),
            samples_rejected: self.rejected.load(Ordering::Relaxed),
            series_count: self.series.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> SeriesKey {
        SeriesKey::new(name, Labels::empty())
    }

    #[test]
    fn test_append_preserves_time_order() {
        let store = SeriesStore::new();
        let k = key("cpu");

        assert!(store.append(k.clone(), Sample::new(100, 1.0)));
        assert!(store.append(k.clone(), Sample::new(200, 2.0)));
        assert!(store.append(k.clone(), Sample::new(200, 2.5))); // equal allowed
        assert!(!store.append(k.clone(), Sample::new(150, 9.0))); // regression rejected

        let results = store.range_query("cpu", &Labels::empty(), 0, 1000);
        assert_eq!(results.len(), 1);
        let samples = &results[0].1;
        assert_eq!(samples.len(), 3);
        assert!(samples.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));

        let stats = store.stats();
        assert_eq!(stats.samples_appended, 3);
        assert_eq!(stats.samples_rejected, 1);
    }

    #[test]
    fn test_rejection_is_per_sample() {
        let store = SeriesStore::new();
        let k = key("cpu");

        store.append(k.clone(), Sample::new(200, 1.0));
        assert!(!store.append(k.clone(), Sample::new(100, 2.0)));
        // A later in-order sample still lands
        assert!(store.append(k.clone(), Sample::new(300, 3.0)));
    }

    #[test]
    fn test_range_query_window_is_inclusive() {
        let store = SeriesStore::new();
        let k = key("mem");
        for ts in [100, 200, 300, 400] {
            store.append(k.clone(), Sample::new(ts, ts as f64));
        }

        let results = store.range_query("mem", &Labels::empty(), 200, 300);
        assert_eq!(results[0].1.len(), 2);
        assert_eq!(results[0].1[0].timestamp_ms, 200);
        assert_eq!(results[0].1[1].timestamp_ms, 300);
    }

    #[test]
    fn test_range_query_label_matchers() {
        let store = SeriesStore::new();
        let web = SeriesKey::new("up", Labels::empty().with("instance", "web-1"));
        let db = SeriesKey::new("up", Labels::empty().with("instance", "db-1"));
        store.append(web.clone(), Sample::new(100, 1.0));
        store.append(db.clone(), Sample::new(100, 0.0));

        let all = store.range_query("up", &Labels::empty(), 0, 1000);
        assert_eq!(all.len(), 2);

        let only_web =
            store.range_query("up", &Labels::empty().with("instance", "web-1"), 0, 1000);
        assert_eq!(only_web.len(), 1);
        assert_eq!(only_web[0].0, web);
    }

    #[test]
    fn test_empty_window_yields_no_series() {
        let store = SeriesStore::new();
        store.append(key("x"), Sample::new(100, 1.0));

        let results = store.range_query("x", &Labels::empty(), 500, 600);
        assert!(results.is_empty());
    }

    #[test]
    fn test_metric_names() {
        let store = SeriesStore::new();
        store.append(key("b"), Sample::new(1, 0.0));
        store.append(key("a"), Sample::new(1, 0.0));
        store.append(
            SeriesKey::new("a", Labels::empty().with("x", "1")),
            Sample::new(1, 0.0),
        );

        assert_eq!(store.metric_names(), vec!["a".to_string(), "b".to_string()]);
    }
}
