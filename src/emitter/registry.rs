//! Metric Registry
//!
//! Lock-free counters, gauges, and histograms grouped into named families
//! with labeled children. Registration is idempotent by name: asking for an
//! existing family of the same kind returns it, asking for the same name
//! with a different kind is an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::domain::model::{Labels, MetricKind};
use crate::error::{Error, Result};

// =============================================================================
// Primitives
// =============================================================================

/// Counter metric: monotonically increasing.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by n
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric: settable value.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set value
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by 1
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Histogram bucket snapshot.
#[derive(Debug, Clone)]
pub struct HistogramBucket {
    /// Upper bound (inclusive)
    pub le: f64,
    /// Cumulative count of observations at or below `le`
    pub count: u64,
}

/// Histogram metric with cumulative buckets.
#[derive(Debug)]
pub struct Histogram {
    /// Bucket boundaries, sorted ascending
    boundaries: Vec<f64>,
    /// Per-boundary cumulative counts
    buckets: Vec<AtomicU64>,
    /// Sum of all observations, scaled by 1M for atomic storage
    sum: AtomicU64,
    /// Count of observations
    count: AtomicU64,
}

impl Histogram {
    /// Create a histogram with default buckets.
    pub fn new() -> Self {
        Self::with_buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ])
    }

    /// Create with custom bucket boundaries.
    pub fn with_buckets(mut boundaries: Vec<f64>) -> Self {
        boundaries.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let buckets: Vec<AtomicU64> = boundaries.iter().map(|_| AtomicU64::new(0)).collect();

        Self {
            boundaries,
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Buckets tuned for request latency in seconds.
    pub fn latency() -> Self {
        Self::with_buckets(vec![
            0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
        ])
    }

    /// Observe a value.
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum
            .fetch_add((value * 1_000_000.0) as u64, Ordering::Relaxed);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            if value <= boundary {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Observe a duration in seconds.
    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of observations (descaled).
    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Snapshot of cumulative buckets.
    pub fn buckets(&self) -> Vec<HistogramBucket> {
        self.boundaries
            .iter()
            .zip(self.buckets.iter())
            .map(|(&le, count)| HistogramBucket {
                le,
                count: count.load(Ordering::Relaxed),
            })
            .collect()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Families
// =============================================================================

/// A named group of counters sharing a name, one child per label set.
#[derive(Debug)]
pub struct CounterFamily {
    name: String,
    children: RwLock<HashMap<Labels, Arc<Counter>>>,
}

impl CounterFamily {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            children: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get or create the child for a label set.
    pub fn with_labels(&self, labels: Labels) -> Arc<Counter> {
        if let Some(child) = self.children.read().get(&labels) {
            return child.clone();
        }
        self.children
            .write()
            .entry(labels)
            .or_insert_with(|| Arc::new(Counter::new()))
            .clone()
    }

    /// The unlabeled child.
    pub fn default_child(&self) -> Arc<Counter> {
        self.with_labels(Labels::empty())
    }

    /// Snapshot of (labels, value) pairs, sorted by label set.
    pub fn snapshot(&self) -> Vec<(Labels, u64)> {
        let mut out: Vec<(Labels, u64)> = self
            .children
            .read()
            .iter()
            .map(|(labels, child)| (labels.clone(), child.get()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// A named group of gauges, one child per label set.
#[derive(Debug)]
pub struct GaugeFamily {
    name: String,
    children: RwLock<HashMap<Labels, Arc<Gauge>>>,
}

impl GaugeFamily {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            children: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_labels(&self, labels: Labels) -> Arc<Gauge> {
        if let Some(child) = self.children.read().get(&labels) {
            return child.clone();
        }
        self.children
            .write()
            .entry(labels)
            .or_insert_with(|| Arc::new(Gauge::new()))
            .clone()
    }

    pub fn default_child(&self) -> Arc<Gauge> {
        self.with_labels(Labels::empty())
    }

    pub fn snapshot(&self) -> Vec<(Labels, u64)> {
        let mut out: Vec<(Labels, u64)> = self
            .children
            .read()
            .iter()
            .map(|(labels, child)| (labels.clone(), child.get()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Snapshot of one labeled histogram child.
pub struct HistogramSnapshot {
    pub labels: Labels,
    pub buckets: Vec<HistogramBucket>,
    pub sum: f64,
    pub count: u64,
}

/// A named group of histograms, one child per label set.
///
/// All children share the family's bucket boundaries.
#[derive(Debug)]
pub struct HistogramFamily {
    name: String,
    boundaries: Vec<f64>,
    children: RwLock<HashMap<Labels, Arc<Histogram>>>,
}

impl HistogramFamily {
    fn new(name: &str, boundaries: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            boundaries,
            children: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_labels(&self, labels: Labels) -> Arc<Histogram> {
        if let Some(child) = self.children.read().get(&labels) {
            return child.clone();
        }
        self.children
            .write()
            .entry(labels)
            .or_insert_with(|| Arc::new(Histogram::with_buckets(self.boundaries.clone())))
            .clone()
    }

    pub fn default_child(&self) -> Arc<Histogram> {
        self.with_labels(Labels::empty())
    }

    pub fn snapshot(&self) -> Vec<HistogramSnapshot> {
        let mut out: Vec<HistogramSnapshot> = self
            .children
            .read()
            .iter()
            .map(|(labels, child)| HistogramSnapshot {
                labels: labels.clone(),
                buckets: child.buckets(),
                sum: child.sum(),
                count: child.count(),
            })
            .collect();
        out.sort_by(|a, b| a.labels.cmp(&b.labels));
        out
    }
}

/// A registered family of any kind.
#[derive(Clone)]
pub enum Family {
    Counter(Arc<CounterFamily>),
    Gauge(Arc<GaugeFamily>),
    Histogram(Arc<HistogramFamily>),
}

impl Family {
    pub fn kind(&self) -> MetricKind {
        match self {
            Family::Counter(_) => MetricKind::Counter,
            Family::Gauge(_) => MetricKind::Gauge,
            Family::Histogram(_) => MetricKind::Histogram,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registry of metric families, keyed by name.
#[derive(Default)]
pub struct MetricRegistry {
    families: RwLock<HashMap<String, Family>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or register a counter family.
    ///
    /// Returns the existing family when `name` is already registered as a
    /// counter; errors when it is registered as another kind.
    pub fn register_counter(&self, name: &str) -> Result<Arc<CounterFamily>> {
        if let Some(family) = self.families.read().get(name) {
            return match family {
                Family::Counter(f) => Ok(f.clone()),
                other => Err(Self::conflict(name, other.kind(), MetricKind::Counter)),
            };
        }

        let mut families = self.families.write();
        match families
            .entry(name.to_string())
            .or_insert_with(|| Family::Counter(Arc::new(CounterFamily::new(name))))
        {
            Family::Counter(f) => Ok(f.clone()),
            other => Err(Self::conflict(name, other.kind(), MetricKind::Counter)),
        }
    }

    /// Get or register a gauge family.
    pub fn register_gauge(&self, name: &str) -> Result<Arc<GaugeFamily>> {
        if let Some(family) = self.families.read().get(name) {
            return match family {
                Family::Gauge(f) => Ok(f.clone()),
                other => Err(Self::conflict(name, other.kind(), MetricKind::Gauge)),
            };
        }

        let mut families = self.families.write();
        match families
            .entry(name.to_string())
            .or_insert_with(|| Family::Gauge(Arc::new(GaugeFamily::new(name))))
        {
            Family::Gauge(f) => Ok(f.clone()),
            other => Err(Self::conflict(name, other.kind(), MetricKind::Gauge)),
        }
    }

    /// Get or register a histogram family with default buckets.
    pub fn register_histogram(&self, name: &str) -> Result<Arc<HistogramFamily>> {
        self.register_histogram_with_buckets(
            name,
            vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        )
    }

    /// Get or register a histogram family with explicit bucket boundaries.
    ///
    /// Boundaries only apply on first registration; a later call returns
    /// the existing family unchanged.
    pub fn register_histogram_with_buckets(
        &self,
        name: &str,
        mut boundaries: Vec<f64>,
    ) -> Result<Arc<HistogramFamily>> {
        if let Some(family) = self.families.read().get(name) {
            return match family {
                Family::Histogram(f) => Ok(f.clone()),
                other => Err(Self::conflict(name, other.kind(), MetricKind::Histogram)),
            };
        }

        boundaries.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mut families = self.families.write();
        match families
            .entry(name.to_string())
            .or_insert_with(|| Family::Histogram(Arc::new(HistogramFamily::new(name, boundaries))))
        {
            Family::Histogram(f) => Ok(f.clone()),
            other => Err(Self::conflict(name, other.kind(), MetricKind::Histogram)),
        }
    }

    /// All registered families, sorted by name.
    pub fn families(&self) -> Vec<(String, Family)> {
        let mut out: Vec<(String, Family)> = self
            .families
            .read()
            .iter()
            .map(|(name, family)| (name.clone(), family.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Number of registered families.
    pub fn len(&self) -> usize {
        self.families.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.read().is_empty()
    }

    fn conflict(name: &str, existing: MetricKind, requested: MetricKind) -> Error {
        Error::MetricKindConflict {
            name: name.to_string(),
            existing,
            requested,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
