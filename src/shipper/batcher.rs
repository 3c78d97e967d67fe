//! Tail-and-Flush Loop
//!
//! Reads newline-delimited records from a source stream into batches.
//! A batch flushes when it reaches `batch_size` records or when
//! `flush_interval` has elapsed since it was opened, whichever first;
//! the time check is a select arm, not a poll loop. Partial batches
//! flush on end-of-stream and on shutdown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::model::{LogBatch, LogRecord};
use crate::domain::ports::BatchSink;
use crate::error::Result;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the shipper.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Source identifier attached to every record.
    pub source_id: String,

    /// Flush when this many records are buffered.
    pub batch_size: usize,

    /// Flush when a batch has been open this long.
    pub flush_interval: Duration,

    /// Delivery retries before a batch is dropped.
    pub max_retries: u32,

    /// First retry backoff; doubles per attempt.
    pub initial_backoff: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            source_id: "app".to_string(),
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Local delivery counters.
#[derive(Debug, Default)]
pub struct ShipperStats {
    batches_flushed: AtomicU64,
    records_flushed: AtomicU64,
    batches_dropped: AtomicU64,
    records_dropped: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShipperStatsSnapshot {
    pub batches_flushed: u64,
    pub records_flushed: u64,
    pub batches_dropped: u64,
    pub records_dropped: u64,
}

impl ShipperStats {
    pub fn snapshot(&self) -> ShipperStatsSnapshot {
        ShipperStatsSnapshot {
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Shipper
// =============================================================================

/// Tails a source stream and ships record batches to a sink.
pub struct Shipper {
    config: ShipperConfig,
    sink: Arc<dyn BatchSink>,
    stats: Arc<ShipperStats>,
}

impl Shipper {
    pub fn new(config: ShipperConfig, sink: Arc<dyn BatchSink>) -> Arc<Self> {
        Arc::new(Self {
            config,
            sink,
            stats: Arc::new(ShipperStats::default()),
        })
    }

    /// Delivery counters.
    pub fn stats(&self) -> ShipperStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run the tail-and-flush loop until end-of-stream or cancellation.
    ///
    /// The reader runs in its own task feeding a bounded channel, so a
    /// flush in progress never cancels a partially-read line.
    pub async fn run<R>(self: Arc<Self>, reader: R, cancel: CancellationToken) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<String>(1024);

        let read_task = tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        warn!("Source stream read error: {}", e);
                        return;
                    }
                }
            }
        });

        let mut buf: Vec<LogRecord> = Vec::with_capacity(self.config.batch_size);
        let mut offset: u64 = 0;
        // Only armed while the batch is non-empty
        let mut deadline = Instant::now() + self.config.flush_interval;

        info!(
            "Shipper starting: source={} batch_size={} flush_interval={:?}",
            self.config.source_id, self.config.batch_size, self.config.flush_interval
        );

        loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => {
                        if buf.is_empty() {
                            deadline = Instant::now() + self.config.flush_interval;
                        }
                        buf.push(self.parse_line(&line, offset));
                        offset += 1;
                        if buf.len() >= self.config.batch_size {
                            self.flush(&mut buf).await;
                        }
                    }
                    None => {
                        // End of stream: flush what remains
                        if !buf.is_empty() {
                            self.flush(&mut buf).await;
                        }
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    debug!("Flush interval elapsed with {} buffered records", buf.len());
                    self.flush(&mut buf).await;
                }
                _ = cancel.cancelled() => {
                    if !buf.is_empty() {
                        self.flush(&mut buf).await;
                    }
                    break;
                }
            }
        }

        read_task.abort();
        info!("Shipper stopped after {} records", offset);
        Ok(())
    }

    /// Turn one source line into a record.
    ///
    /// JSON-object lines contribute structured fields; a `message` or
    /// `msg` key becomes the free-text message and a `timestamp` key in
    /// RFC 3339 overrides the arrival time. Anything else is plain text.
    fn parse_line(&self, line: &str, offset: u64) -> LogRecord {
        let mut timestamp = Utc::now();
        let mut fields = BTreeMap::new();
        let mut message = String::new();

        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(serde_json::Value::Object(map)) => {
                for (key, value) in map {
                    match key.as_str() {
                        "message" | "msg" => {
                            message = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                        }
                        "timestamp" | "ts" => {
                            if let Some(parsed) = value
                                .as_str()
                                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                            {
                                timestamp = parsed.with_timezone(&Utc);
                            } else {
                                fields.insert(key, value.to_string());
                            }
                        }
                        _ => {
                            let rendered = match value {
                                serde_json::Value::String(s) => s,
                                other => other.to_string(),
                            };
                            fields.insert(key, rendered);
                        }
                    }
                }
            }
            _ => message = line.to_string(),
        }

        LogRecord {
            timestamp,
            source: self.config.source_id.clone(),
            offset,
            fields,
            message,
        }
    }

    /// Ship the buffered records, retrying with backoff; drop on
    /// exhaustion so the tail loop never blocks indefinitely.
    #[instrument(skip(self, buf), fields(records = buf.len()))]
    async fn flush(&self, buf: &mut Vec<LogRecord>) {
        let records = std::mem::take(buf);
        let count = records.len() as u64;
        let batch = LogBatch::new(self.config.source_id.clone(), records);

        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0u32;

        loop {
            match self.sink.send(&batch).await {
                Ok(()) => {
                    self.stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .records_flushed
                        .fetch_add(count, Ordering::Relaxed);
                    return;
                }
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "Batch {} delivery failed (attempt {}/{}): {}",
                        batch.batch_id, attempt, self.config.max_retries, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    warn!(
                        "Dropping batch {} after {} attempts: {}",
                        batch.batch_id,
                        attempt + 1,
                        e
                    );
                    self.stats.batches_dropped.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .records_dropped
                        .fetch_add(count, Ordering::Relaxed);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shipper::sink::InMemoryBatchSink;

    fn shipper_with(sink: Arc<dyn BatchSink>, config: ShipperConfig) -> Arc<Shipper> {
        Shipper::new(config, sink)
    }

    #[tokio::test]
    async fn test_parse_plain_line() {
        let sink = Arc::new(InMemoryBatchSink::new());
        let shipper = shipper_with(sink, ShipperConfig::default());

        let record = shipper.parse_line("plain text line", 3);
        assert_eq!(record.message, "plain text line");
        assert_eq!(record.offset, 3);
        assert_eq!(record.source, "app");
        assert!(record.fields.is_empty());
    }

    #[tokio::test]
    async fn test_parse_json_line() {
        let sink = Arc::new(InMemoryBatchSink::new());
        let shipper = shipper_with(sink, ShipperConfig::default());

        let record = shipper.parse_line(
            r#"{"level":"error","msg":"boom","code":500,"timestamp":"2024-01-02T03:04:05Z"}"#,
            0,
        );
        assert_eq!(record.message, "boom");
        assert_eq!(record.fields.get("level"), Some(&"error".to_string()));
        assert_eq!(record.fields.get("code"), Some(&"500".to_string()));
        assert_eq!(record.timestamp.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[tokio::test]
    async fn test_eof_flushes_partial_batch() {
        let sink = Arc::new(InMemoryBatchSink::new());
        let shipper = shipper_with(
            sink.clone(),
            ShipperConfig {
                batch_size: 100,
                ..ShipperConfig::default()
            },
        );

        let input: &[u8] = b"one\ntwo\nthree\n";
        shipper
            .run(input, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.record_count(), 3);
        let batch = &sink.batches()[0];
        assert_eq!(batch.records[0].offset, 0);
        assert_eq!(batch.records[2].offset, 2);
    }

    #[tokio::test]
    async fn test_size_threshold_splits_batches() {
        let sink = Arc::new(InMemoryBatchSink::new());
        let shipper = shipper_with(
            sink.clone(),
            ShipperConfig {
                batch_size: 2,
                ..ShipperConfig::default()
            },
        );

        let input: &[u8] = b"a\nb\nc\nd\ne\n";
        shipper
            .clone()
            .run(input, CancellationToken::new())
            .await
            .unwrap();

        // Two full batches plus the EOF flush of the remainder
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.record_count(), 5);

        let stats = shipper.stats();
        assert_eq!(stats.batches_flushed, 3);
        assert_eq!(stats.records_flushed, 5);
        assert_eq!(stats.batches_dropped, 0);
    }

    struct AlwaysFailingSink;

    #[async_trait::async_trait]
    impl BatchSink for AlwaysFailingSink {
        async fn send(&self, _batch: &LogBatch) -> Result<()> {
            Err(crate::error::Error::ShipRejected { status: 503 })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retries_then_drop() {
        let shipper = shipper_with(
            Arc::new(AlwaysFailingSink),
            ShipperConfig {
                batch_size: 1,
                max_retries: 2,
                initial_backoff: Duration::from_millis(10),
                ..ShipperConfig::default()
            },
        );

        let input: &[u8] = b"only line\n";
        shipper
            .clone()
            .run(input, CancellationToken::new())
            .await
            .unwrap();

        let stats = shipper.stats();
        assert_eq!(stats.batches_flushed, 0);
        assert_eq!(stats.batches_dropped, 1);
        assert_eq!(stats.records_dropped, 1);
    }

    /// Sink that fails a fixed number of times, then succeeds.
    struct FlakySink {
        failures_left: AtomicU64,
        inner: InMemoryBatchSink,
    }

    #[async_trait::async_trait]
    impl BatchSink for FlakySink {
        async fn send(&self, batch: &LogBatch) -> Result<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(crate::error::Error::ShipRejected { status: 503 });
            }
            self.inner.send(batch).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_eventually_delivers() {
        let sink = Arc::new(FlakySink {
            failures_left: AtomicU64::new(2),
            inner: InMemoryBatchSink::new(),
        });
        let shipper = shipper_with(
            sink.clone(),
            ShipperConfig {
                batch_size: 1,
                max_retries: 3,
                initial_backoff: Duration::from_millis(10),
                ..ShipperConfig::default()
            },
        );

        let input: &[u8] = b"persistent line\n";
        shipper
            .clone()
            .run(input, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.inner.len(), 1);
        assert_eq!(shipper.stats().batches_flushed, 1);
    }
}
