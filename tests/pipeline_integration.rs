//! Pipeline Integration Tests
//!
//! End-to-end behavior across component boundaries:
//! - Emitter snapshot through the collector parse-and-store path
//! - Scrape isolation between healthy and failing targets
//! - Shipper flush thresholds and bounded retry
//! - Store deduplication under redelivery

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Poll until `check` passes or the deadline expires.
async fn wait_for<F: Fn() -> bool>(check: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

// =============================================================================
// Metrics Path: Emitter Snapshot Through Collector
// =============================================================================

mod metrics_path {
    use super::*;
    use async_trait::async_trait;
    use obsflow::collector::{ScrapeConfig, Scraper, SeriesStore};
    use obsflow::domain::model::{Labels, ScrapeTarget};
    use obsflow::domain::ports::ScrapeFetcher;
    use obsflow::emitter::{exposition, MetricRegistry};
    use obsflow::error::{Error, Result};

    /// Fetcher serving a registry snapshot for one address.
    struct SnapshotFetcher {
        address: String,
        payload: String,
    }

    #[async_trait]
    impl ScrapeFetcher for SnapshotFetcher {
        async fn fetch(&self, target: &ScrapeTarget) -> Result<String> {
            if target.address == self.address {
                Ok(self.payload.clone())
            } else {
                Err(Error::ScrapeStatus {
                    target: target.address.clone(),
                    status: 503,
                })
            }
        }
    }

    #[tokio::test]
    async fn test_emitter_snapshot_survives_collection() {
        let registry = MetricRegistry::new();
        let requests = registry.register_counter("requests_total").unwrap();
        requests
            .with_labels(Labels::empty().with("method", "GET"))
            .add(7);
        registry
            .register_gauge("queue_depth")
            .unwrap()
            .default_child()
            .set(3);

        let payload = exposition::render(&registry);

        let store = Arc::new(SeriesStore::new());
        let fetcher = Arc::new(SnapshotFetcher {
            address: "app-1:8080".to_string(),
            payload,
        });
        let config = ScrapeConfig {
            targets: vec![ScrapeTarget::new("app-1:8080")],
            ..ScrapeConfig::default()
        };
        let scraper = Scraper::with_fetcher(config, store.clone(), fetcher);

        scraper.tick().await;

        let counters = store.range_query(
            "requests_total",
            &Labels::empty().with("method", "GET"),
            0,
            i64::MAX,
        );
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].1[0].value, 7.0);
        // The collector attributes every sample to its target
        assert_eq!(counters[0].0.labels.get("instance"), Some("app-1:8080"));

        let gauges = store.range_query("queue_depth", &Labels::empty(), 0, i64::MAX);
        assert_eq!(gauges[0].1[0].value, 3.0);
    }

    #[tokio::test]
    async fn test_down_target_recorded_without_blocking_healthy() {
        let registry = MetricRegistry::new();
        registry
            .register_counter("requests_total")
            .unwrap()
            .default_child()
            .inc();

        let store = Arc::new(SeriesStore::new());
        let fetcher = Arc::new(SnapshotFetcher {
            address: "app-1:8080".to_string(),
            payload: exposition::render(&registry),
        });
        let config = ScrapeConfig {
            targets: vec![
                ScrapeTarget::new("app-1:8080"),
                ScrapeTarget::new("app-2:8080"),
            ],
            ..ScrapeConfig::default()
        };
        let scraper = Scraper::with_fetcher(config, store.clone(), fetcher);

        scraper.tick().await;

        let statuses = scraper.statuses();
        assert!(statuses.iter().any(|s| s.address == "app-1:8080" && s.up));
        assert!(statuses.iter().any(|s| s.address == "app-2:8080" && !s.up));

        // The healthy target's samples landed despite the failure
        let ok = store.range_query("requests_total", &Labels::empty(), 0, i64::MAX);
        assert_eq!(ok.len(), 1);
    }

    #[test]
    fn test_metric_kind_conflict_is_descriptive() {
        let registry = MetricRegistry::new();
        registry.register_counter("latency").unwrap();

        // Same kind again is a no-op returning the existing family
        assert!(registry.register_counter("latency").is_ok());

        let err = registry.register_histogram("latency").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("latency"));
        assert!(message.contains("counter"));
        assert!(message.contains("histogram"));
    }
}

// =============================================================================
// Shipper Flush Thresholds
// =============================================================================

mod shipper_flush {
    use super::*;
    use obsflow::shipper::{InMemoryBatchSink, Shipper, ShipperConfig};

    #[tokio::test]
    async fn test_size_threshold_flushes_at_exactly_one_hundred() {
        let sink = Arc::new(InMemoryBatchSink::new());
        let shipper = Shipper::new(
            ShipperConfig {
                source_id: "app".to_string(),
                batch_size: 100,
                flush_interval: Duration::from_secs(60),
                ..ShipperConfig::default()
            },
            sink.clone(),
        );

        let (client, server) = tokio::io::duplex(64 * 1024);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(shipper.clone().run(BufReader::new(server), cancel.clone()));

        let mut writer = client;
        for i in 0..99 {
            writer
                .write_all(format!("record {}\n", i).as_bytes())
                .await
                .unwrap();
        }
        writer.flush().await.unwrap();

        // 99 records stay buffered: below the size threshold, timer not due
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sink.is_empty());

        writer.write_all(b"record 99\n").await.unwrap();
        writer.flush().await.unwrap();

        assert!(wait_for(|| sink.len() == 1, Duration::from_secs(2)).await);
        assert_eq!(sink.record_count(), 100);
        assert_eq!(sink.batches()[0].records[99].offset, 99);

        cancel.cancel();
        drop(writer);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_time_threshold_flushes_partial_batch() {
        let sink = Arc::new(InMemoryBatchSink::new());
        let shipper = Shipper::new(
            ShipperConfig {
                source_id: "app".to_string(),
                batch_size: 100,
                flush_interval: Duration::from_millis(150),
                ..ShipperConfig::default()
            },
            sink.clone(),
        );

        let (client, server) = tokio::io::duplex(4096);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(shipper.clone().run(BufReader::new(server), cancel.clone()));

        let mut writer = client;
        writer.write_all(b"lonely record\n").await.unwrap();
        writer.flush().await.unwrap();

        // One record is far below the size threshold; the timer ships it
        assert!(wait_for(|| sink.len() == 1, Duration::from_secs(2)).await);
        assert_eq!(sink.record_count(), 1);

        cancel.cancel();
        drop(writer);
        handle.await.unwrap().unwrap();

        let stats = shipper.stats();
        assert_eq!(stats.batches_flushed, 1);
        assert_eq!(stats.records_flushed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_partial_batch() {
        let sink = Arc::new(InMemoryBatchSink::new());
        let shipper = Shipper::new(
            ShipperConfig {
                source_id: "app".to_string(),
                batch_size: 100,
                flush_interval: Duration::from_secs(60),
                ..ShipperConfig::default()
            },
            sink.clone(),
        );

        let (client, server) = tokio::io::duplex(4096);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(shipper.clone().run(BufReader::new(server), cancel.clone()));

        let mut writer = client;
        writer.write_all(b"first\nsecond\n").await.unwrap();
        writer.flush().await.unwrap();

        // Let the tail loop drain the reader; both thresholds are far off
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sink.is_empty());

        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.record_count(), 2);
        assert_eq!(shipper.stats().records_flushed, 2);
    }
}

// =============================================================================
// Server Shutdown
// =============================================================================

mod server_shutdown {
    use super::*;
    use obsflow::collector::{run_collector_server, ScrapeConfig, Scraper, SeriesStore};
    use obsflow::emitter::{run_emitter_server, MetricRegistry};
    use obsflow::store::{run_store_server, LogStore};

    #[tokio::test]
    async fn test_emitter_server_exits_on_cancel() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_emitter_server(
            "127.0.0.1:0",
            Arc::new(MetricRegistry::new()),
            cancel.clone(),
        ));

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap();
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_collector_server_exits_on_cancel() {
        let store = Arc::new(SeriesStore::new());
        let scraper = Scraper::new(ScrapeConfig::default(), store.clone()).unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_collector_server(
            "127.0.0.1:0",
            store,
            scraper,
            cancel.clone(),
        ));

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap();
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_store_server_exits_on_cancel() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_store_server(
            "127.0.0.1:0",
            LogStore::new(),
            cancel.clone(),
        ));

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap();
        assert!(result.unwrap().is_ok());
    }
}

// =============================================================================
// Logs Path: Redelivery and Search
// =============================================================================

mod logs_path {
    use super::*;
    use obsflow::shipper::{InMemoryBatchSink, Shipper, ShipperConfig};
    use obsflow::store::{LogQuery, LogStore};

    #[tokio::test]
    async fn test_redelivered_batches_store_one_copy_per_record() {
        let sink = Arc::new(InMemoryBatchSink::new());
        let shipper = Shipper::new(
            ShipperConfig {
                source_id: "web".to_string(),
                batch_size: 2,
                ..ShipperConfig::default()
            },
            sink.clone(),
        );

        let input: &[u8] = b"GET /a 200\nGET /b 500\nGET /c 200\n";
        shipper
            .run(input, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sink.record_count(), 3);

        let store = LogStore::new();
        for batch in sink.batches() {
            let first = store.ingest(&batch);
            assert_eq!(first.duplicates, 0);

            // At-least-once delivery: the same batch arrives again
            let second = store.ingest(&batch);
            assert_eq!(second.accepted, 0);
            assert_eq!(second.duplicates, batch.records.len() as u64);
        }

        assert_eq!(store.len(), 3);
        assert_eq!(store.stats().duplicates_skipped, 3);
    }

    #[tokio::test]
    async fn test_shipped_json_records_searchable_by_field() {
        let sink = Arc::new(InMemoryBatchSink::new());
        let shipper = Shipper::new(
            ShipperConfig {
                source_id: "api".to_string(),
                ..ShipperConfig::default()
            },
            sink.clone(),
        );

        let input: &[u8] = concat!(
            "{\"level\":\"error\",\"msg\":\"upstream timeout\"}\n",
            "{\"level\":\"info\",\"msg\":\"request served\"}\n",
            "plain text fallback line\n",
        )
        .as_bytes();
        shipper
            .run(input, CancellationToken::new())
            .await
            .unwrap();

        let store = LogStore::new();
        for batch in sink.batches() {
            store.ingest(&batch);
        }
        assert_eq!(store.len(), 3);

        let errors = store.search(&LogQuery::default().with_field("level", "error"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].record.message, "upstream timeout");

        let text = store.search(&LogQuery::tokens("fallback"));
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].record.fields.len(), 0);

        let both = store.search(&LogQuery::tokens("timeout").with_field("level", "info"));
        assert!(both.is_empty());
    }
}

// =============================================================================
// Shipper Retry Bounds
// =============================================================================

mod shipper_retry {
    use super::*;
    use async_trait::async_trait;
    use obsflow::domain::model::LogBatch;
    use obsflow::domain::ports::BatchSink;
    use obsflow::error::{Error, Result};
    use obsflow::shipper::{Shipper, ShipperConfig};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct RejectingSink {
        attempts: AtomicU64,
    }

    #[async_trait]
    impl BatchSink for RejectingSink {
        async fn send(&self, _batch: &LogBatch) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::ShipRejected { status: 503 })
        }
    }

    #[tokio::test]
    async fn test_delivery_failure_drops_after_bounded_attempts() {
        let sink = Arc::new(RejectingSink {
            attempts: AtomicU64::new(0),
        });
        let shipper = Shipper::new(
            ShipperConfig {
                source_id: "app".to_string(),
                batch_size: 1,
                max_retries: 2,
                initial_backoff: Duration::from_millis(5),
                ..ShipperConfig::default()
            },
            sink.clone(),
        );

        let input: &[u8] = b"doomed record\n";
        shipper
            .clone()
            .run(input, CancellationToken::new())
            .await
            .unwrap();

        // Initial attempt plus two retries, then the batch is dropped
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);

        let stats = shipper.stats();
        assert_eq!(stats.batches_flushed, 0);
        assert_eq!(stats.batches_dropped, 1);
        assert_eq!(stats.records_dropped, 1);
    }
}
