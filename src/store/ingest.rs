//! Batch Ingestion
//!
//! Validates and deduplicates incoming records. Each accepted record is
//! assigned a dense sequence number; the seen-set maps record identity
//! to that sequence so a redelivered record is recognized in O(1) and
//! silently skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::model::{LogBatch, LogRecord, RecordId};
use crate::store::index::SearchIndex;

/// A record as retained by the store, tagged with its sequence number.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub seq: u64,
    pub record: LogRecord,
}

/// Per-batch ingestion outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub accepted: u64,
    pub duplicates: u64,
    pub rejected: u64,
}

/// Cumulative store counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoreStats {
    pub records_stored: u64,
    pub batches_ingested: u64,
    pub duplicates_skipped: u64,
    pub records_rejected: u64,
}

/// Append-only deduplicating record store.
pub struct LogStore {
    next_seq: AtomicU64,
    seen: DashMap<RecordId, u64>,
    records: RwLock<Vec<StoredRecord>>,
    index: SearchIndex,
    batches_ingested: AtomicU64,
    duplicates_skipped: AtomicU64,
    records_rejected: AtomicU64,
}

impl LogStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_seq: AtomicU64::new(0),
            seen: DashMap::new(),
            records: RwLock::new(Vec::new()),
            index: SearchIndex::new(),
            batches_ingested: AtomicU64::new(0),
            duplicates_skipped: AtomicU64::new(0),
            records_rejected: AtomicU64::new(0),
        })
    }

    /// Ingest one batch: validate, deduplicate, store, index.
    ///
    /// Redelivered records are skipped silently so retries converge to
    /// exactly one stored copy. Malformed records are counted and
    /// dropped without failing the batch.
    pub fn ingest(&self, batch: &LogBatch) -> IngestSummary {
        let mut summary = IngestSummary::default();

        for record in &batch.records {
            if let Err(reason) = record.validate() {
                warn!("Rejecting record {}: {}", record.id(), reason);
                summary.rejected += 1;
                continue;
            }

            let id = record.id();
            if self.seen.contains_key(&id) {
                summary.duplicates += 1;
                continue;
            }

            // Hold the write lock across seen-set insert and append so
            // concurrent redelivery of the same record cannot double-store
            let mut records = self.records.write();
            if self.seen.insert(id, records.len() as u64).is_some() {
                summary.duplicates += 1;
                continue;
            }
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            self.index.add(seq, record);
            records.push(StoredRecord {
                seq,
                record: record.clone(),
            });
            summary.accepted += 1;
        }

        self.batches_ingested.fetch_add(1, Ordering::Relaxed);
        self.duplicates_skipped
            .fetch_add(summary.duplicates, Ordering::Relaxed);
        self.records_rejected
            .fetch_add(summary.rejected, Ordering::Relaxed);

        debug!(
            "Ingested batch {}: {} accepted, {} duplicates, {} rejected",
            batch.batch_id, summary.accepted, summary.duplicates, summary.rejected
        );
        summary
    }

    /// Look up stored records by sequence number, preserving input order.
    pub fn records_by_seq(&self, seqs: &[u64]) -> Vec<StoredRecord> {
        let records = self.records.read();
        seqs.iter()
            .filter_map(|&seq| records.get(seq as usize).cloned())
            .collect()
    }

    /// Search the index and resolve hits to records, oldest first.
    pub fn search(&self, query: &crate::store::index::LogQuery) -> Vec<StoredRecord> {
        let seqs = self.index.search(query, &self.records.read());
        self.records_by_seq(&seqs)
    }

    /// Number of records retained.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            records_stored: self.records.read().len() as u64,
            batches_ingested: self.batches_ingested.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
        }
    }
}
