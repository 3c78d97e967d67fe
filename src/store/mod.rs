//! Deduplicating Log Store
//!
//! Accepts shipped record batches, deduplicates by record identity so
//! at-least-once delivery converges to exactly one stored copy, and
//! serves token and field searches over the retained records.

pub mod index;
pub mod ingest;
pub mod server;

pub use index::{LogQuery, SearchIndex};
pub use ingest::{IngestSummary, LogStore, StoreStats, StoredRecord};
pub use server::run_store_server;
