//! Log Shipper
//!
//! Tails newline-delimited records from a source stream, batches them,
//! and forwards batches to a sink. A batch flushes at whichever of the
//! size or time threshold fires first; delivery failures are retried
//! with backoff a bounded number of times and then dropped with a local
//! failure counter, so the source stream is never blocked indefinitely.

pub mod batcher;
pub mod sink;

pub use batcher::{Shipper, ShipperConfig, ShipperStats, ShipperStatsSnapshot};
pub use sink::{HttpBatchSink, InMemoryBatchSink};
