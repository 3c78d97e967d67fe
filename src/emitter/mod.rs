//! Metrics Emitter
//!
//! In-process metric registry with a pull-based text exposition endpoint.
//! Applications register counter/gauge/histogram families by name and the
//! HTTP server serves the current snapshot on `GET /metrics`, instrumenting
//! every handled request with built-in request-count and latency series.

pub mod exposition;
pub mod registry;
pub mod server;

pub use registry::{
    Counter, CounterFamily, Gauge, GaugeFamily, Histogram, HistogramFamily, MetricRegistry,
};
pub use server::{register_builtin, run_emitter_server};
