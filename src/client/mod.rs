//! Query Clients
//!
//! Stateless read-only clients: the dashboard renderer fetches a metric
//! window from the collector and formats a text panel; the log viewer
//! fetches a search window from the store and formats record lines.

pub mod dashboard;
pub mod logview;

pub use dashboard::DashboardClient;
pub use logview::LogViewClient;
