//! ObsFlow Pipeline Binary
//!
//! One binary, one subcommand per pipeline role:
//!
//! ```text
//! obsflow emitter    — demo app serving the metrics pull endpoint
//! obsflow collector  — scrape loop, series store, query API
//! obsflow shipper    — tail stdin (or a file) and forward batches
//! obsflow store      — ingest, deduplicate, and search log records
//! obsflow dashboard  — render a metric window as a text panel
//! obsflow logs       — search and print stored records
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use obsflow::client::logview::SearchParams;
use obsflow::client::{DashboardClient, LogViewClient};
use obsflow::collector::{run_collector_server, ScrapeConfig, Scraper, SeriesStore};
use obsflow::domain::model::Labels;
use obsflow::emitter::{register_builtin, run_emitter_server, MetricRegistry};
use obsflow::error::{Error, Result};
use obsflow::shipper::{HttpBatchSink, Shipper, ShipperConfig};
use obsflow::store::{run_store_server, LogStore};

// =============================================================================
// CLI Arguments
// =============================================================================

/// ObsFlow - application metrics and log pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a metrics pull endpoint with built-in request metrics
    Emitter {
        /// Pull endpoint bind address
        #[arg(long, env = "EMITTER_ADDR", default_value = "0.0.0.0:8080")]
        listen: String,
    },

    /// Run the scrape loop and the range-query API
    Collector {
        /// Scrape configuration YAML file
        #[arg(long, env = "SCRAPE_CONFIG")]
        config: PathBuf,

        /// Query API bind address
        #[arg(long, env = "COLLECTOR_ADDR", default_value = "0.0.0.0:9090")]
        listen: String,
    },

    /// Tail a stream and forward record batches to the store
    Shipper {
        /// Source identifier attached to every record
        #[arg(long, env = "SOURCE_ID")]
        source_id: String,

        /// Log store base URL
        #[arg(long, env = "STORE_URL", default_value = "http://127.0.0.1:3100")]
        destination: String,

        /// Records per batch
        #[arg(long, env = "BATCH_SIZE", default_value = "100")]
        batch_size: usize,

        /// Seconds before a partial batch flushes
        #[arg(long, env = "FLUSH_INTERVAL_SECONDS", default_value = "5")]
        flush_interval_seconds: u64,

        /// Delivery retries before a batch is dropped
        #[arg(long, env = "MAX_RETRIES", default_value = "3")]
        max_retries: u32,

        /// Input file to tail instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Run the deduplicating log store and its search API
    Store {
        /// Ingest and search bind address
        #[arg(long, env = "STORE_ADDR", default_value = "0.0.0.0:3100")]
        listen: String,
    },

    /// Render a metric window as a text panel
    Dashboard {
        /// Collector base URL
        #[arg(long, env = "COLLECTOR_URL", default_value = "http://127.0.0.1:9090")]
        collector_url: String,

        /// Metric name to render
        #[arg(long)]
        metric: String,

        /// Label matcher, `name=value`, repeatable
        #[arg(long = "label")]
        labels: Vec<String>,

        /// Window length in seconds, ending now
        #[arg(long, default_value = "300")]
        window_seconds: u64,
    },

    /// Search stored log records
    Logs {
        /// Log store base URL
        #[arg(long, env = "STORE_URL", default_value = "http://127.0.0.1:3100")]
        store_url: String,

        /// Free-text message tokens
        #[arg(long)]
        query: Option<String>,

        /// Field matcher, `name=value`, repeatable
        #[arg(long = "field")]
        fields: Vec<String>,

        /// Window length in seconds, ending now
        #[arg(long, default_value = "3600")]
        window_seconds: u64,

        /// Maximum records returned
        #[arg(long, default_value = "100")]
        limit: usize,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    match args.command {
        Command::Emitter { listen } => run_emitter(&listen, cancel).await,
        Command::Collector { config, listen } => run_collector(&config, &listen, cancel).await,
        Command::Shipper {
            source_id,
            destination,
            batch_size,
            flush_interval_seconds,
            max_retries,
            input,
        } => {
            run_shipper(
                source_id,
                &destination,
                batch_size,
                flush_interval_seconds,
                max_retries,
                input,
                cancel,
            )
            .await
        }
        Command::Store { listen } => run_store(&listen, cancel).await,
        Command::Dashboard {
            collector_url,
            metric,
            labels,
            window_seconds,
        } => run_dashboard(&collector_url, &metric, &labels, window_seconds).await,
        Command::Logs {
            store_url,
            query,
            fields,
            window_seconds,
            limit,
        } => run_logs(&store_url, query, &fields, window_seconds, limit).await,
    }
}

// =============================================================================
// Roles
// =============================================================================

async fn run_emitter(listen: &str, cancel: CancellationToken) -> Result<()> {
    let registry = Arc::new(MetricRegistry::new());
    register_builtin(&registry)?;

    info!("Starting emitter on {}", listen);
    run_emitter_server(listen, registry, cancel).await
}

async fn run_collector(
    config_path: &PathBuf,
    listen: &str,
    cancel: CancellationToken,
) -> Result<()> {
    let config = ScrapeConfig::from_yaml_file(config_path)?;
    info!(
        "Starting collector: {} targets, interval {:?}",
        config.targets.len(),
        config.interval
    );

    let store = Arc::new(SeriesStore::new());
    let scraper = Scraper::new(config, store.clone())?;

    let scrape_handle = scraper.clone();
    let scrape_cancel = cancel.clone();
    tokio::spawn(async move {
        scrape_handle.run(scrape_cancel).await;
    });

    run_collector_server(listen, store, scraper, cancel).await
}

async fn run_shipper(
    source_id: String,
    destination: &str,
    batch_size: usize,
    flush_interval_seconds: u64,
    max_retries: u32,
    input: Option<PathBuf>,
    cancel: CancellationToken,
) -> Result<()> {
    let config = ShipperConfig {
        source_id,
        batch_size,
        flush_interval: Duration::from_secs(flush_interval_seconds),
        max_retries,
        ..ShipperConfig::default()
    };
    let sink = Arc::new(HttpBatchSink::new(destination, Duration::from_secs(10))?);
    let shipper = Shipper::new(config, sink);

    match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path).await?;
            shipper.clone().run(BufReader::new(file), cancel).await?;
        }
        None => {
            shipper
                .clone()
                .run(BufReader::new(tokio::io::stdin()), cancel)
                .await?;
        }
    }

    let stats = shipper.stats();
    info!(
        "Shipper done: {} batches flushed, {} dropped",
        stats.batches_flushed, stats.batches_dropped
    );
    Ok(())
}

async fn run_store(listen: &str, cancel: CancellationToken) -> Result<()> {
    let store = LogStore::new();
    info!("Starting log store on {}", listen);
    run_store_server(listen, store, cancel).await
}

async fn run_dashboard(
    collector_url: &str,
    metric: &str,
    labels: &[String],
    window_seconds: u64,
) -> Result<()> {
    let client = DashboardClient::new(collector_url, Duration::from_secs(10))?;
    let matchers = parse_pairs(labels)?
        .into_iter()
        .collect::<Labels>();

    let end_ms = chrono::Utc::now().timestamp_millis();
    let start_ms = end_ms - (window_seconds as i64) * 1000;

    let panel = client
        .render_panel(metric, &matchers, start_ms, end_ms)
        .await?;
    print!("{}", panel);
    Ok(())
}

async fn run_logs(
    store_url: &str,
    query: Option<String>,
    fields: &[String],
    window_seconds: u64,
    limit: usize,
) -> Result<()> {
    let client = LogViewClient::new(store_url, Duration::from_secs(10))?;

    let end_ms = chrono::Utc::now().timestamp_millis();
    let start_ms = end_ms - (window_seconds as i64) * 1000;

    let params = SearchParams {
        query,
        fields: parse_pairs(fields)?,
        start_ms: Some(start_ms),
        end_ms: Some(end_ms),
        limit: Some(limit),
    };

    let rendered = client.render(&params).await?;
    print!("{}", rendered);
    Ok(())
}

/// Split repeated `name=value` arguments.
fn parse_pairs(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .ok_or_else(|| Error::Config(format!("expected name=value, got: {}", pair)))
        })
        .collect()
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
