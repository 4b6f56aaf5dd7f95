//! Kiln prediction runner
//!
//! Usage:
//!     kiln-runner --spool-dir ./spool --store-root ./store --out-dir ./out

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use kiln_logging::{init_logging, LogConfig};
use kiln_protocol::RunConfig;
use kiln_runner::local::{DirResolver, EchoPredictor, JsonFileTableClient, LogNotifier, SpoolSource};
use kiln_runner::RunExecutor;
use kiln_sinks::{TableWriter, TableWriterConfig};

#[derive(Parser, Debug)]
#[command(name = "kiln-runner", about = "Bounded-batch prediction runner")]
struct Args {
    /// Directory of queued message files (*.json)
    #[arg(long, env = "KILN_SPOOL_DIR")]
    spool_dir: PathBuf,

    /// Root directory payload URIs resolve under
    #[arg(long, env = "KILN_STORE_ROOT")]
    store_root: PathBuf,

    /// Output directory for table rows
    #[arg(long, env = "KILN_OUT_DIR", default_value = "out")]
    out_dir: PathBuf,

    /// Capacity ceiling for this run's intake
    #[arg(long)]
    capacity: Option<usize>,

    /// Per-prediction deadline in seconds (unbounded if omitted)
    #[arg(long)]
    predict_timeout_seconds: Option<u64>,

    /// Debug-level console output
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(LogConfig {
        app_name: "kiln-runner",
        verbose: args.verbose,
    })?;

    let mut config = RunConfig::from_env();
    if let Some(capacity) = args.capacity {
        config.max_processing_requests = capacity;
    }

    let run_id = uuid::Uuid::new_v4();
    tracing::info!("Starting Kiln runner");
    tracing::info!("  Run ID: {}", run_id);
    tracing::info!("  Spool: {}", args.spool_dir.display());
    tracing::info!("  Store: {}", args.store_root.display());
    tracing::info!("  Output: {}", args.out_dir.display());

    fs::create_dir_all(&args.out_dir)?;

    let source = SpoolSource::new(args.spool_dir);
    let resolver = DirResolver::new(args.store_root);
    let writer = TableWriter::new(
        JsonFileTableClient::new(args.out_dir),
        TableWriterConfig::from_run_config(&config),
    );
    let predictor = EchoPredictor {
        limit: args.predict_timeout_seconds.map(Duration::from_secs),
    };

    let executor = RunExecutor::new(source, resolver, writer, LogNotifier, predictor, config);
    let summary = executor.run().await?;

    tracing::info!("  Requests: {}", summary.requests);
    tracing::info!("  Predictions: {}", summary.predictions);
    tracing::info!("  Errors: {}", summary.errors);
    tracing::info!("  Records written: {}", summary.write.written);
    if let Some(per_prediction) = summary.per_prediction_duration {
        tracing::info!("  Per-prediction: {:?}", per_prediction);
    }

    Ok(())
}
