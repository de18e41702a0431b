//! Rill worker daemon
//!
//! The `rilld` binary hosts the partition engines of one worker:
//! - Loads the partitions listed in the configuration file
//! - Runs the maintenance loops until SIGINT/SIGTERM
//! - Reports partition status on a fixed interval
//! - Commits and unloads every partition on shutdown
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (local DFS under ./rill-data)
//! rilld
//!
//! # Use a configuration file
//! rilld --config /etc/rill/rilld.toml
//!
//! # Override the DFS root
//! rilld --dfs-root /var/lib/rill
//! ```

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rill_broker::{BrokerConfig, Supervisor};
use rill_common::dfs::LocalDfs;
use rill_common::metrics::{MetricsSink, NoopMetrics, TracingMetrics};
use rill_storage::EngineContext;

/// Rill worker daemon
#[derive(Parser, Debug)]
#[command(
    name = "rilld",
    version,
    about = "Rill partition storage worker",
    long_about = "Hosts the partition engines of one Rill worker.\n\n\
                  Buffers produced messages in memory, commits them to the DFS and serves reads."
)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", env = "RILL_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory of the local DFS
    #[arg(short = 'd', long, value_name = "DIR", env = "RILL_DFS_ROOT")]
    dfs_root: Option<PathBuf>,

    /// Worker pool threads
    #[arg(long, env = "RILL_WORKER_THREADS")]
    worker_threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "RILL_LOG_LEVEL")]
    log_level: String,

    /// Print configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    run(config)
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let filter = EnvFilter::try_new(format!(
        "rilld={level},rill_broker={level},rill_storage={level},rill_cache={level},rill_common={level}"
    ))
    .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn load_config(args: &Args) -> Result<BrokerConfig> {
    let mut config = if let Some(path) = &args.config {
        BrokerConfig::from_file(path).context("Failed to load config file")?
    } else {
        BrokerConfig::default()
    };

    if let Some(root) = &args.dfs_root {
        config.dfs_root = root.clone();
    }
    if let Some(threads) = args.worker_threads {
        config.supervisor.worker_threads = threads;
    }

    config.validate()?;
    Ok(config)
}

fn run(config: BrokerConfig) -> Result<()> {
    std::fs::create_dir_all(&config.dfs_root).context("Failed to create DFS root")?;
    let dfs = LocalDfs::new(&config.dfs_root).context("Failed to open DFS root")?;
    let metrics: Arc<dyn MetricsSink> = if config.trace_metrics {
        Arc::new(TracingMetrics)
    } else {
        Arc::new(NoopMetrics)
    };
    let ctx = EngineContext::new(
        Arc::new(dfs),
        config.buffer.clone(),
        config.admission.clone(),
        config.block_cache.clone(),
    )?
    .with_metrics(metrics);

    info!("Worker configuration:");
    info!("  DFS root: {}", config.dfs_root.display());
    info!(
        "  Write cache: {} x {} B blocks",
        config.buffer.write_cache_blocks, config.buffer.block_size
    );
    info!(
        "  File cache: {} x {} B blocks",
        config.buffer.file_cache_blocks, config.buffer.block_size
    );
    info!("  Worker threads: {}", config.supervisor.worker_threads);

    let supervisor = Supervisor::new(ctx, config.supervisor.clone())?;
    supervisor.start()?;

    for (partition, result) in supervisor.load(config.partition_specs()) {
        match result {
            Ok(()) => info!(partition = %partition, "partition loaded"),
            Err(err) => error!(partition = %partition, error = %err, "failed to load partition"),
        }
    }

    let shutdown = shutdown_signal()?;
    info!("Press Ctrl+C to shutdown");
    loop {
        match shutdown.recv_timeout(config.heartbeat_interval()) {
            Ok(signal) => {
                info!(signal, "Shutdown signal received");
                break;
            }
            Err(RecvTimeoutError::Timeout) => report_status(&supervisor),
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Signal listener exited");
                break;
            }
        }
    }

    info!("Shutting down gracefully...");
    supervisor.stop()?;
    info!("Worker stopped. Goodbye!");
    Ok(())
}

fn report_status(supervisor: &Supervisor) {
    for status in supervisor.partition_statuses() {
        info!(
            partition = %status.partition,
            status = ?status.status,
            received = status.received_id,
            committed = status.committed_id,
            sealed = status.sealed,
            last_error = status.last_commit_error.as_deref().unwrap_or(""),
            "partition status"
        );
    }
    info!(stats = %supervisor.stats(), "supervisor");
}

fn shutdown_signal() -> Result<mpsc::Receiver<i32>> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handler")?;
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("rilld-signals".to_owned())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                let _ = tx.send(signal);
            }
        })
        .context("Failed to start signal listener")?;
    Ok(rx)
}
