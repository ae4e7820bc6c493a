mod cli;
mod config;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use cli::CliArgs;
use config::ServerConfig;
use server::ThrottleServer;
use tracing::{info, warn};

fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration
    let mut cfg = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => ServerConfig::default(),
    };

    // Override with command line arguments
    if let Some(listen_addr) = &args.listen_addr {
        cfg.listen_addr = listen_addr.clone();
    }
    if let Some(aggregate) = args.aggregate_bandwidth {
        cfg.bandwidth.aggregate_bandwidth = aggregate;
    }
    if let Some(per_connection) = args.connection_bandwidth {
        cfg.bandwidth.connection_bandwidth = per_connection;
    }
    if let Some(mode) = args.mode {
        cfg.mode = mode;
    }
    if let Some(log_level) = &args.log_level {
        cfg.log_level = log_level.clone();
    }
    if let Some(log_dir) = &args.log_dir {
        cfg.log_dir = Some(log_dir.clone());
    }
    if let Some(threads) = args.runtime_threads {
        cfg.runtime_threads = Some(threads);
    }

    let _guard = throttle::init_tracing(cfg.log_dir.as_deref(), &cfg.log_file, &cfg.log_level);
    info!("Starting throttle server with configuration: {:?}", cfg);

    // Command line bandwidth would be clobbered by the next file reload.
    let reload_from = if args.overrides_bandwidth() {
        if cfg.reload_interval_secs > 0 {
            warn!("Bandwidth given on the command line, settings reload disabled");
        }
        None
    } else {
        args.config.as_deref()
    };

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(threads) = cfg.runtime_threads {
        builder.worker_threads(threads);
    }
    let runtime = builder.build().context("Failed to build tokio runtime")?;

    let server = ThrottleServer::new(cfg, reload_from)?;
    runtime.block_on(server.run())?;

    info!("Throttle server stopped");
    Ok(())
}
