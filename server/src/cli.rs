use crate::config::ServeMode;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "throttle-server")]
#[command(about = "TCP server whose connections share a throttled bandwidth pool", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file; built-in defaults are used when omitted
    #[arg(short, long, env = "THROTTLE_CONFIG")]
    pub config: Option<String>,

    /// Override listen address
    #[arg(short, long, env = "THROTTLE_LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// Override aggregate bandwidth in bytes per second (0 = unbounded)
    #[arg(long, allow_negative_numbers = true)]
    pub aggregate_bandwidth: Option<i64>,

    /// Override per-connection bandwidth in bytes per second
    #[arg(long, allow_negative_numbers = true)]
    pub connection_bandwidth: Option<i64>,

    /// Override serve mode
    #[arg(short, long, value_enum)]
    pub mode: Option<ServeMode>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log directory
    #[arg(long)]
    pub log_dir: Option<String>,

    /// Override number of runtime worker threads
    #[arg(long)]
    pub runtime_threads: Option<usize>,
}

impl CliArgs {
    pub fn overrides_bandwidth(&self) -> bool {
        self.aggregate_bandwidth.is_some() || self.connection_bandwidth.is_some()
    }
}
