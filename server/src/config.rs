use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use throttle::BandwidthConfig;

/// What the server sends to each client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServeMode {
    /// Send back whatever the client sends
    #[default]
    Echo,
    /// Send `source_bytes` of generated data, then close
    Source,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub mode: ServeMode,

    /// Bytes sent to each client in source mode
    #[serde(default = "default_source_bytes")]
    pub source_bytes: u64,

    /// Buffer size for each read and write
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Seconds between re-reads of the [bandwidth] table; 0 disables reloading
    #[serde(default)]
    pub reload_interval_secs: u64,

    #[serde(default)]
    pub bandwidth: BandwidthConfig,

    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log directory for file-based logging; logs go to stdout when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Number of Tokio runtime worker threads (defaults to CPU cores)
    #[serde(default)]
    pub runtime_threads: Option<usize>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_source_bytes() -> u64 {
    30 << 10
}

fn default_chunk_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "throttle-server.log".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            mode: ServeMode::default(),
            source_bytes: default_source_bytes(),
            chunk_size: default_chunk_size(),
            reload_interval_secs: 0,
            bandwidth: BandwidthConfig::default(),
            log_level: default_log_level(),
            log_dir: None,
            log_file: default_log_file(),
            runtime_threads: None,
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
