use crate::error::{Result, ThrottleError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Rate, in bytes per second, used in place of negative bandwidth settings.
pub const DEFAULT_BANDWIDTH: u64 = 1024;

/// Bandwidth settings as written in a config file.
///
/// `0` means unbounded; negative values fall back to [`DEFAULT_BANDWIDTH`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthConfig {
    /// Cap shared by every connection of one listener, bytes per second
    #[serde(default = "default_bandwidth")]
    pub aggregate_bandwidth: i64,

    /// Cap requested by each connection, bytes per second
    #[serde(default = "default_bandwidth")]
    pub connection_bandwidth: i64,
}

fn default_bandwidth() -> i64 {
    DEFAULT_BANDWIDTH as i64
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            aggregate_bandwidth: default_bandwidth(),
            connection_bandwidth: default_bandwidth(),
        }
    }
}

impl BandwidthConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn resolve(&self) -> Result<BandwidthLimits> {
        BandwidthLimits::new(self.aggregate_bandwidth, self.connection_bandwidth)
    }
}

/// Validated bandwidth settings for one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandwidthLimits {
    /// `0` is unbounded
    pub aggregate: u64,
    pub per_connection: u64,
}

impl BandwidthLimits {
    /// Normalize raw settings and reject a per-connection rate above a bounded
    /// aggregate. Without its own cap a connection may use the whole aggregate.
    pub fn new(aggregate: i64, per_connection: i64) -> Result<Self> {
        let aggregate = normalize_bandwidth(aggregate);
        let mut per_connection = normalize_bandwidth(per_connection);

        if aggregate > 0 {
            if per_connection == 0 {
                per_connection = aggregate;
            } else if per_connection > aggregate {
                return Err(ThrottleError::ConnectionBandwidthExceedsAggregate {
                    per_connection,
                    aggregate,
                });
            }
        }

        Ok(Self {
            aggregate,
            per_connection,
        })
    }
}

pub fn normalize_bandwidth(bandwidth: i64) -> u64 {
    u64::try_from(bandwidth).unwrap_or(DEFAULT_BANDWIDTH)
}

/// Anything that can produce the current bandwidth settings.
pub trait BandwidthSource {
    fn limits(&self) -> Result<BandwidthLimits>;
}

impl BandwidthSource for BandwidthConfig {
    fn limits(&self) -> Result<BandwidthLimits> {
        self.resolve()
    }
}

impl BandwidthSource for BandwidthLimits {
    fn limits(&self) -> Result<BandwidthLimits> {
        Ok(*self)
    }
}

/// Reads bandwidth settings from a TOML file on every call, either from the
/// top level or from one named table.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    table: Option<String>,
}

impl FileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            table: None,
        }
    }

    pub fn with_table<T: Into<String>>(mut self, table: T) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_config(&self) -> Result<BandwidthConfig> {
        let Some(table) = &self.table else {
            return BandwidthConfig::load(&self.path);
        };

        let content = fs::read_to_string(&self.path)?;
        let mut document: toml::Table = toml::from_str(&content)?;
        match document.remove(table) {
            Some(value) => Ok(value.try_into::<BandwidthConfig>()?),
            None => Err(ThrottleError::Config(format!(
                "missing [{}] table in {}",
                table,
                self.path.display()
            ))),
        }
    }
}

impl BandwidthSource for FileSource {
    fn limits(&self) -> Result<BandwidthLimits> {
        self.read_config()?.resolve()
    }
}
