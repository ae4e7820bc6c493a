use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThrottleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "connection bandwidth {per_connection} B/s should not exceed aggregate bandwidth {aggregate} B/s"
    )]
    ConnectionBandwidthExceedsAggregate { per_connection: u64, aggregate: u64 },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ThrottleError {
    /// Whether the error was raised while validating bandwidth settings rather
    /// than by the transport or the filesystem.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConnectionBandwidthExceedsAggregate { .. } | Self::ConfigParse(_) | Self::Config(_)
        )
    }
}
