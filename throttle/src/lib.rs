//! Bandwidth throttling for byte streams: a fixed cap per connection, or an
//! aggregate cap shared fairly by every connection of one listener.

pub mod allocator;
pub mod config;
pub mod connection;
pub mod error;
pub mod limiter;
pub mod listener;
pub mod settings;
pub mod source;
pub mod stream;

pub use allocator::{AllocatorSnapshot, BandwidthAllocator, Registration};
pub use config::{BandwidthConfig, BandwidthLimits, BandwidthSource, DEFAULT_BANDWIDTH, FileSource};
pub use connection::{ManagedConnection, wrap_connection};
pub use error::{Result, ThrottleError};
pub use limiter::Limiter;
pub use listener::{Acceptor, ManagedListener};
pub use settings::SettingsHandle;
pub use source::StallingSource;
pub use stream::RateLimitedStream;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber. `RUST_LOG` takes precedence over `log_level`.
/// With a `log_dir`, logs go to a daily-rolling file and the returned guard
/// must be held until shutdown.
///
/// Closing a span logs its lifetime, so a per-connection span reports how
/// long each connection was busy and idle.
pub fn init_tracing(log_dir: Option<&str>, log_file: &str, log_level: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let (writer, guard, ansi) = match log_dir {
        Some(log_dir) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, log_file);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (BoxMakeWriter::new(non_blocking), Some(guard), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), None, true),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_ansi(ansi),
        )
        .init();
    guard
}
