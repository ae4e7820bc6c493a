pub mod report;
pub mod scenarios;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "integration-tests")]
#[command(about = "Throttling scenarios and throughput measurement over real TCP")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run throttling scenarios against loopback listeners
    Scenarios {
        /// Leave out the 30 second stalled source scenario
        #[arg(long)]
        skip_slow: bool,

        /// Output JSON report path
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Measure throughput from a running throttle server
    Measure {
        /// Server address (e.g., "127.0.0.1:8080")
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        addr: String,

        /// Bytes to send before reading; use with echo mode
        #[arg(short, long, default_value = "0")]
        send_bytes: u64,

        /// Buffer size for each read and write
        #[arg(long, default_value = "1024")]
        chunk_size: usize,

        /// Output JSON report path
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = throttle::init_tracing(None, "integration-tests.log", "info");

    let cli = Cli::parse();

    match cli.command {
        Commands::Scenarios { skip_slow, output } => {
            let results = scenarios::run_all(skip_slow).await?;
            report::print_summary(&results);
            if let Some(path) = output {
                report::write_json(&results, &path)?;
            }
            if results.failed > 0 {
                bail!("{} of {} scenarios failed", results.failed, results.total);
            }
        }
        Commands::Measure {
            addr,
            send_bytes,
            chunk_size,
            output,
        } => {
            info!("Measuring throughput from {}", addr);
            let measurement = measure::measure(&addr, send_bytes, chunk_size).await?;
            if let Some(path) = output {
                report::write_json(&measurement, &path)?;
            }
        }
    }

    Ok(())
}
