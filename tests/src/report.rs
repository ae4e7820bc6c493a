use crate::scenarios::ScenarioResults;
use anyhow::Result;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use tracing::info;

/// Write any serializable result set as pretty JSON.
pub fn write_json<T: Serialize>(results: &T, path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(results)?;
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    info!("JSON report generated: {}", path);
    Ok(())
}

/// Log one line per scenario, failures with their reason.
pub fn print_summary(results: &ScenarioResults) {
    info!("=== Scenario Summary ===");
    for result in &results.details {
        if result.passed {
            info!(
                "PASS {:<24} {:>7} ms  {}",
                result.name,
                result.duration_ms,
                result.detail.as_deref().unwrap_or("")
            );
        } else {
            info!(
                "FAIL {:<24} {:>7} ms  {}",
                result.name,
                result.duration_ms,
                result.error.as_deref().unwrap_or("Unknown error")
            );
        }
    }
    if results.total > 0 {
        info!(
            "Success rate: {:.1}%",
            results.passed as f64 / results.total as f64 * 100.0
        );
    }
}
