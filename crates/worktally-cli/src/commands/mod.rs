pub mod config;
pub mod serve;
pub mod tick;
pub mod tracking;
pub mod webhook;

use serde::Serialize;
use worktally_core::{AdoClient, BatchReport, Config, TrackingDb};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Config file plus environment overrides, validated.
pub fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    Ok(Config::from_env()?)
}

pub fn open_store() -> Result<TrackingDb, Box<dyn std::error::Error>> {
    Ok(TrackingDb::open()?)
}

/// Fails before any processing when the Azure DevOps settings are incomplete.
pub fn remote_client(config: &Config) -> Result<AdoClient, Box<dyn std::error::Error>> {
    Ok(AdoClient::from_config(config)?)
}

pub fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the report; per-item failures make the command fail after printing.
pub fn finish_batch<T: Serialize>(body: &T, report: &BatchReport) -> CliResult {
    print_json(body)?;
    if report.has_failures() {
        return Err(format!("{} work item(s) failed", report.failures.len()).into());
    }
    Ok(())
}
