mod config;
pub mod database;
pub mod migrations;

pub use config::{
    AzureDevOpsConfig, Config, EffortConfig, ScheduleConfig, ServerConfig, StatesConfig,
};
pub use database::{EffortApplication, EffortSource, TrackingDb, TrackingStore};

use std::path::PathBuf;

/// Returns `~/.config/worktally[-dev]/` based on WORKTALLY_ENV.
///
/// Set WORKTALLY_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("WORKTALLY_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("worktally-dev")
    } else {
        base_dir.join("worktally")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
