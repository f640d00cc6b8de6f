use chrono::Utc;
use worktally_core::ReconciliationEngine;

use super::{load_config, open_store, print_json, remote_client, CliResult};

pub async fn run() -> CliResult {
    let config = load_config()?;
    let remote = remote_client(&config)?;
    let store = open_store()?;

    let report = ReconciliationEngine::from_config(&config)
        .tick(&store, &remote, Utc::now())
        .await?;
    print_json(&report)?;

    if !report.failures.is_empty() {
        return Err(format!("{} work item(s) failed to reconcile", report.failures.len()).into());
    }
    Ok(())
}
