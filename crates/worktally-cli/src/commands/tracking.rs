use chrono::Utc;
use serde_json::json;
use worktally_core::{ActivityProcessor, TrackingController, TrackingStore};

use super::{finish_batch, load_config, open_store, print_json, remote_client, CliResult};

pub async fn connect(ids: Vec<String>) -> CliResult {
    let config = load_config()?;
    let remote = remote_client(&config)?;
    let store = open_store()?;

    let report = ActivityProcessor::from_config(&config)
        .connect(&store, &remote, &ids, Utc::now())
        .await;
    finish_batch(
        &json!({ "connected": report.processed, "failures": report.failures }),
        &report,
    )
}

pub fn set_running(ids: Vec<String>, running: bool) -> CliResult {
    let store = open_store()?;
    let report = TrackingController::new(&store).set_running(&ids, running, Utc::now());
    finish_batch(
        &json!({ "updated": report.processed, "running": running, "failures": report.failures }),
        &report,
    )
}

pub fn focus(id: &str) -> CliResult {
    let store = open_store()?;
    let outcome = TrackingController::new(&store).focus(id, Utc::now())?;
    print_json(&outcome)
}

pub fn status() -> CliResult {
    let store = open_store()?;
    let records = store.scan_all()?;
    print_json(&records)
}

pub fn history(limit: usize) -> CliResult {
    let store = open_store()?;
    let entries = store.recent_applications(limit)?;
    print_json(&entries)
}
