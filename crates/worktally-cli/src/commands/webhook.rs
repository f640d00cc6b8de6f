use std::io::Read;

use chrono::Utc;
use serde_json::json;
use worktally_core::{ActivityEvent, ActivityProcessor};

use super::{finish_batch, load_config, open_store, remote_client, CliResult};

/// Replay a service-hook payload, e.g. one captured from the Azure DevOps
/// subscription history.
pub async fn run(source: &str) -> CliResult {
    let config = load_config()?;
    let remote = remote_client(&config)?;

    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(source)?
    };
    let payload: serde_json::Value = serde_json::from_str(&raw)?;
    let event = ActivityEvent::from_payload(&payload)?;

    let store = open_store()?;
    let report = ActivityProcessor::from_config(&config)
        .handle_event(&store, &remote, &event, Utc::now())
        .await;
    finish_batch(
        &json!({
            "eventType": event.event_type,
            "processed": report.processed,
            "processedCount": report.processed_count(),
            "errors": report.failures,
        }),
        &report,
    )
}
