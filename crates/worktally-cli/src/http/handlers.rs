use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use worktally_core::{
    ActivityEvent, ActivityProcessor, BatchReport, TrackingController, TrackingStore,
};

use super::{errors::HttpError, state::HttpState};

fn parse_body(body: &Bytes) -> Result<Value, HttpError> {
    serde_json::from_slice(body).map_err(|e| HttpError::bad_request(format!("invalid JSON: {e}")))
}

/// Ids may arrive as strings or bare numbers.
fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn wi_ids(body: &Value) -> Result<Vec<String>, HttpError> {
    let ids: Vec<String> = body
        .get("wi_ids")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(id_of).collect())
        .unwrap_or_default();
    if ids.is_empty() {
        return Err(HttpError::bad_request("provide wi_ids: [..]"));
    }
    Ok(ids)
}

fn batch_status(report: &BatchReport) -> StatusCode {
    if report.has_failures() {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    }
}

pub async fn devops_webhook(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<impl IntoResponse, HttpError> {
    let remote = state.remote()?;
    let payload = parse_body(&body)?;
    let event = ActivityEvent::from_payload(&payload)?;

    let report = ActivityProcessor::from_config(&state.config)
        .handle_event(&*state.store, &*remote, &event, Utc::now())
        .await;

    Ok((
        batch_status(&report),
        Json(json!({
            "eventType": event.event_type,
            "processed": report.processed,
            "processedCount": report.processed_count(),
            "errors": report.failures,
        })),
    ))
}

pub async fn connect(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<impl IntoResponse, HttpError> {
    let remote = state.remote()?;
    let ids = wi_ids(&parse_body(&body)?)?;

    let report = ActivityProcessor::from_config(&state.config)
        .connect(&*state.store, &*remote, &ids, Utc::now())
        .await;

    Ok((
        batch_status(&report),
        Json(json!({ "connected": report.processed, "errors": report.failures })),
    ))
}

async fn set_running(state: HttpState, body: Bytes, running: bool) -> Result<impl IntoResponse, HttpError> {
    let ids = wi_ids(&parse_body(&body)?)?;
    let report = TrackingController::new(&*state.store).set_running(&ids, running, Utc::now());
    Ok((
        batch_status(&report),
        Json(json!({ "updated": report.processed, "running": running, "errors": report.failures })),
    ))
}

pub async fn pause(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<impl IntoResponse, HttpError> {
    set_running(state, body, false).await
}

pub async fn resume(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<impl IntoResponse, HttpError> {
    set_running(state, body, true).await
}

pub async fn focus(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<impl IntoResponse, HttpError> {
    let payload = parse_body(&body)?;
    let id = payload
        .get("wi_id")
        .and_then(id_of)
        .ok_or_else(|| HttpError::bad_request("provide wi_id"))?;

    let outcome = TrackingController::new(&*state.store).focus(&id, Utc::now())?;
    Ok(Json(outcome))
}

pub async fn status(State(state): State<HttpState>) -> Result<impl IntoResponse, HttpError> {
    let records = state.store.scan_all()?;
    Ok(Json(json!({ "records": records })))
}
