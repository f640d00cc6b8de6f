//! Webhook and control API.

mod errors;
mod handlers;
mod state;

use axum::{
    routing::{get, post},
    Router,
};

pub use state::HttpState;

pub fn router(state: HttpState) -> Router<()> {
    Router::new()
        .route("/devops-webhook", post(handlers::devops_webhook))
        .route("/connect", post(handlers::connect))
        .route("/pause", post(handlers::pause))
        .route("/resume", post(handlers::resume))
        .route("/focus", post(handlers::focus))
        .route("/status", get(handlers::status))
        .with_state(state)
}
