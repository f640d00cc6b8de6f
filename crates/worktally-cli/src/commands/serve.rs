use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use worktally_core::{ReconciliationEngine, RemoteRecordClient, TrackingDb};

use super::{load_config, open_store, remote_client, CliResult};
use crate::http::{self, HttpState};

pub async fn run() -> CliResult {
    let config = Arc::new(load_config()?);
    let remote: Arc<dyn RemoteRecordClient> = Arc::new(remote_client(&config)?);
    let store = Arc::new(open_store()?);

    let ticker = tokio::spawn(tick_loop(
        ReconciliationEngine::from_config(&config),
        Arc::clone(&store),
        Arc::clone(&remote),
        Duration::from_secs(config.schedule.tick_interval_secs),
    ));

    let state = HttpState::new(Arc::clone(&config), store, Some(remote));
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        tick_interval_secs = config.schedule.tick_interval_secs,
        "worktally listening"
    );

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ticker.abort();
    Ok(())
}

/// Periodic reconciliation. The first tick fires one full period after start.
async fn tick_loop(
    engine: ReconciliationEngine,
    store: Arc<TrackingDb>,
    remote: Arc<dyn RemoteRecordClient>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        interval.tick().await;
        match engine.tick(&*store, &*remote, Utc::now()).await {
            Ok(report) if !report.failures.is_empty() => {
                tracing::warn!(failed = report.failures.len(), "tick finished with failures");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "tick aborted: tracking store unavailable"),
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
}
