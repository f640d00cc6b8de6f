//! Start / pause / resume / focus transitions for tracking records.
//!
//! Every write is a create-or-merge that only touches `running`,
//! `last_updated` (and `branch_name` on start). The accumulated remainder is
//! never reset by a transition, so pausing keeps partial progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{RecordPatch, TrackingRecord};
use crate::error::{CoreError, Result};
use crate::report::BatchReport;
use crate::storage::TrackingStore;

/// Result of a focus call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusOutcome {
    pub focused: String,
    /// Records that were running before and are now paused.
    pub paused: Vec<String>,
}

pub struct TrackingController<'a, S: TrackingStore + ?Sized> {
    store: &'a S,
}

fn clean_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(CoreError::Validation("work item id must not be empty".into()));
    }
    Ok(id)
}

impl<'a, S: TrackingStore + ?Sized> TrackingController<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Begin tracking `id`. A new record starts at zero minutes; an existing
    /// one keeps its remainder.
    pub fn start(
        &self,
        id: &str,
        branch_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TrackingRecord> {
        let id = clean_id(id)?;
        let patch = RecordPatch::new(id)
            .running(true)
            .last_updated(now)
            .branch_name(branch_name);
        self.store.upsert_merge(&patch)?;
        tracing::info!(work_item = id, branch = ?branch_name, "tracking started");

        match self.store.get(id)? {
            Some(record) => Ok(record),
            None => Ok(patch.into_new_record(now)),
        }
    }

    /// Pause or resume each id, creating missing records.
    pub fn set_running(&self, ids: &[String], running: bool, now: DateTime<Utc>) -> BatchReport {
        let mut report = BatchReport::default();
        for raw in ids {
            let result = clean_id(raw).and_then(|id| {
                self.store
                    .upsert_merge(&RecordPatch::new(id).running(running).last_updated(now))?;
                Ok(id.to_string())
            });
            match result {
                Ok(id) => report.succeeded(id),
                Err(e) => {
                    tracing::warn!(work_item = %raw, error = %e, "failed to update running flag");
                    report.failed(raw.trim(), e);
                }
            }
        }
        tracing::info!(running, updated = report.processed_count(), "running flag updated");
        report
    }

    /// Make `id` the only running record.
    ///
    /// Two phases: every existing record is paused, then `id` is resumed
    /// (created if missing). The phases are separate writes, so exclusivity is
    /// eventual: a concurrent start on another id between the phases can leave
    /// two records running until the next focus or pause.
    pub fn focus(&self, id: &str, now: DateTime<Utc>) -> Result<FocusOutcome> {
        let id = clean_id(id)?;
        let mut paused = Vec::new();

        for record in self.store.scan_all()? {
            if record.id == id {
                continue;
            }
            self.store
                .upsert_merge(&RecordPatch::new(&record.id).running(false).last_updated(now))?;
            if record.running {
                paused.push(record.id);
            }
        }

        self.store
            .upsert_merge(&RecordPatch::new(id).running(true).last_updated(now))?;
        tracing::info!(work_item = id, paused = paused.len(), "focus changed");

        Ok(FocusOutcome {
            focused: id.to_string(),
            paused,
        })
    }
}
