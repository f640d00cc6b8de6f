//! Per-entity tracking record and the partial update used to merge into it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether elapsed time accrues for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingState {
    Paused,
    Running,
}

/// Local clock/remainder cache for one work item.
///
/// Effort totals live on the remote work item; this only remembers when time
/// was last measured and how many minutes have not yet become a whole unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub id: String,
    pub running: bool,
    pub accumulated_minutes: u32,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
}

impl TrackingRecord {
    /// A fresh record with no accumulated time.
    pub fn new(id: impl Into<String>, running: bool, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            running,
            accumulated_minutes: 0,
            last_updated: now,
            branch_name: None,
        }
    }

    pub fn state(&self) -> TrackingState {
        if self.running {
            TrackingState::Running
        } else {
            TrackingState::Paused
        }
    }

    /// Apply a merge patch in memory, with the same rules the store uses.
    pub fn merge(&mut self, patch: &RecordPatch) {
        if let Some(running) = patch.running {
            self.running = running;
        }
        if let Some(minutes) = patch.accumulated_minutes {
            self.accumulated_minutes = minutes;
        }
        if let Some(at) = patch.last_updated {
            self.last_updated = self.last_updated.max(at);
        }
        if let Some(branch) = &patch.branch_name {
            self.branch_name = Some(branch.clone());
        }
    }
}

/// Partial record for create-or-merge writes.
///
/// `None` fields are left untouched on an existing record and take their
/// defaults on a new one (`running = false`, `accumulated_minutes = 0`,
/// `last_updated = now`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub id: String,
    pub running: Option<bool>,
    pub accumulated_minutes: Option<u32>,
    pub last_updated: Option<DateTime<Utc>>,
    pub branch_name: Option<String>,
}

impl RecordPatch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn running(mut self, running: bool) -> Self {
        self.running = Some(running);
        self
    }

    pub fn accumulated_minutes(mut self, minutes: u32) -> Self {
        self.accumulated_minutes = Some(minutes);
        self
    }

    pub fn last_updated(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated = Some(at);
        self
    }

    pub fn branch_name(mut self, branch: Option<&str>) -> Self {
        self.branch_name = branch.map(str::to_string);
        self
    }

    /// Materialize the record a fresh insert of this patch would produce.
    pub fn into_new_record(self, now: DateTime<Utc>) -> TrackingRecord {
        TrackingRecord {
            id: self.id,
            running: self.running.unwrap_or(false),
            accumulated_minutes: self.accumulated_minutes.unwrap_or(0),
            last_updated: self.last_updated.unwrap_or(now),
            branch_name: self.branch_name,
        }
    }
}
