//! First-touch initialization and state activation for remote work items.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::remote::{PatchOp, RecordField, RemoteRecord};
use crate::storage::Config;

/// How a work item looks from the tracker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    /// Effort fields were never set.
    Uninitialized,
    /// Effort fields set, state is a not-started label.
    NotStarted,
    /// State is one of the in-progress labels (or the activation target).
    InProgress,
    /// Done, removed or any custom state; left alone.
    Other,
}

/// Computes the one-time initialization patch and the state transition.
///
/// Performs no I/O. Applying the returned ops and planning again yields an
/// empty list.
#[derive(Debug, Clone)]
pub struct ActivationPolicy {
    default_estimate_hours: f64,
    not_started: HashSet<String>,
    in_progress: HashSet<String>,
    activate_to: String,
}

fn normalize(label: &str) -> String {
    label.trim().to_lowercase()
}

impl ActivationPolicy {
    pub fn new<I, J>(
        default_estimate_hours: f64,
        not_started: I,
        in_progress: J,
        activate_to: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        J: IntoIterator,
        J::Item: AsRef<str>,
    {
        let activate_to = activate_to.into();
        let mut in_progress: HashSet<String> =
            in_progress.into_iter().map(|s| normalize(s.as_ref())).collect();
        in_progress.insert(normalize(&activate_to));
        Self {
            default_estimate_hours,
            not_started: not_started.into_iter().map(|s| normalize(s.as_ref())).collect(),
            in_progress,
            activate_to,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.effort.default_estimate_hours,
            &cfg.states.not_started,
            &cfg.states.in_progress,
            cfg.states.activate_to.clone(),
        )
    }

    fn is_not_started(&self, remote: &RemoteRecord) -> bool {
        remote
            .state
            .as_deref()
            .is_some_and(|s| self.not_started.contains(&normalize(s)))
    }

    pub fn status(&self, remote: &RemoteRecord) -> ActivationStatus {
        if remote.is_uninitialized() {
            ActivationStatus::Uninitialized
        } else if self.is_not_started(remote) {
            ActivationStatus::NotStarted
        } else if remote
            .state
            .as_deref()
            .is_some_and(|s| self.in_progress.contains(&normalize(s)))
        {
            ActivationStatus::InProgress
        } else {
            ActivationStatus::Other
        }
    }

    /// Ordered ops: effort initialization first, then the state transition.
    pub fn plan(&self, remote: &RemoteRecord) -> Vec<PatchOp> {
        let mut ops = Vec::new();
        if remote.is_uninitialized() {
            ops.push(PatchOp::number(
                RecordField::RemainingWork,
                self.default_estimate_hours,
            ));
            ops.push(PatchOp::number(RecordField::CompletedWork, 0.0));
        }
        if self.is_not_started(remote) {
            ops.push(PatchOp::text(RecordField::State, self.activate_to.clone()));
        }
        ops
    }
}
