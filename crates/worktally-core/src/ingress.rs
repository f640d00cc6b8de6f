//! Activity signals from Azure DevOps service hooks.
//!
//! A hook payload is reduced to an [`ActivityEvent`] (event type, referenced
//! work-item ids, branch name) and then handled per work item by the
//! [`ActivityProcessor`]: branch creation starts tracking, pushes add a fixed
//! effort increment, and every signal gives the activation policy a chance to
//! initialize the work item.

use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::activation::ActivationPolicy;
use crate::error::{CoreError, RemoteError, Result};
use crate::remote::{effort_ops, PatchOp, RemoteRecordClient};
use crate::report::BatchReport;
use crate::storage::{Config, EffortApplication, EffortSource, TrackingStore};
use crate::tracking::TrackingController;

pub const EVENT_BRANCH_CREATED: &str = "git.refUpdateCreated";
pub const EVENT_PUSH: &str = "git.push";

fn work_item_ref() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)AB#(\d+)").expect("constant work item pattern"))
}

/// Ids mentioned as `AB#<n>` in free text.
pub fn extract_work_item_ids(text: &str, out: &mut BTreeSet<String>) {
    for caps in work_item_ref().captures_iter(text) {
        if let Some(id) = caps.get(1) {
            out.insert(id.as_str().to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BranchCreated,
    Push,
    Other,
}

/// One decoded service-hook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub event_type: String,
    pub work_item_ids: BTreeSet<String>,
    pub branch_name: Option<String>,
}

impl ActivityEvent {
    /// Decode a service-hook payload.
    ///
    /// Ids are collected from ref update names, commit comments, the created
    /// ref, and pull request title and description.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        if !payload.is_object() {
            return Err(CoreError::Validation("webhook payload must be a JSON object".into()));
        }

        let event_type = payload
            .get("eventType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let resource = payload.get("resource").unwrap_or(&Value::Null);

        let mut ids = BTreeSet::new();
        let mut scan = |value: Option<&Value>| {
            if let Some(text) = value.and_then(Value::as_str) {
                extract_work_item_ids(text, &mut ids);
            }
        };

        if let Some(updates) = resource.get("refUpdates").and_then(Value::as_array) {
            for update in updates {
                scan(update.get("name"));
            }
        }
        if let Some(commits) = resource.get("commits").and_then(Value::as_array) {
            for commit in commits {
                scan(commit.get("comment"));
            }
        }
        let branch_name = resource
            .get("ref")
            .and_then(|r| r.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        scan(resource.get("ref").and_then(|r| r.get("name")));
        scan(resource.get("title"));
        scan(resource.get("description"));

        Ok(Self {
            event_type,
            work_item_ids: ids,
            branch_name,
        })
    }

    pub fn kind(&self) -> EventKind {
        match self.event_type.as_str() {
            EVENT_BRANCH_CREATED => EventKind::BranchCreated,
            EVENT_PUSH => EventKind::Push,
            _ => EventKind::Other,
        }
    }
}

/// Applies activity signals to the tracking store and remote work items.
#[derive(Debug, Clone)]
pub struct ActivityProcessor {
    policy: ActivationPolicy,
    hours_per_push: f64,
    entity_timeout_secs: u64,
}

impl ActivityProcessor {
    pub fn new(policy: ActivationPolicy, hours_per_push: f64, entity_timeout_secs: u64) -> Self {
        Self {
            policy,
            hours_per_push,
            entity_timeout_secs: entity_timeout_secs.max(1),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            ActivationPolicy::from_config(cfg),
            cfg.effort.hours_per_push,
            cfg.schedule.entity_timeout_secs,
        )
    }

    /// Handle every work item referenced by `event`. Items fail independently.
    pub async fn handle_event<S, R>(
        &self,
        store: &S,
        remote: &R,
        event: &ActivityEvent,
        now: DateTime<Utc>,
    ) -> BatchReport
    where
        S: TrackingStore + ?Sized,
        R: RemoteRecordClient + ?Sized,
    {
        tracing::info!(
            event_type = %event.event_type,
            work_items = ?event.work_item_ids,
            "activity event received"
        );

        let mut report = BatchReport::default();
        for id in &event.work_item_ids {
            let result = self
                .bounded(self.apply_event(store, remote, event, id, now))
                .await;
            match result {
                Ok(()) => report.succeeded(id.as_str()),
                Err(e) => {
                    tracing::warn!(work_item = %id, event_type = %event.event_type, error = %e, "failed to process work item");
                    report.failed(id.as_str(), e);
                }
            }
        }
        report
    }

    /// Start tracking each id and initialize its work item.
    pub async fn connect<S, R>(
        &self,
        store: &S,
        remote: &R,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> BatchReport
    where
        S: TrackingStore + ?Sized,
        R: RemoteRecordClient + ?Sized,
    {
        let mut report = BatchReport::default();
        for raw in ids {
            let id = raw.trim();
            let result = self.bounded(self.connect_one(store, remote, id, now)).await;
            match result {
                Ok(()) => report.succeeded(id),
                Err(e) => {
                    tracing::warn!(work_item = %id, error = %e, "failed to connect work item");
                    report.failed(id, e);
                }
            }
        }
        tracing::info!(
            connected = report.processed_count(),
            failed = report.failures.len(),
            "connect finished"
        );
        report
    }

    async fn bounded<F>(&self, fut: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        tokio::time::timeout(Duration::from_secs(self.entity_timeout_secs), fut)
            .await
            .unwrap_or_else(|_| {
                Err(RemoteError::Timeout {
                    secs: self.entity_timeout_secs,
                }
                .into())
            })
    }

    async fn connect_one<S, R>(&self, store: &S, remote: &R, id: &str, now: DateTime<Utc>) -> Result<()>
    where
        S: TrackingStore + ?Sized,
        R: RemoteRecordClient + ?Sized,
    {
        TrackingController::new(store).start(id, None, now)?;
        let work_item = remote.get(id).await?;
        let ops = self.policy.plan(&work_item);
        self.patch_if_any(remote, id, &ops).await
    }

    async fn apply_event<S, R>(
        &self,
        store: &S,
        remote: &R,
        event: &ActivityEvent,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<()>
    where
        S: TrackingStore + ?Sized,
        R: RemoteRecordClient + ?Sized,
    {
        let kind = event.kind();
        if kind == EventKind::BranchCreated {
            TrackingController::new(store).start(id, event.branch_name.as_deref(), now)?;
        }

        let work_item = remote.get(id).await?;
        let mut ops: Vec<PatchOp> = Vec::new();
        let mut push_hours = None;

        match kind {
            EventKind::BranchCreated => ops.extend(self.policy.plan(&work_item)),
            EventKind::Push => {
                if work_item.is_uninitialized() {
                    ops.extend(self.policy.plan(&work_item));
                }
                if self.hours_per_push > 0.0 {
                    let projected = work_item.with_ops(&ops);
                    ops.extend(effort_ops(&projected, self.hours_per_push));
                    push_hours = Some(self.hours_per_push);
                }
            }
            EventKind::Other => {}
        }
        if ops.is_empty() {
            ops = self.policy.plan(&work_item);
        }

        self.patch_if_any(remote, id, &ops).await?;

        if let Some(hours) = push_hours {
            let applied = work_item.with_ops(&ops);
            let ledger = EffortApplication {
                entity_id: id.to_string(),
                source: EffortSource::Push,
                units: 1,
                hours,
                completed_work: applied.completed_work.unwrap_or_default(),
                remaining_work: applied.remaining_work.unwrap_or_default(),
                applied_at: now,
            };
            tracing::info!(work_item = id, hours, completed_work = ledger.completed_work, "push effort applied");
            if let Err(e) = store.record_application(&ledger) {
                tracing::warn!(work_item = id, error = %e, "failed to write effort ledger");
            }
        }
        Ok(())
    }

    async fn patch_if_any<R>(&self, remote: &R, id: &str, ops: &[PatchOp]) -> Result<()>
    where
        R: RemoteRecordClient + ?Sized,
    {
        if ops.is_empty() {
            tracing::debug!(work_item = id, "nothing to patch");
            return Ok(());
        }
        remote.patch(id, ops).await?;
        Ok(())
    }
}
