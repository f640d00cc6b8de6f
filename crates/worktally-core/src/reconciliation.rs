//! Periodic reconciliation of tracked time into remote effort fields.
//!
//! One pass ("tick") scans every tracking record, runs the accumulator, and for
//! records with whole units ready fetches the work item and patches completed
//! and remaining work in a single update.
//!
//! ## Failure handling
//! Each record is processed on its own. A failed fetch or patch (including a
//! per-entity timeout) is logged and reported, the record's timestamp still
//! advances, and the minutes that were about to be converted stay in the
//! record so the next tick tries again. Only a failed store scan aborts the
//! pass.
//!
//! Once a patch went through, the record write is retried. If it still
//! fails the entity is reported as applied with a store warning, since the
//! remote already holds the hours.
//!
//! ## Usage
//! ```rust,ignore
//! let engine = ReconciliationEngine::from_config(&config);
//! let report = engine.tick(&db, &client, Utc::now()).await?;
//! println!("{} applied, {} failed", report.applied_count(), report.failures.len());
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activation::ActivationPolicy;
use crate::error::{RemoteError, StoreError};
use crate::remote::{effort_ops, round2, RemoteRecordClient};
use crate::report::EntityFailure;
use crate::storage::{Config, EffortApplication, EffortSource, TrackingStore};
use crate::tracking::{Accumulation, Accumulator, TrackingRecord};

/// Default bound on one entity's remote round trips.
pub const DEFAULT_ENTITY_TIMEOUT_SECS: u64 = 45;

/// Record writes attempted after the remote step.
const COMMIT_ATTEMPTS: u32 = 3;

/// Tunables for a reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Running minutes per effort unit (division and modulus).
    pub threshold_minutes: u32,
    /// Hours applied per effort unit.
    pub unit_hours: f64,
    /// Upper bound for fetch + patch of one entity.
    pub entity_timeout_secs: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            threshold_minutes: crate::tracking::DEFAULT_THRESHOLD_MINUTES,
            unit_hours: 1.0,
            entity_timeout_secs: DEFAULT_ENTITY_TIMEOUT_SECS,
        }
    }
}

impl ReconciliationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            threshold_minutes: cfg.effort.conversion_threshold_minutes,
            unit_hours: cfg.effort.unit_hours,
            entity_timeout_secs: cfg.schedule.entity_timeout_secs,
        }
    }

    pub fn with_threshold(mut self, minutes: u32) -> Self {
        self.threshold_minutes = minutes.max(1);
        self
    }

    pub fn with_unit_hours(mut self, hours: f64) -> Self {
        self.unit_hours = hours;
        self
    }

    pub fn with_entity_timeout(mut self, secs: u64) -> Self {
        self.entity_timeout_secs = secs.max(1);
        self
    }

    pub fn entity_timeout(&self) -> Duration {
        Duration::from_secs(self.entity_timeout_secs)
    }
}

/// What happened to one record during a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntityOutcome {
    /// Paused, skewed, or less than a minute since the last observation.
    Idle,
    /// Minutes added, not yet a whole unit.
    Accrued { minutes: u32 },
    /// Units converted and patched onto the work item.
    Applied {
        units: u32,
        hours: f64,
        completed_work: f64,
        remaining_work: f64,
    },
    /// The work item had no effort fields; it was initialized instead and the
    /// minutes are held for the next tick.
    Activated { ops: usize },
    /// Fetch, patch or store write failed; minutes held for the next tick.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledEntity {
    pub id: String,
    #[serde(flatten)]
    pub outcome: EntityOutcome,
    /// Minutes carried in the record after this tick.
    pub accumulated_minutes: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub clock_skew: bool,
    /// Effort was applied remotely but the record could not be persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_warning: Option<String>,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    pub observed_at: DateTime<Utc>,
    pub scanned: usize,
    pub entities: Vec<ReconciledEntity>,
    pub failures: Vec<EntityFailure>,
}

impl TickReport {
    pub fn succeeded_count(&self) -> usize {
        self.scanned - self.failures.len()
    }

    pub fn applied_count(&self) -> usize {
        self.entities
            .iter()
            .filter(|e| matches!(e.outcome, EntityOutcome::Applied { .. }))
            .count()
    }

    pub fn applied_hours(&self) -> f64 {
        round2(
            self.entities
                .iter()
                .map(|e| match e.outcome {
                    EntityOutcome::Applied { hours, .. } => hours,
                    _ => 0.0,
                })
                .sum(),
        )
    }
}

/// Remote side of one entity's tick.
enum RemoteStep {
    Applied { completed_work: f64, remaining_work: f64 },
    Activated { ops: usize },
}

/// Orchestrates accumulator, activation policy and remote patches.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    config: ReconciliationConfig,
    accumulator: Accumulator,
    policy: ActivationPolicy,
}

impl ReconciliationEngine {
    pub fn new(config: ReconciliationConfig, policy: ActivationPolicy) -> Self {
        let accumulator = Accumulator::new(config.threshold_minutes);
        Self {
            config,
            accumulator,
            policy,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            ReconciliationConfig::from_config(cfg),
            ActivationPolicy::from_config(cfg),
        )
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Run one pass over every record in `store`.
    ///
    /// # Errors
    /// Only when the store cannot be scanned; per-entity problems are reported
    /// in [`TickReport::failures`].
    pub async fn tick<S, R>(
        &self,
        store: &S,
        remote: &R,
        now: DateTime<Utc>,
    ) -> Result<TickReport, StoreError>
    where
        S: TrackingStore + ?Sized,
        R: RemoteRecordClient + ?Sized,
    {
        let records = store.scan_all()?;
        let mut report = TickReport {
            observed_at: now,
            scanned: records.len(),
            entities: Vec::with_capacity(records.len()),
            failures: Vec::new(),
        };

        for record in &records {
            let entity = self.reconcile_entity(store, remote, record, now).await;
            if let EntityOutcome::Failed { error } = &entity.outcome {
                report.failures.push(EntityFailure::new(&entity.id, error));
            }
            report.entities.push(entity);
        }

        tracing::info!(
            scanned = report.scanned,
            applied = report.applied_count(),
            hours = report.applied_hours(),
            failed = report.failures.len(),
            "reconciliation tick finished"
        );
        Ok(report)
    }

    /// Process one record; never returns an error, failures become outcomes.
    pub async fn reconcile_entity<S, R>(
        &self,
        store: &S,
        remote: &R,
        record: &TrackingRecord,
        now: DateTime<Utc>,
    ) -> ReconciledEntity
    where
        S: TrackingStore + ?Sized,
        R: RemoteRecordClient + ?Sized,
    {
        let acc = self.accumulator.accumulate(record, now);
        if acc.clock_skew {
            tracing::warn!(
                work_item = %record.id,
                last_updated = %record.last_updated,
                %now,
                "observation earlier than stored timestamp, counting zero minutes"
            );
        }

        if !acc.has_units() {
            let outcome = if acc.elapsed_minutes > 0 {
                tracing::debug!(work_item = %record.id, minutes = acc.elapsed_minutes, "accrued");
                EntityOutcome::Accrued {
                    minutes: acc.elapsed_minutes,
                }
            } else {
                EntityOutcome::Idle
            };
            return self.commit(store, &acc, outcome, false);
        }

        let hours = round2(f64::from(acc.units) * self.config.unit_hours);
        let step = tokio::time::timeout(
            self.config.entity_timeout(),
            self.apply_remote(remote, &record.id, hours),
        )
        .await
        .unwrap_or(Err(RemoteError::Timeout {
            secs: self.config.entity_timeout_secs,
        }));

        match step {
            Ok(RemoteStep::Applied {
                completed_work,
                remaining_work,
            }) => {
                tracing::info!(
                    work_item = %record.id,
                    units = acc.units,
                    hours,
                    completed_work,
                    remaining_work,
                    "effort applied"
                );
                let ledger = EffortApplication {
                    entity_id: record.id.clone(),
                    source: EffortSource::Timer,
                    units: acc.units,
                    hours,
                    completed_work,
                    remaining_work,
                    applied_at: now,
                };
                if let Err(e) = store.record_application(&ledger) {
                    tracing::warn!(work_item = %record.id, error = %e, "failed to write effort ledger");
                }
                let outcome = EntityOutcome::Applied {
                    units: acc.units,
                    hours,
                    completed_work,
                    remaining_work,
                };
                self.commit(store, &acc, outcome, false)
            }
            Ok(RemoteStep::Activated { ops }) => {
                tracing::info!(work_item = %record.id, ops, "work item initialized, minutes held");
                self.commit(store, &acc, EntityOutcome::Activated { ops }, true)
            }
            Err(e) => {
                tracing::warn!(work_item = %record.id, units = acc.units, error = %e, "failed to apply effort");
                let outcome = EntityOutcome::Failed {
                    error: e.to_string(),
                };
                self.commit(store, &acc, outcome, true)
            }
        }
    }

    async fn apply_remote<R>(&self, remote: &R, id: &str, hours: f64) -> Result<RemoteStep, RemoteError>
    where
        R: RemoteRecordClient + ?Sized,
    {
        let work_item = remote.get(id).await?;

        if work_item.is_uninitialized() {
            let ops = self.policy.plan(&work_item);
            remote.patch(id, &ops).await?;
            return Ok(RemoteStep::Activated { ops: ops.len() });
        }

        let ops = effort_ops(&work_item, hours);
        remote.patch(id, &ops).await?;
        let applied = work_item.with_ops(&ops);
        Ok(RemoteStep::Applied {
            completed_work: applied.completed_work.unwrap_or_default(),
            remaining_work: applied.remaining_work.unwrap_or_default(),
        })
    }

    /// Persist the record after the remote step. `defer` keeps the unconverted
    /// minutes; otherwise only the remainder is kept.
    fn commit<S>(
        &self,
        store: &S,
        acc: &Accumulation,
        outcome: EntityOutcome,
        defer: bool,
    ) -> ReconciledEntity
    where
        S: TrackingStore + ?Sized,
    {
        let patch = if defer { acc.deferred() } else { acc.committed() };
        let accumulated_minutes = patch.accumulated_minutes.unwrap_or(acc.pending_minutes);

        let mut attempt = 1;
        let written = loop {
            match store.upsert_merge(&patch) {
                Ok(()) => break Ok(()),
                Err(e) if attempt < COMMIT_ATTEMPTS => {
                    tracing::warn!(work_item = %acc.id, attempt, error = %e, "tracking record write failed, retrying");
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        let (outcome, store_warning) = match written {
            Ok(()) => (outcome, None),
            Err(e) if matches!(outcome, EntityOutcome::Applied { .. }) => {
                tracing::error!(
                    work_item = %acc.id,
                    units = acc.units,
                    error = %e,
                    "effort applied but tracking record not persisted, the next tick may apply it again"
                );
                (outcome, Some(format!("store write failed: {e}")))
            }
            Err(e) => {
                tracing::error!(work_item = %acc.id, error = %e, "failed to persist tracking record");
                let outcome = EntityOutcome::Failed {
                    error: format!("store write failed: {e}"),
                };
                (outcome, None)
            }
        };

        ReconciledEntity {
            id: acc.id.clone(),
            outcome,
            accumulated_minutes,
            clock_skew: acc.clock_skew,
            store_warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{PatchOp, RecordField, RemoteRecord};
    use crate::storage::TrackingDb;
    use crate::tracking::RecordPatch;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    /// In-memory work items with scripted failures.
    #[derive(Default)]
    struct FakeRemote {
        items: Mutex<HashMap<String, RemoteRecord>>,
        fail_get: HashSet<String>,
        fail_patch: HashSet<String>,
        hang: HashSet<String>,
        patches: Mutex<Vec<(String, Vec<PatchOp>)>>,
    }

    impl FakeRemote {
        fn with_item(self, id: &str, remaining: Option<f64>, completed: Option<f64>, state: &str) -> Self {
            self.items.lock().unwrap().insert(
                id.to_string(),
                RemoteRecord {
                    id: id.to_string(),
                    remaining_work: remaining,
                    completed_work: completed,
                    state: Some(state.to_string()),
                },
            );
            self
        }

        fn item(&self, id: &str) -> RemoteRecord {
            self.items.lock().unwrap()[id].clone()
        }

        fn patch_count(&self) -> usize {
            self.patches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RemoteRecordClient for FakeRemote {
        async fn get(&self, id: &str) -> Result<RemoteRecord, RemoteError> {
            if self.hang.contains(id) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.fail_get.contains(id) {
                return Err(RemoteError::Status {
                    status: 503,
                    url: format!("fake://{id}"),
                    body: "unavailable".into(),
                });
            }
            self.items
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| RemoteError::Decode(format!("no item {id}")))
        }

        async fn patch(&self, id: &str, ops: &[PatchOp]) -> Result<(), RemoteError> {
            if self.fail_patch.contains(id) {
                return Err(RemoteError::Status {
                    status: 400,
                    url: format!("fake://{id}"),
                    body: "rule violation".into(),
                });
            }
            let mut items = self.items.lock().unwrap();
            let current = items.get(id).cloned().unwrap_or_default();
            items.insert(id.to_string(), current.with_ops(ops));
            self.patches.lock().unwrap().push((id.to_string(), ops.to_vec()));
            Ok(())
        }
    }

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::from_config(&Config::default())
    }

    fn seed(db: &TrackingDb, id: &str, running: bool, minutes: u32) {
        db.upsert_merge(
            &RecordPatch::new(id)
                .running(running)
                .accumulated_minutes(minutes)
                .last_updated(t0()),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn sixty_five_minutes_applies_one_hour() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", true, 0);
        let remote = FakeRemote::default().with_item("1", Some(4.0), Some(2.0), "Active");

        let report = engine()
            .tick(&db, &remote, t0() + ChronoDuration::minutes(65))
            .await
            .unwrap();

        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.applied_hours(), 1.0);
        assert!(report.failures.is_empty());
        assert_eq!(remote.item("1").completed_work, Some(3.0));
        assert_eq!(remote.item("1").remaining_work, Some(3.0));

        let record = db.get("1").unwrap().unwrap();
        assert_eq!(record.accumulated_minutes, 5);
        assert_eq!(record.last_updated, t0() + ChronoDuration::minutes(65));

        let ledger = db.recent_applications(5).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].source, EffortSource::Timer);
        assert_eq!(ledger[0].completed_work, 3.0);
    }

    #[tokio::test]
    async fn paused_record_is_untouched_remotely() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", false, 30);
        let remote = FakeRemote::default().with_item("1", Some(4.0), Some(2.0), "Active");
        let now = t0() + ChronoDuration::hours(3);

        let report = engine().tick(&db, &remote, now).await.unwrap();

        assert_eq!(report.entities[0].outcome, EntityOutcome::Idle);
        assert_eq!(remote.patch_count(), 0);
        let record = db.get("1").unwrap().unwrap();
        assert_eq!(record.accumulated_minutes, 30);
        assert_eq!(record.last_updated, now);
    }

    #[tokio::test]
    async fn below_threshold_only_accrues() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", true, 10);
        let remote = FakeRemote::default();

        let report = engine()
            .tick(&db, &remote, t0() + ChronoDuration::minutes(20))
            .await
            .unwrap();

        assert_eq!(report.entities[0].outcome, EntityOutcome::Accrued { minutes: 20 });
        assert_eq!(db.get("1").unwrap().unwrap().accumulated_minutes, 30);
        assert_eq!(remote.patch_count(), 0);
    }

    #[tokio::test]
    async fn failed_patch_keeps_minutes_for_retry() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", true, 0);
        seed(&db, "2", true, 0);
        let mut remote = FakeRemote::default()
            .with_item("1", Some(4.0), Some(2.0), "Active")
            .with_item("2", Some(8.0), Some(0.0), "Active");
        remote.fail_patch.insert("1".into());
        let now = t0() + ChronoDuration::minutes(70);

        let report = engine().tick(&db, &remote, now).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "1");
        assert_eq!(report.succeeded_count(), 1);
        assert_eq!(remote.item("2").completed_work, Some(1.0));

        let failed = db.get("1").unwrap().unwrap();
        assert_eq!(failed.accumulated_minutes, 70);
        assert_eq!(failed.last_updated, now);

        // Recovery: the held minutes are applied on the next tick.
        remote.fail_patch.clear();
        let report = engine()
            .tick(&db, &remote, now + ChronoDuration::minutes(5))
            .await
            .unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(remote.item("1").completed_work, Some(3.0));
        assert_eq!(db.get("1").unwrap().unwrap().accumulated_minutes, 15);
    }

    #[tokio::test]
    async fn failed_fetch_is_isolated() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", true, 0);
        seed(&db, "2", true, 0);
        let mut remote = FakeRemote::default().with_item("2", Some(1.0), Some(1.0), "Active");
        remote.fail_get.insert("1".into());

        let report = engine()
            .tick(&db, &remote, t0() + ChronoDuration::minutes(60))
            .await
            .unwrap();

        assert!(matches!(report.entities[0].outcome, EntityOutcome::Failed { .. }));
        assert_eq!(report.applied_count(), 1);
        assert_eq!(remote.item("2").remaining_work, Some(0.0));
        assert_eq!(db.get("1").unwrap().unwrap().accumulated_minutes, 60);
    }

    #[tokio::test]
    async fn hung_remote_times_out_without_blocking_others() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", true, 0);
        seed(&db, "2", true, 0);
        let mut remote = FakeRemote::default()
            .with_item("1", Some(4.0), Some(0.0), "Active")
            .with_item("2", Some(4.0), Some(0.0), "Active");
        remote.hang.insert("1".into());

        let engine = ReconciliationEngine::new(
            ReconciliationConfig::new().with_entity_timeout(1),
            ActivationPolicy::from_config(&Config::default()),
        );
        let report = engine
            .tick(&db, &remote, t0() + ChronoDuration::minutes(60))
            .await
            .unwrap();

        assert!(report.failures[0].error.contains("timed out"));
        assert_eq!(remote.item("2").completed_work, Some(1.0));
    }

    #[tokio::test]
    async fn uninitialized_item_is_activated_and_minutes_held() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", true, 0);
        let remote = FakeRemote::default().with_item("1", None, None, "New");

        let report = engine()
            .tick(&db, &remote, t0() + ChronoDuration::minutes(60))
            .await
            .unwrap();
        assert_eq!(report.entities[0].outcome, EntityOutcome::Activated { ops: 3 });
        assert_eq!(remote.item("1").remaining_work, Some(6.0));
        assert_eq!(remote.item("1").completed_work, Some(0.0));
        assert_eq!(remote.item("1").state.as_deref(), Some("Active"));
        assert_eq!(db.get("1").unwrap().unwrap().accumulated_minutes, 60);

        engine()
            .tick(&db, &remote, t0() + ChronoDuration::minutes(61))
            .await
            .unwrap();
        assert_eq!(remote.item("1").completed_work, Some(1.0));
        assert_eq!(remote.item("1").remaining_work, Some(5.0));
        assert_eq!(db.get("1").unwrap().unwrap().accumulated_minutes, 1);
    }

    #[tokio::test]
    async fn multiple_units_in_one_patch() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", true, 50);
        let remote = FakeRemote::default().with_item("1", Some(10.0), Some(0.0), "Active");
        let engine = ReconciliationEngine::new(
            ReconciliationConfig::new().with_threshold(30).with_unit_hours(0.5),
            ActivationPolicy::from_config(&Config::default()),
        );

        engine
            .tick(&db, &remote, t0() + ChronoDuration::minutes(45))
            .await
            .unwrap();

        let patches = remote.patches.lock().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(
            patches[0].1,
            vec![
                PatchOp::number(RecordField::CompletedWork, 1.5),
                PatchOp::number(RecordField::RemainingWork, 8.5),
            ]
        );
        assert_eq!(db.get("1").unwrap().unwrap().accumulated_minutes, 5);
    }

    #[tokio::test]
    async fn clock_skew_is_flagged_not_failed() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", true, 12);
        let remote = FakeRemote::default();

        let report = engine()
            .tick(&db, &remote, t0() - ChronoDuration::minutes(2))
            .await
            .unwrap();

        assert!(report.entities[0].clock_skew);
        assert_eq!(report.entities[0].outcome, EntityOutcome::Idle);
        assert!(report.failures.is_empty());
        let record = db.get("1").unwrap().unwrap();
        assert_eq!(record.accumulated_minutes, 12);
        assert_eq!(record.last_updated, t0());
    }

    #[tokio::test]
    async fn empty_store_is_an_empty_report() {
        let db = TrackingDb::open_memory().unwrap();
        let report = engine().tick(&db, &FakeRemote::default(), t0()).await.unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(report.succeeded_count(), 0);
    }

    #[test]
    fn report_serializes_flat_outcomes() {
        let entity = ReconciledEntity {
            id: "1".into(),
            outcome: EntityOutcome::Accrued { minutes: 5 },
            accumulated_minutes: 5,
            clock_skew: false,
            store_warning: None,
        };
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["outcome"], "accrued");
        assert_eq!(json["minutes"], 5);
        assert!(json.get("clock_skew").is_none());
        assert!(json.get("store_warning").is_none());
    }

    /// Store whose next `failing_writes` record writes fail.
    struct FlakyStore {
        inner: TrackingDb,
        failing_writes: Mutex<u32>,
    }

    impl FlakyStore {
        fn new(inner: TrackingDb, failing_writes: u32) -> Self {
            Self {
                inner,
                failing_writes: Mutex::new(failing_writes),
            }
        }
    }

    impl TrackingStore for FlakyStore {
        fn get(&self, id: &str) -> Result<Option<TrackingRecord>, StoreError> {
            self.inner.get(id)
        }

        fn upsert_merge(&self, patch: &RecordPatch) -> Result<(), StoreError> {
            let mut failing = self.failing_writes.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(StoreError::Locked);
            }
            self.inner.upsert_merge(patch)
        }

        fn scan_all(&self) -> Result<Vec<TrackingRecord>, StoreError> {
            self.inner.scan_all()
        }

        fn record_application(&self, app: &EffortApplication) -> Result<(), StoreError> {
            self.inner.record_application(app)
        }
    }

    #[tokio::test]
    async fn write_failure_after_patch_is_retried_not_reapplied() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", true, 0);
        let store = FlakyStore::new(db, 1);
        let remote = FakeRemote::default().with_item("1", Some(4.0), Some(2.0), "Active");

        let report = engine()
            .tick(&store, &remote, t0() + ChronoDuration::minutes(65))
            .await
            .unwrap();
        assert_eq!(report.applied_count(), 1);
        assert!(report.entities[0].store_warning.is_none());
        assert_eq!(store.get("1").unwrap().unwrap().accumulated_minutes, 5);

        let report = engine()
            .tick(&store, &remote, t0() + ChronoDuration::minutes(70))
            .await
            .unwrap();
        assert_eq!(report.entities[0].outcome, EntityOutcome::Accrued { minutes: 5 });
        assert_eq!(remote.patch_count(), 1);
        assert_eq!(remote.item("1").completed_work, Some(3.0));
    }

    #[tokio::test]
    async fn persistent_write_failure_after_patch_still_reports_applied() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", true, 0);
        let store = FlakyStore::new(db, COMMIT_ATTEMPTS);
        let remote = FakeRemote::default().with_item("1", Some(4.0), Some(2.0), "Active");

        let report = engine()
            .tick(&store, &remote, t0() + ChronoDuration::minutes(65))
            .await
            .unwrap();

        assert!(report.failures.is_empty());
        assert!(matches!(report.entities[0].outcome, EntityOutcome::Applied { units: 1, .. }));
        let warning = report.entities[0].store_warning.as_deref().unwrap();
        assert!(warning.contains("locked"));
    }

    #[tokio::test]
    async fn write_failure_without_patch_is_a_failure() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", true, 0);
        let store = FlakyStore::new(db, COMMIT_ATTEMPTS);

        let report = engine()
            .tick(&store, &FakeRemote::default(), t0() + ChronoDuration::minutes(10))
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("store write failed"));
    }

    #[tokio::test]
    async fn leftover_seconds_survive_real_tick_cadence() {
        let db = TrackingDb::open_memory().unwrap();
        seed(&db, "1", true, 0);
        let remote = FakeRemote::default().with_item("1", Some(10.0), Some(0.0), "Active");
        let step = ChronoDuration::milliseconds(299_999);

        let mut now = t0();
        for _ in 0..24 {
            now += step;
            engine().tick(&db, &remote, now).await.unwrap();
        }

        assert_eq!(remote.item("1").completed_work, Some(1.0));
        assert_eq!(db.get("1").unwrap().unwrap().accumulated_minutes, 59);
    }
}
