//! SQLite-backed tracking store.
//!
//! Provides persistent storage for:
//! - Tracking records (one per work item, merged field by field)
//! - The ledger of effort applied to remote work items

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{data_dir, migrations};
use crate::error::{Result, StoreError};
use crate::tracking::{RecordPatch, TrackingRecord};

/// Key-value persistence of tracking records.
///
/// `upsert_merge` is the only concurrency control the engine relies on: it
/// must create missing records and touch only the fields the patch sets.
pub trait TrackingStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<TrackingRecord>, StoreError>;

    fn upsert_merge(&self, patch: &RecordPatch) -> Result<(), StoreError>;

    fn scan_all(&self) -> Result<Vec<TrackingRecord>, StoreError>;

    /// Append a successful effort patch to the ledger.
    fn record_application(&self, app: &EffortApplication) -> Result<(), StoreError>;
}

/// Where an effort application came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortSource {
    /// Minutes converted by the reconciliation tick.
    Timer,
    /// Fixed increment applied on a code push.
    Push,
}

impl EffortSource {
    fn as_str(self) -> &'static str {
        match self {
            EffortSource::Timer => "timer",
            EffortSource::Push => "push",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "timer" => Some(EffortSource::Timer),
            "push" => Some(EffortSource::Push),
            _ => None,
        }
    }
}

/// One successful effort patch against a remote work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffortApplication {
    pub entity_id: String,
    pub source: EffortSource,
    pub units: u32,
    pub hours: f64,
    pub completed_work: f64,
    pub remaining_work: f64,
    pub applied_at: DateTime<Utc>,
}

/// SQLite database holding tracking state.
pub struct TrackingDb {
    conn: Mutex<Connection>,
}

/// Fixed-width UTC timestamp; text order equals time order.
pub(crate) fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRecord {
            id: id.to_string(),
            message: format!("bad timestamp '{raw}': {e}"),
        })
}

type RawRecord = (String, bool, i64, String, Option<String>);

fn decode_record(raw: RawRecord) -> Result<TrackingRecord, StoreError> {
    let (id, running, minutes, last_updated, branch_name) = raw;
    let accumulated_minutes = u32::try_from(minutes).map_err(|_| StoreError::CorruptRecord {
        id: id.clone(),
        message: format!("accumulated_minutes out of range: {minutes}"),
    })?;
    let last_updated = parse_ts(&id, &last_updated)?;
    Ok(TrackingRecord {
        id,
        running,
        accumulated_minutes,
        last_updated,
        branch_name,
    })
}

impl TrackingDb {
    /// Open the database at `~/.config/worktally/worktally.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("worktally.db");
        Ok(Self::open_at(&path)?)
    }

    /// Open (or create) a database file at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (tests, dry runs).
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::migrate(&conn).map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Locked)
    }

    /// Most recent ledger entries, newest first.
    pub fn recent_applications(&self, limit: usize) -> Result<Vec<EffortApplication>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT entity_id, source, units, hours, completed_work, remaining_work, applied_at
             FROM effort_log
             ORDER BY applied_at DESC, id DESC
             LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (entity_id, source, units, hours, completed_work, remaining_work, applied_at) = row?;
            let source = EffortSource::parse(&source).ok_or_else(|| StoreError::CorruptRecord {
                id: entity_id.clone(),
                message: format!("unknown effort source '{source}'"),
            })?;
            let applied_at = parse_ts(&entity_id, &applied_at)?;
            out.push(EffortApplication {
                entity_id,
                source,
                units,
                hours,
                completed_work,
                remaining_work,
                applied_at,
            });
        }
        Ok(out)
    }
}

impl TrackingStore for TrackingDb {
    fn get(&self, id: &str) -> Result<Option<TrackingRecord>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT id, running, accumulated_minutes, last_updated, branch_name
                 FROM tracking WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;
        raw.map(decode_record).transpose()
    }

    fn upsert_merge(&self, patch: &RecordPatch) -> Result<(), StoreError> {
        let insert_ts = format_ts(patch.last_updated.unwrap_or_else(Utc::now));
        let update_ts = patch.last_updated.map(format_ts);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tracking (id, running, accumulated_minutes, last_updated, branch_name)
             VALUES (?1, COALESCE(?2, 0), COALESCE(?3, 0), ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                running             = COALESCE(?2, running),
                accumulated_minutes = COALESCE(?3, accumulated_minutes),
                last_updated        = MAX(last_updated, COALESCE(?6, last_updated)),
                branch_name         = COALESCE(?5, branch_name)",
            params![
                patch.id,
                patch.running,
                patch.accumulated_minutes,
                insert_ts,
                patch.branch_name,
                update_ts,
            ],
        )?;
        Ok(())
    }

    fn scan_all(&self) -> Result<Vec<TrackingRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, running, accumulated_minutes, last_updated, branch_name
             FROM tracking ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(decode_record(row?)?);
        }
        Ok(records)
    }

    fn record_application(&self, app: &EffortApplication) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO effort_log
                (entity_id, source, units, hours, completed_work, remaining_work, applied_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                app.entity_id,
                app.source.as_str(),
                app.units,
                app.hours,
                app.completed_work,
                app.remaining_work,
                format_ts(app.applied_at),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    #[test]
    fn get_missing_returns_none() {
        let db = TrackingDb::open_memory().unwrap();
        assert!(db.get("404").unwrap().is_none());
    }

    #[test]
    fn insert_uses_defaults_for_unset_fields() {
        let db = TrackingDb::open_memory().unwrap();
        db.upsert_merge(&RecordPatch::new("1").running(true).last_updated(t0()))
            .unwrap();

        let record = db.get("1").unwrap().unwrap();
        assert!(record.running);
        assert_eq!(record.accumulated_minutes, 0);
        assert_eq!(record.last_updated, t0());
        assert!(record.branch_name.is_none());
    }

    #[test]
    fn merge_preserves_fields_not_in_patch() {
        let db = TrackingDb::open_memory().unwrap();
        db.upsert_merge(
            &RecordPatch::new("1")
                .running(true)
                .accumulated_minutes(42)
                .last_updated(t0())
                .branch_name(Some("refs/heads/feature/AB#1")),
        )
        .unwrap();

        db.upsert_merge(&RecordPatch::new("1").running(false)).unwrap();

        let record = db.get("1").unwrap().unwrap();
        assert!(!record.running);
        assert_eq!(record.accumulated_minutes, 42);
        assert_eq!(record.last_updated, t0());
        assert_eq!(record.branch_name.as_deref(), Some("refs/heads/feature/AB#1"));
    }

    #[test]
    fn last_updated_never_moves_backward() {
        let db = TrackingDb::open_memory().unwrap();
        db.upsert_merge(&RecordPatch::new("1").last_updated(t0())).unwrap();
        db.upsert_merge(&RecordPatch::new("1").last_updated(t0() - Duration::minutes(30)))
            .unwrap();
        assert_eq!(db.get("1").unwrap().unwrap().last_updated, t0());

        let later = t0() + Duration::seconds(90);
        db.upsert_merge(&RecordPatch::new("1").last_updated(later)).unwrap();
        assert_eq!(db.get("1").unwrap().unwrap().last_updated, later);
    }

    #[test]
    fn timestamps_round_trip_with_sub_second_precision() {
        let db = TrackingDb::open_memory().unwrap();
        let at = t0() + Duration::nanoseconds(123_456_789);
        db.upsert_merge(&RecordPatch::new("1").last_updated(at)).unwrap();
        assert_eq!(db.get("1").unwrap().unwrap().last_updated, at);
    }

    #[test]
    fn scan_all_returns_every_record_sorted() {
        let db = TrackingDb::open_memory().unwrap();
        for id in ["30", "10", "20"] {
            db.upsert_merge(&RecordPatch::new(id).last_updated(t0())).unwrap();
        }
        let ids: Vec<String> = db.scan_all().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["10", "20", "30"]);
    }

    #[test]
    fn corrupt_timestamp_is_reported() {
        let db = TrackingDb::open_memory().unwrap();
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO tracking (id, running, accumulated_minutes, last_updated)
                 VALUES ('bad', 1, 0, 'yesterday')",
                [],
            )
            .unwrap();
        assert!(matches!(
            db.get("bad"),
            Err(StoreError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn ledger_lists_newest_first() {
        let db = TrackingDb::open_memory().unwrap();
        for (i, source) in [EffortSource::Timer, EffortSource::Push].into_iter().enumerate() {
            db.record_application(&EffortApplication {
                entity_id: "5".into(),
                source,
                units: 1,
                hours: 1.0,
                completed_work: 1.0 + i as f64,
                remaining_work: 5.0 - i as f64,
                applied_at: t0() + Duration::minutes(i as i64),
            })
            .unwrap();
        }

        let entries = db.recent_applications(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, EffortSource::Push);
        assert_eq!(entries[1].source, EffortSource::Timer);

        assert_eq!(db.recent_applications(1).unwrap().len(), 1);
    }

    #[test]
    fn open_at_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking.db");
        {
            let db = TrackingDb::open_at(&path).unwrap();
            db.upsert_merge(&RecordPatch::new("1").running(true).last_updated(t0()))
                .unwrap();
        }
        let reopened = TrackingDb::open_at(&path).unwrap();
        assert!(reopened.get("1").unwrap().unwrap().running);
    }
}
