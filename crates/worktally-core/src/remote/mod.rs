//! Remote work-item boundary.
//!
//! The tracker never caches effort totals: every change is computed from a
//! freshly fetched [`RemoteRecord`] and sent back as one multi-field patch.

pub mod ado;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

pub use ado::{AdoClient, AdoSettings};

/// The three work-item fields the tracker reads and writes.
///
/// `None` means the field is absent on the remote, which is different from zero:
/// both effort fields absent marks a work item that was never initialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    pub remaining_work: Option<f64>,
    pub completed_work: Option<f64>,
    pub state: Option<String>,
}

impl RemoteRecord {
    /// Neither effort field has ever been set.
    pub fn is_uninitialized(&self) -> bool {
        self.remaining_work.is_none() && self.completed_work.is_none()
    }

    /// The record as it would read after `ops` were applied.
    pub fn with_ops(&self, ops: &[PatchOp]) -> RemoteRecord {
        let mut next = self.clone();
        for op in ops {
            match (op.field, &op.value) {
                (RecordField::RemainingWork, FieldValue::Number(n)) => next.remaining_work = Some(*n),
                (RecordField::CompletedWork, FieldValue::Number(n)) => next.completed_work = Some(*n),
                (RecordField::State, FieldValue::Text(s)) => next.state = Some(s.clone()),
                _ => {}
            }
        }
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    RemainingWork,
    CompletedWork,
    State,
}

impl RecordField {
    /// Azure DevOps field reference name.
    pub fn reference_name(self) -> &'static str {
        match self {
            RecordField::RemainingWork => "Microsoft.VSTS.Scheduling.RemainingWork",
            RecordField::CompletedWork => "Microsoft.VSTS.Scheduling.CompletedWork",
            RecordField::State => "System.State",
        }
    }

    /// JSON-patch path for the field.
    pub fn patch_path(self) -> String {
        format!("/fields/{}", self.reference_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

/// One field assignment in an ordered patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub field: RecordField,
    pub value: FieldValue,
}

impl PatchOp {
    pub fn number(field: RecordField, value: f64) -> Self {
        Self {
            field,
            value: FieldValue::Number(value),
        }
    }

    pub fn text(field: RecordField, value: impl Into<String>) -> Self {
        Self {
            field,
            value: FieldValue::Text(value.into()),
        }
    }
}

/// Fetches and patches remote work items.
///
/// `patch` must apply all ops or none; Azure DevOps applies a JSON-patch
/// document atomically.
#[async_trait]
pub trait RemoteRecordClient: Send + Sync {
    async fn get(&self, id: &str) -> Result<RemoteRecord, RemoteError>;

    async fn patch(&self, id: &str, ops: &[PatchOp]) -> Result<(), RemoteError>;
}

/// Round to the two decimals Azure DevOps displays.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Move `hours` from remaining to completed work.
///
/// Absent fields count as zero and remaining work never goes negative.
/// Completed comes first, then remaining, both rounded.
pub fn effort_ops(remote: &RemoteRecord, hours: f64) -> [PatchOp; 2] {
    let completed = remote.completed_work.unwrap_or(0.0);
    let remaining = remote.remaining_work.unwrap_or(0.0);
    [
        PatchOp::number(RecordField::CompletedWork, round2(completed + hours)),
        PatchOp::number(RecordField::RemainingWork, round2((remaining - hours).max(0.0))),
    ]
}
