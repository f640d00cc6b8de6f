//! # Worktally Core Library
//!
//! Time tracking for Azure DevOps work items. Running time is accumulated
//! locally per work item and converted into whole effort units that are moved
//! from Remaining Work to Completed Work on the remote item. Activity signals
//! (branch creation, pushes) start tracking and initialize work items.
//!
//! ## Architecture
//!
//! - **Tracking**: the per-item record, the pure accumulator and the
//!   start/pause/resume/focus controller
//! - **Storage**: SQLite tracking store with an effort ledger, TOML configuration
//! - **Remote**: the work-item client trait and its Azure DevOps REST implementation
//! - **Reconciliation**: the periodic pass that applies accumulated units
//! - **Ingress**: service-hook payload decoding and per-item event handling
//!
//! ## Key Components
//!
//! - [`Accumulator`]: minutes to effort units with a carried remainder
//! - [`ReconciliationEngine`]: one tick over every tracked item
//! - [`ActivationPolicy`]: first-time initialization and state transition
//! - [`TrackingController`]: running-flag transitions
//! - [`TrackingDb`]: persistence behind the [`TrackingStore`] trait
//! - [`AdoClient`]: [`RemoteRecordClient`] over the Azure DevOps REST API

pub mod activation;
pub mod error;
pub mod ingress;
pub mod reconciliation;
pub mod remote;
pub mod report;
pub mod storage;
pub mod tracking;

pub use activation::{ActivationPolicy, ActivationStatus};
pub use error::{ConfigError, CoreError, RemoteError, StoreError};
pub use ingress::{ActivityEvent, ActivityProcessor, EventKind};
pub use reconciliation::{
    EntityOutcome, ReconciledEntity, ReconciliationConfig, ReconciliationEngine, TickReport,
};
pub use remote::{AdoClient, AdoSettings, PatchOp, RecordField, RemoteRecord, RemoteRecordClient};
pub use report::{BatchReport, EntityFailure};
pub use storage::{Config, EffortApplication, EffortSource, TrackingDb, TrackingStore};
pub use tracking::{
    Accumulation, Accumulator, FocusOutcome, RecordPatch, TrackingController, TrackingRecord,
    TrackingState,
};
