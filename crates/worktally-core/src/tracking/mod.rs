//! Local time accounting: records, the accumulator and control transitions.

pub mod accumulator;
pub mod controller;
pub mod record;

pub use accumulator::{Accumulation, Accumulator, DEFAULT_THRESHOLD_MINUTES};
pub use controller::{FocusOutcome, TrackingController};
pub use record::{RecordPatch, TrackingRecord, TrackingState};
