//! Per-entity batch results.
//!
//! A failing entity never aborts its siblings; it becomes an [`EntityFailure`]
//! in the batch report instead.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub id: String,
    pub error: String,
}

impl EntityFailure {
    pub fn new(id: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            id: id.into(),
            error: error.to_string(),
        }
    }
}

/// Outcome of a batch of per-entity operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed: Vec<String>,
    pub failures: Vec<EntityFailure>,
}

impl BatchReport {
    pub fn succeeded(&mut self, id: impl Into<String>) {
        self.processed.push(id.into());
    }

    pub fn failed(&mut self, id: impl Into<String>, error: impl std::fmt::Display) {
        self.failures.push(EntityFailure::new(id, error));
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}
