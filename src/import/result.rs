//! Batch import counters

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::RecordFailure;
use crate::models::{ImportStep, UpsertOutcome};

/// Outcome of importing one file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[must_use = "batch results should be reported or checked for failures"]
pub struct BatchResult {
    pub entity: String,
    /// Data rows read, malformed ones included
    pub rows_read: usize,
    pub created: usize,
    pub updated: usize,
    /// Records excluded from the batch because they failed
    pub skipped: usize,
    pub failures: Vec<RecordFailure>,
    /// Failures tallied by error kind
    pub error_counts: BTreeMap<String, usize>,
    /// Deferred references set in the second pass
    pub deferred_resolved: usize,
    /// Optional references left null because their target was missing
    pub warnings: usize,
    /// Whether the batch's writes reached the database
    pub committed: bool,
}

impl BatchResult {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Default::default()
        }
    }

    pub fn record_outcome(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }

    /// Tally a failure; records failing a second-pass fixup stay persisted
    pub fn record_failure(&mut self, failure: RecordFailure) {
        if failure.step != ImportStep::Fixup {
            self.skipped += 1;
        }
        *self
            .error_counts
            .entry(failure.error.kind().to_string())
            .or_default() += 1;
        self.failures.push(failure);
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Records written in the first pass
    pub fn persisted(&self) -> usize {
        self.created + self.updated
    }
}

impl fmt::Display for BatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Import summary for {}:", self.entity)?;
        writeln!(f, "  Rows read: {}", self.rows_read)?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Skipped: {}", self.skipped)?;
        if self.deferred_resolved > 0 {
            writeln!(f, "  Deferred references resolved: {}", self.deferred_resolved)?;
        }
        if self.warnings > 0 {
            writeln!(f, "  Warnings: {}", self.warnings)?;
        }
        if !self.error_counts.is_empty() {
            writeln!(f, "  Errors by kind:")?;
            for (kind, count) in &self.error_counts {
                writeln!(f, "    {}: {}", kind, count)?;
            }
        }
        write!(
            f,
            "  Committed: {}",
            if self.committed { "yes" } else { "no" }
        )
    }
}
