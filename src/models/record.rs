//! Per-record types flowing through an import batch
//!
//! A record moves through `Parsed -> Validated -> ReferenceResolved ->
//! Persisted`. Any step may instead end in `Failed`, which keeps the step
//! that failed and the cause.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::entity::{FieldMap, NaturalKey};
use super::value::{EntityId, FieldValue};
use crate::import::RecordError;

/// One input line keyed by normalised header names, in header order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// 1-based line number in the input (header is line 1)
    pub line: usize,
    fields: Vec<(String, String)>,
}

impl SourceRecord {
    pub fn new(line: usize, fields: Vec<(String, String)>) -> Self {
        Self { line, fields }
    }

    /// Raw value of a field, `None` when the header has no such column
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A reference resolved in the second pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredReference {
    /// Input line of the owning record
    pub line: usize,
    /// Natural key of the owning record
    pub owner: NaturalKey,
    /// Column receiving the target's identity
    pub column: String,
    /// Source field the key came from
    pub source_field: String,
    /// Raw natural key of the target
    pub target_key: String,
}

/// Record after coercion, and later after reference resolution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidatedRecord {
    pub line: usize,
    /// Typed column values
    pub values: FieldMap,
    /// Raw reference keys by source field, `None` for null sentinels
    pub references: BTreeMap<String, Option<String>>,
    /// Self references waiting for the second pass
    pub deferred: Vec<DeferredReference>,
    /// Optional references that could not be resolved
    pub warnings: Vec<String>,
}

impl ValidatedRecord {
    pub fn new(line: usize) -> Self {
        Self {
            line,
            ..Default::default()
        }
    }

    pub fn value(&self, column: &str) -> &FieldValue {
        self.values.get(column).unwrap_or(&FieldValue::Null)
    }
}

/// Steps of the per-record pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStep {
    /// Splitting a line into fields
    Read,
    /// Null normalisation, coercion and constraints
    Validate,
    /// Foreign-key lookup by natural key
    Resolve,
    /// Upsert into the persistence service
    Persist,
    /// Second-pass deferred reference update
    Fixup,
}

impl fmt::Display for ImportStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportStep::Read => "read",
            ImportStep::Validate => "validate",
            ImportStep::Resolve => "resolve",
            ImportStep::Persist => "persist",
            ImportStep::Fixup => "fixup",
        };
        write!(f, "{}", name)
    }
}

/// Whether an upsert inserted or modified the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl UpsertOutcome {
    pub fn from_created(created: bool) -> Self {
        if created {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        }
    }
}

/// Per-record state machine
#[derive(Debug, Clone, PartialEq)]
pub enum RecordState {
    Parsed(SourceRecord),
    Validated(ValidatedRecord),
    ReferenceResolved(ValidatedRecord),
    Persisted {
        line: usize,
        id: EntityId,
        outcome: UpsertOutcome,
        deferred: Vec<DeferredReference>,
    },
    Failed {
        line: usize,
        step: ImportStep,
        error: RecordError,
    },
}

impl RecordState {
    pub fn line(&self) -> usize {
        match self {
            RecordState::Parsed(record) => record.line,
            RecordState::Validated(record) | RecordState::ReferenceResolved(record) => record.line,
            RecordState::Persisted { line, .. } | RecordState::Failed { line, .. } => *line,
        }
    }

    /// The step that produces the next state
    pub fn next_step(&self) -> Option<ImportStep> {
        match self {
            RecordState::Parsed(_) => Some(ImportStep::Validate),
            RecordState::Validated(_) => Some(ImportStep::Resolve),
            RecordState::ReferenceResolved(_) => Some(ImportStep::Persist),
            RecordState::Persisted { .. } | RecordState::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next_step().is_none()
    }

    /// Move to `Failed`, recording the step that was being attempted
    pub fn fail(self, error: RecordError) -> Self {
        let line = self.line();
        let step = self.next_step().unwrap_or(ImportStep::Persist);
        RecordState::Failed { line, step, error }
    }
}
