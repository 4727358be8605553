//! Persisted entities and natural keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::value::{EntityId, FieldValue};

/// Column name to value mapping written by an upsert
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Business identifier of an entity, possibly composite
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey(Vec<(String, FieldValue)>);

impl NaturalKey {
    pub fn new(parts: Vec<(String, FieldValue)>) -> Self {
        Self(parts)
    }

    /// Key made of a single column
    pub fn single(column: impl Into<String>, value: FieldValue) -> Self {
        Self(vec![(column.into(), value)])
    }

    pub fn parts(&self) -> &[(String, FieldValue)] {
        &self.0
    }

    /// Check whether `fields` holds exactly this key's values
    pub fn matches(&self, fields: &FieldMap) -> bool {
        self.0
            .iter()
            .all(|(column, value)| fields.get(column) == Some(value))
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .0
            .iter()
            .map(|(column, value)| format!("{}={}", column, value))
            .collect();
        write!(f, "{}", rendered.join(","))
    }
}

/// A record as held by the persistence service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Surrogate identity
    pub id: EntityId,
    /// Schema name (e.g. "employees")
    pub entity: String,
    /// Column values, natural key columns included
    pub fields: FieldMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn get(&self, column: &str) -> &FieldValue {
        self.fields.get(column).unwrap_or(&FieldValue::Null)
    }
}
