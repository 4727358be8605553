//! Typed field values and column kinds

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Surrogate identity assigned by the persistence service
pub type EntityId = i64;

/// Storage format for dates
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Storage format for timestamps
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column kind of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    /// Surrogate id of another entity
    Reference,
}

impl FieldKind {
    /// SQL column type used by database backends
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Text => "VARCHAR",
            FieldKind::Integer | FieldKind::Reference => "BIGINT",
            FieldKind::Decimal => "DECIMAL(12,2)",
            FieldKind::Boolean => "BOOLEAN",
            FieldKind::Date => "DATE",
            FieldKind::DateTime => "TIMESTAMP",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Decimal => "decimal",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::DateTime => "datetime",
            FieldKind::Reference => "reference",
        };
        write!(f, "{}", name)
    }
}

/// A single typed value of a record or persisted entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Reference(EntityId),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Decimal(d) => Some(*d),
            FieldValue::Integer(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<EntityId> {
        match self {
            FieldValue::Reference(id) => Some(*id),
            _ => None,
        }
    }

    /// Canonical text form used when binding parameters to SQL
    ///
    /// Every kind round-trips through [`FieldValue::from_storage`].
    pub fn to_storage(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Integer(i) => Some(i.to_string()),
            FieldValue::Decimal(d) => Some(d.normalize().to_string()),
            FieldValue::Boolean(b) => Some(b.to_string()),
            FieldValue::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
            FieldValue::DateTime(dt) => Some(dt.format(DATETIME_FORMAT).to_string()),
            FieldValue::Reference(id) => Some(id.to_string()),
        }
    }

    /// Rebuild a value of `kind` from its stored text form
    pub fn from_storage(kind: FieldKind, raw: Option<&str>) -> Result<Self, String> {
        let Some(raw) = raw else {
            return Ok(FieldValue::Null);
        };
        match kind {
            FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
            FieldKind::Integer => raw
                .parse()
                .map(FieldValue::Integer)
                .map_err(|e| format!("invalid stored integer '{}': {}", raw, e)),
            FieldKind::Reference => raw
                .parse()
                .map(FieldValue::Reference)
                .map_err(|e| format!("invalid stored reference '{}': {}", raw, e)),
            FieldKind::Decimal => Decimal::from_str(raw)
                .map(|d| FieldValue::Decimal(d.normalize()))
                .map_err(|e| format!("invalid stored decimal '{}': {}", raw, e)),
            FieldKind::Boolean => match raw {
                "true" => Ok(FieldValue::Boolean(true)),
                "false" => Ok(FieldValue::Boolean(false)),
                other => Err(format!("invalid stored boolean '{}'", other)),
            },
            FieldKind::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map(FieldValue::Date)
                .map_err(|e| format!("invalid stored date '{}': {}", raw, e)),
            FieldKind::DateTime => NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
                .map(FieldValue::DateTime)
                .map_err(|e| format!("invalid stored timestamp '{}': {}", raw, e)),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_storage() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "null"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        FieldValue::Decimal(value.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_round_trip_keeps_kind() {
        let values = [
            (FieldKind::Text, FieldValue::from("Chai")),
            (FieldKind::Integer, FieldValue::Integer(42)),
            (
                FieldKind::Decimal,
                FieldValue::from(Decimal::from_str("18.50").unwrap()),
            ),
            (FieldKind::Boolean, FieldValue::Boolean(true)),
            (
                FieldKind::Date,
                FieldValue::Date(NaiveDate::from_ymd_opt(1996, 7, 4).unwrap()),
            ),
            (FieldKind::Reference, FieldValue::Reference(7)),
        ];

        for (kind, value) in values {
            let stored = value.to_storage();
            let restored = FieldValue::from_storage(kind, stored.as_deref()).unwrap();
            assert_eq!(restored, value, "kind {}", kind);
        }
    }

    #[test]
    fn test_decimal_storage_is_normalized() {
        let a = FieldValue::from(Decimal::from_str("18.00").unwrap());
        let b = FieldValue::from_storage(FieldKind::Decimal, Some("18")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_null_from_storage() {
        assert_eq!(
            FieldValue::from_storage(FieldKind::Date, None).unwrap(),
            FieldValue::Null
        );
        assert!(FieldValue::from_storage(FieldKind::Boolean, Some("maybe")).is_err());
    }
}
