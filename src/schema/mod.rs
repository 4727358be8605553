//! Explicit schema descriptors for importable entities
//!
//! An [`EntitySchema`] names the entity's natural key, its typed fields and
//! its references to other entities. The importer, the header validator and
//! the database backends are all driven from these descriptors.

pub mod catalog;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{FieldKind, FieldValue};

pub use catalog::Catalog;

/// Value constraint checked after coercion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Constraint {
    /// Maximum number of characters of a text value
    MaxLength(usize),
    /// Inclusive lower bound of a numeric value
    Min(Decimal),
    /// Inclusive upper bound of a numeric value
    Max(Decimal),
    /// Text value must be one of the listed choices
    OneOf(&'static [&'static str]),
    /// Decimal value must fit a column of this precision and scale
    Digits { precision: u32, scale: u32 },
}

/// Fill a null field from a field of a resolved reference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fallback {
    /// Reference column holding the related entity
    pub reference: &'static str,
    /// Field of the related entity to copy
    pub field: &'static str,
    /// Used when the related field is null as well
    pub otherwise: FieldValue,
}

/// A scalar column populated from the input field of the same name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Header must contain the field and the value must not be null
    pub required: bool,
    /// Value used when the input is null
    pub default: Option<FieldValue>,
    pub constraints: Vec<Constraint>,
    /// No two entities may share a non-null value
    pub unique: bool,
    pub fallback: Option<Fallback>,
}

impl FieldSpec {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            constraints: Vec::new(),
            unique: false,
            fallback: None,
        }
    }

    pub fn text(name: &'static str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn integer(name: &'static str) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn decimal(name: &'static str) -> Self {
        Self::new(name, FieldKind::Decimal)
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn date(name: &'static str) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn datetime(name: &'static str) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.constraints.push(Constraint::MaxLength(max));
        self
    }

    pub fn min(mut self, min: i64) -> Self {
        self.constraints.push(Constraint::Min(Decimal::from(min)));
        self
    }

    pub fn max(mut self, max: i64) -> Self {
        self.constraints.push(Constraint::Max(Decimal::from(max)));
        self
    }

    pub fn digits(mut self, precision: u32, scale: u32) -> Self {
        self.constraints.push(Constraint::Digits { precision, scale });
        self
    }

    pub fn one_of(mut self, choices: &'static [&'static str]) -> Self {
        self.constraints.push(Constraint::OneOf(choices));
        self
    }

    pub fn fallback(
        mut self,
        reference: &'static str,
        field: &'static str,
        otherwise: impl Into<FieldValue>,
    ) -> Self {
        self.fallback = Some(Fallback {
            reference,
            field,
            otherwise: otherwise.into(),
        });
        self
    }
}

/// A foreign key resolved through the target's natural key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceSpec {
    /// Input field holding the target's natural key
    pub source_field: &'static str,
    /// Column storing the target's identity
    pub column: &'static str,
    /// Target entity name
    pub target: &'static str,
    pub required: bool,
    /// Resolved in the second pass (self or forward reference)
    pub deferred: bool,
    /// One-to-one link: no two entities may point at the same target
    pub unique: bool,
}

impl ReferenceSpec {
    pub fn new(source_field: &'static str, column: &'static str, target: &'static str) -> Self {
        Self {
            source_field,
            column,
            target,
            required: false,
            deferred: false,
            unique: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Descriptor of one importable entity type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySchema {
    pub name: &'static str,
    /// Natural key columns (scalar fields or reference columns)
    pub key: Vec<&'static str>,
    pub fields: Vec<FieldSpec>,
    pub references: Vec<ReferenceSpec>,
}

impl EntitySchema {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            key: Vec::new(),
            fields: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn key(mut self, columns: &[&'static str]) -> Self {
        self.key = columns.to_vec();
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn reference(mut self, reference: ReferenceSpec) -> Self {
        self.references.push(reference);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn reference_by_column(&self, column: &str) -> Option<&ReferenceSpec> {
        self.references.iter().find(|r| r.column == column)
    }

    /// Kind of a stored column, scalar or reference
    pub fn column_kind(&self, column: &str) -> Option<FieldKind> {
        if let Some(field) = self.get_field(column) {
            return Some(field.kind);
        }
        self.reference_by_column(column).map(|_| FieldKind::Reference)
    }

    /// All stored columns with their kinds, fields first
    pub fn columns(&self) -> Vec<(&'static str, FieldKind)> {
        self.fields
            .iter()
            .map(|f| (f.name, f.kind))
            .chain(self.references.iter().map(|r| (r.column, FieldKind::Reference)))
            .collect()
    }

    /// Columns whose non-null values must be unique across entities
    pub fn unique_columns(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.unique)
            .map(|f| f.name)
            .chain(self.references.iter().filter(|r| r.unique).map(|r| r.column))
            .collect()
    }

    /// Header fields that must be present in every input file
    pub fn required_headers(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .chain(
                self.references
                    .iter()
                    .filter(|r| r.required)
                    .map(|r| r.source_field),
            )
            .collect()
    }

    /// Every header field the schema reads
    pub fn known_headers(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .map(|f| f.name)
            .chain(self.references.iter().map(|r| r.source_field))
            .collect()
    }

    pub fn has_deferred_references(&self) -> bool {
        self.references.iter().any(|r| r.deferred)
    }

    /// Single key column, when the natural key is not composite
    pub fn single_key(&self) -> Option<&'static str> {
        match self.key.as_slice() {
            [column] => Some(*column),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employees() -> EntitySchema {
        EntitySchema::new("employees")
            .key(&["employee_id"])
            .field(FieldSpec::integer("employee_id").required())
            .field(FieldSpec::text("title").max_length(100))
            .reference(ReferenceSpec::new("reports_to", "reports_to", "employees").deferred())
    }

    #[test]
    fn test_required_headers_exclude_optional_references() {
        let schema = employees();
        assert_eq!(schema.required_headers(), vec!["employee_id"]);
        assert_eq!(
            schema.known_headers(),
            vec!["employee_id", "title", "reports_to"]
        );
    }

    #[test]
    fn test_column_kinds() {
        let schema = employees();
        assert_eq!(schema.column_kind("employee_id"), Some(FieldKind::Integer));
        assert_eq!(schema.column_kind("reports_to"), Some(FieldKind::Reference));
        assert_eq!(schema.column_kind("missing"), None);
        assert_eq!(schema.single_key(), Some("employee_id"));
        assert!(schema.has_deferred_references());
    }

    #[test]
    fn test_builder_collects_constraints() {
        let field = FieldSpec::decimal("discount").min(0).max(1).digits(4, 2);
        assert_eq!(
            field.constraints,
            vec![
                Constraint::Min(Decimal::ZERO),
                Constraint::Max(Decimal::ONE),
                Constraint::Digits {
                    precision: 4,
                    scale: 2
                }
            ]
        );
    }
}
