//! Header normalisation and validation against an entity schema

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

use crate::schema::EntitySchema;

const BOM: char = '\u{feff}';

/// Header does not satisfy the schema
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}", describe(.missing, .unexpected, .duplicated))]
pub struct HeaderMismatch {
    /// Required fields absent from the header
    pub missing: Vec<String>,
    /// Unknown columns, only reported in strict mode
    pub unexpected: Vec<String>,
    /// Columns that appear more than once
    pub duplicated: Vec<String>,
}

fn describe(missing: &[String], unexpected: &[String], duplicated: &[String]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing required fields: {}", missing.join(", ")));
    }
    if !unexpected.is_empty() {
        parts.push(format!("unexpected fields: {}", unexpected.join(", ")));
    }
    if !duplicated.is_empty() {
        parts.push(format!("duplicated fields: {}", duplicated.join(", ")));
    }
    parts.join("; ")
}

/// Normalise one header name: strip BOM, trim, lower-case, spaces to `_`
pub fn normalize_header_name(raw: &str) -> String {
    raw.trim_start_matches(BOM)
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

pub fn normalize_header<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .map(|name| normalize_header_name(name.as_ref()))
        .collect()
}

/// Check normalised `header` names against `schema`
///
/// Fails closed when a required field is absent. Unknown columns are
/// ignored unless `strict` is set.
pub fn validate_header(
    schema: &EntitySchema,
    header: &[String],
    strict: bool,
) -> Result<(), HeaderMismatch> {
    let present: BTreeSet<&str> = header.iter().map(String::as_str).collect();

    let missing: Vec<String> = schema
        .required_headers()
        .into_iter()
        .filter(|name| !present.contains(name))
        .map(str::to_string)
        .collect();

    let known = schema.known_headers();
    let unknown: Vec<String> = header
        .iter()
        .filter(|name| !known.contains(&name.as_str()))
        .cloned()
        .collect();

    let mut seen = BTreeSet::new();
    let mut duplicated = Vec::new();
    for name in header {
        if !seen.insert(name.as_str()) && !duplicated.contains(name) {
            duplicated.push(name.clone());
        }
    }

    let unexpected = if strict {
        unknown
    } else {
        if !unknown.is_empty() {
            debug!(entity = schema.name, columns = ?unknown, "Ignoring unknown columns");
        }
        Vec::new()
    };

    if missing.is_empty() && unexpected.is_empty() && duplicated.is_empty() {
        Ok(())
    } else {
        Err(HeaderMismatch {
            missing,
            unexpected,
            duplicated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Catalog;

    #[test]
    fn test_normalize_header_name() {
        assert_eq!(normalize_header_name("\u{feff}Employee ID"), "employee_id");
        assert_eq!(normalize_header_name("  Reports   To "), "reports_to");
        assert_eq!(normalize_header_name("region_id"), "region_id");
    }

    #[test]
    fn test_missing_required_field() {
        let catalog = Catalog::northwind();
        let schema = catalog.get("territories").unwrap();
        let header = normalize_header(&["territory_id", "territory_description"]);

        let err = validate_header(schema, &header, false).unwrap_err();
        assert_eq!(err.missing, vec!["region_id".to_string()]);
        assert!(err.to_string().contains("region_id"));
    }

    #[test]
    fn test_unknown_columns_depend_on_strict_mode() {
        let catalog = Catalog::northwind();
        let schema = catalog.get("regions").unwrap();
        let header = normalize_header(&["Region ID", "Region Description", "Comment"]);

        assert!(validate_header(schema, &header, false).is_ok());
        let err = validate_header(schema, &header, true).unwrap_err();
        assert_eq!(err.unexpected, vec!["comment".to_string()]);
    }

    #[test]
    fn test_duplicated_columns() {
        let catalog = Catalog::northwind();
        let schema = catalog.get("regions").unwrap();
        let header = normalize_header(&["region_id", "region_description", "REGION_ID"]);

        let err = validate_header(schema, &header, false).unwrap_err();
        assert_eq!(err.duplicated, vec!["region_id".to_string()]);
    }
}
