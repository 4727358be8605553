//! Null-sentinel normalisation and typed coercion of raw field values

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::models::{FieldKind, FieldValue};
use crate::schema::{Constraint, FieldSpec};

/// Literals that denote an absent value (compared trimmed, ignoring case)
pub const NULL_SENTINELS: &[&str] = &["", "NULL", "NONE"];

/// Date formats tried in order; the first that parses wins
pub const DEFAULT_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];

/// Timestamp formats tried before falling back to the date formats
pub const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const TRUE_LITERALS: &[&str] = &["true", "1", "yes", "y", "t"];
const FALSE_LITERALS: &[&str] = &["false", "0", "no", "n", "f"];

/// Why a single field value was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValueError {
    #[error("required value is missing")]
    Missing,

    #[error("invalid integer '{0}'")]
    InvalidInteger(String),

    #[error("invalid decimal '{0}'")]
    InvalidDecimal(String),

    #[error("invalid boolean '{0}'")]
    InvalidBoolean(String),

    #[error("unable to parse date '{0}'")]
    InvalidDate(String),

    #[error("unable to parse timestamp '{0}'")]
    InvalidDateTime(String),

    #[error("value exceeds maximum length (max: {max}, got: {actual})")]
    TooLong { max: usize, actual: usize },

    #[error("value {value} is below the minimum of {min}")]
    BelowMinimum { value: String, min: String },

    #[error("value {value} is above the maximum of {max}")]
    AboveMaximum { value: String, max: String },

    #[error("value {value} has more than {max} digits before the decimal point")]
    TooManyDigits { value: String, max: u32 },

    #[error("value {value} has more than {max} decimal places")]
    TooManyDecimalPlaces { value: String, max: u32 },

    #[error("'{value}' is not one of {choices:?}")]
    NotAChoice { value: String, choices: Vec<String> },

    #[error("{0} values cannot be read from input fields")]
    UnsupportedKind(String),
}

/// Map the null sentinels to `None`, returning the trimmed value otherwise
///
/// This is the only place sentinel literals are compared.
pub fn normalize_null(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if NULL_SENTINELS
        .iter()
        .any(|sentinel| trimmed.eq_ignore_ascii_case(sentinel))
    {
        None
    } else {
        Some(trimmed)
    }
}

pub fn parse_integer(value: &str) -> Result<i64, ValueError> {
    value
        .parse()
        .map_err(|_| ValueError::InvalidInteger(value.to_string()))
}

pub fn parse_decimal(value: &str) -> Result<Decimal, ValueError> {
    Decimal::from_str(value)
        .map(|d| d.normalize())
        .map_err(|_| ValueError::InvalidDecimal(value.to_string()))
}

pub fn parse_bool(value: &str) -> Result<bool, ValueError> {
    let lowered = value.to_ascii_lowercase();
    if TRUE_LITERALS.contains(&lowered.as_str()) {
        Ok(true)
    } else if FALSE_LITERALS.contains(&lowered.as_str()) {
        Ok(false)
    } else {
        Err(ValueError::InvalidBoolean(value.to_string()))
    }
}

/// Parse a date trying `formats` in order
pub fn parse_date<S: AsRef<str>>(value: &str, formats: &[S]) -> Result<NaiveDate, ValueError> {
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt.as_ref()).ok())
        .ok_or_else(|| ValueError::InvalidDate(value.to_string()))
}

/// Parse a timestamp; RFC 3339 values are converted to UTC and a bare date
/// becomes midnight of that day
pub fn parse_datetime<S: AsRef<str>>(
    value: &str,
    date_formats: &[S],
) -> Result<NaiveDateTime, ValueError> {
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
    {
        return Ok(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.naive_utc());
    }
    parse_date(value, date_formats)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| ValueError::InvalidDateTime(value.to_string()))
}

/// Turns raw field strings into typed values according to a [`FieldSpec`]
#[derive(Debug, Clone)]
pub struct FieldParser {
    date_formats: Vec<String>,
}

impl Default for FieldParser {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMATS.iter().map(|s| s.to_string()).collect())
    }
}

impl FieldParser {
    pub fn new(date_formats: Vec<String>) -> Self {
        Self { date_formats }
    }

    pub fn date_formats(&self) -> &[String] {
        &self.date_formats
    }

    /// Coerce one field; `raw` is `None` when the column is absent from the header
    ///
    /// Null inputs become the field default when one is declared. A required
    /// field never accepts a null sentinel.
    pub fn parse_field(&self, spec: &FieldSpec, raw: Option<&str>) -> Result<FieldValue, ValueError> {
        let Some(value) = raw.and_then(normalize_null) else {
            if spec.required {
                return Err(ValueError::Missing);
            }
            return Ok(spec.default.clone().unwrap_or(FieldValue::Null));
        };

        let typed = match spec.kind {
            FieldKind::Text => FieldValue::Text(value.to_string()),
            FieldKind::Integer => FieldValue::Integer(parse_integer(value)?),
            FieldKind::Decimal => FieldValue::Decimal(parse_decimal(value)?),
            FieldKind::Boolean => FieldValue::Boolean(parse_bool(value)?),
            FieldKind::Date => FieldValue::Date(parse_date(value, &self.date_formats)?),
            FieldKind::DateTime => {
                FieldValue::DateTime(parse_datetime(value, &self.date_formats)?)
            }
            FieldKind::Reference => {
                return Err(ValueError::UnsupportedKind(spec.kind.to_string()));
            }
        };

        apply_constraints(&spec.constraints, typed)
    }

    /// Coerce a raw key to the kind of the column it will be looked up by
    pub fn parse_key(&self, kind: FieldKind, value: &str) -> Result<FieldValue, ValueError> {
        let spec = FieldSpec::new("key", kind).required();
        self.parse_field(&spec, Some(value))
    }
}

/// Check `value` against `constraints`, canonicalising choice values
pub fn apply_constraints(
    constraints: &[Constraint],
    value: FieldValue,
) -> Result<FieldValue, ValueError> {
    let mut value = value;
    for constraint in constraints {
        match constraint {
            Constraint::MaxLength(max) => {
                if let Some(text) = value.as_text() {
                    let actual = text.chars().count();
                    if actual > *max {
                        return Err(ValueError::TooLong { max: *max, actual });
                    }
                }
            }
            Constraint::Min(min) => {
                if let Some(number) = value.as_decimal()
                    && number < *min
                {
                    return Err(ValueError::BelowMinimum {
                        value: number.to_string(),
                        min: min.to_string(),
                    });
                }
            }
            Constraint::Max(max) => {
                if let Some(number) = value.as_decimal()
                    && number > *max
                {
                    return Err(ValueError::AboveMaximum {
                        value: number.to_string(),
                        max: max.to_string(),
                    });
                }
            }
            Constraint::Digits { precision, scale } => {
                if let Some(number) = value.as_decimal() {
                    check_digits(number, *precision, *scale)?;
                }
            }
            Constraint::OneOf(choices) => {
                if let Some(text) = value.as_text() {
                    let canonical = choices
                        .iter()
                        .find(|choice| choice.eq_ignore_ascii_case(text))
                        .ok_or_else(|| ValueError::NotAChoice {
                            value: text.to_string(),
                            choices: choices.iter().map(|c| c.to_string()).collect(),
                        })?;
                    value = FieldValue::Text(canonical.to_string());
                }
            }
        }
    }
    Ok(value)
}

/// Trailing zeros do not count, so `18.000` fits a scale of 2.
fn check_digits(number: Decimal, precision: u32, scale: u32) -> Result<(), ValueError> {
    let normalized = number.normalize();
    let places = normalized.scale();
    if places > scale {
        return Err(ValueError::TooManyDecimalPlaces {
            value: number.to_string(),
            max: scale,
        });
    }
    let digits = normalized.mantissa().unsigned_abs().to_string().len() as u32;
    let max_whole = precision.saturating_sub(scale);
    if digits.saturating_sub(places) > max_whole {
        return Err(ValueError::TooManyDigits {
            value: number.to_string(),
            max: max_whole,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sentinels() {
        for raw in ["", "   ", "NULL", "null", " None ", "NONE"] {
            assert_eq!(normalize_null(raw), None, "{:?}", raw);
        }
        assert_eq!(normalize_null("  Nancy "), Some("Nancy"));
        assert_eq!(normalize_null("NULLABLE"), Some("NULLABLE"));
    }

    #[test]
    fn test_required_field_rejects_every_sentinel() {
        let parser = FieldParser::default();
        let spec = FieldSpec::integer("employee_id").required();
        for raw in ["", "NULL", "none", "  "] {
            assert_eq!(
                parser.parse_field(&spec, Some(raw)),
                Err(ValueError::Missing)
            );
        }
        assert_eq!(parser.parse_field(&spec, None), Err(ValueError::Missing));
    }

    #[test]
    fn test_optional_field_uses_default() {
        let parser = FieldParser::default();
        let spec = FieldSpec::integer("units_in_stock").default_value(0_i64);
        assert_eq!(
            parser.parse_field(&spec, Some("NULL")).unwrap(),
            FieldValue::Integer(0)
        );

        let spec = FieldSpec::date("dob");
        assert_eq!(parser.parse_field(&spec, Some("")).unwrap(), FieldValue::Null);
    }

    #[test]
    fn test_date_formats_first_match_wins() {
        let formats = DEFAULT_DATE_FORMATS;
        // Month/day is tried before day/month.
        assert_eq!(
            parse_date("03/04/1998", formats).unwrap(),
            NaiveDate::from_ymd_opt(1998, 3, 4).unwrap()
        );
        // Only day/month can read a day above 12 in the first slot.
        assert_eq!(
            parse_date("25/12/1998", formats).unwrap(),
            NaiveDate::from_ymd_opt(1998, 12, 25).unwrap()
        );
        assert_eq!(
            parse_date("1948-12-08", formats).unwrap(),
            NaiveDate::from_ymd_opt(1948, 12, 8).unwrap()
        );
        assert_eq!(
            parse_date("08.12.1948", formats),
            Err(ValueError::InvalidDate("08.12.1948".to_string()))
        );
    }

    #[test]
    fn test_parse_datetime_variants() {
        let formats = DEFAULT_DATE_FORMATS;
        let midnight = NaiveDate::from_ymd_opt(1996, 7, 4)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_datetime("1996-07-04", formats).unwrap(), midnight);
        assert_eq!(
            parse_datetime("1996-07-04 00:00:00.000", formats).unwrap(),
            midnight
        );
        assert_eq!(
            parse_datetime("1996-07-04T02:00:00+02:00", formats).unwrap(),
            midnight
        );
        assert!(parse_datetime("yesterday", formats).is_err());
    }

    #[test]
    fn test_parse_bool_ignores_case() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(parse_bool("Yes").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(!parse_bool("False").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn test_constraints() {
        let parser = FieldParser::default();

        let quantity = FieldSpec::integer("quantity").required().min(1);
        assert!(matches!(
            parser.parse_field(&quantity, Some("0")),
            Err(ValueError::BelowMinimum { .. })
        ));

        let discount = FieldSpec::decimal("discount").min(0).max(1);
        assert!(parser.parse_field(&discount, Some("0.15")).is_ok());
        assert!(matches!(
            parser.parse_field(&discount, Some("1.5")),
            Err(ValueError::AboveMaximum { .. })
        ));

        let extension = FieldSpec::text("extension").max_length(4);
        assert_eq!(
            parser.parse_field(&extension, Some("123456")),
            Err(ValueError::TooLong { max: 4, actual: 6 })
        );
    }

    #[test]
    fn test_decimal_must_fit_column() {
        let parser = FieldParser::default();
        let price = FieldSpec::decimal("unit_price").digits(10, 2);
        assert!(parser.parse_field(&price, Some("99999999.99")).is_ok());
        assert!(parser.parse_field(&price, Some("18.000")).is_ok());
        assert!(parser.parse_field(&price, Some("0.05")).is_ok());
        assert_eq!(
            parser.parse_field(&price, Some("100000000000")),
            Err(ValueError::TooManyDigits {
                value: "100000000000".to_string(),
                max: 8
            })
        );
        assert_eq!(
            parser.parse_field(&price, Some("14.005")),
            Err(ValueError::TooManyDecimalPlaces {
                value: "14.005".to_string(),
                max: 2
            })
        );

        let discount = FieldSpec::decimal("discount").digits(4, 2);
        assert!(matches!(
            parser.parse_field(&discount, Some("0.125")),
            Err(ValueError::TooManyDecimalPlaces { .. })
        ));
        assert!(matches!(
            parser.parse_field(&discount, Some("-123")),
            Err(ValueError::TooManyDigits { .. })
        ));
    }

    #[test]
    fn test_choice_is_canonicalised() {
        let parser = FieldParser::default();
        let spec = FieldSpec::text("user_type").one_of(&["CUS", "EMP", "ADM"]);
        assert_eq!(
            parser.parse_field(&spec, Some("emp")).unwrap(),
            FieldValue::Text("EMP".to_string())
        );
        assert!(matches!(
            parser.parse_field(&spec, Some("BOSS")),
            Err(ValueError::NotAChoice { .. })
        ));
    }

    #[test]
    fn test_invalid_numbers() {
        let parser = FieldParser::default();
        let spec = FieldSpec::decimal("freight");
        assert_eq!(
            parser.parse_field(&spec, Some("12,5")),
            Err(ValueError::InvalidDecimal("12,5".to_string()))
        );
        assert_eq!(
            parser.parse_key(FieldKind::Integer, "abc"),
            Err(ValueError::InvalidInteger("abc".to_string()))
        );
    }
}
