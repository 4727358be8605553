//! Validation functionality
//!
//! Provides validation logic for:
//! - Header names (normalisation, required and unknown columns)
//! - Field values (null sentinels, typed coercion, constraints)

pub mod coerce;
pub mod header;

pub use coerce::{
    DEFAULT_DATE_FORMATS, FieldParser, NULL_SENTINELS, ValueError, apply_constraints,
    normalize_null, parse_bool, parse_date, parse_datetime, parse_decimal, parse_integer,
};
pub use header::{HeaderMismatch, normalize_header, normalize_header_name, validate_header};
