//! Models module
//!
//! Defines the value and record types shared by the importer, the schema
//! catalog and the persistence backends.

pub mod entity;
pub mod record;
pub mod value;

pub use entity::{Entity, FieldMap, NaturalKey};
pub use record::{
    DeferredReference, ImportStep, RecordState, SourceRecord, UpsertOutcome, ValidatedRecord,
};
pub use value::{DATE_FORMAT, DATETIME_FORMAT, EntityId, FieldKind, FieldValue};
