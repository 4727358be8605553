//! Northwind import - batch CSV importer for the Northwind business domain
//!
//! Provides:
//! - Entity schema descriptors and the Northwind catalog
//! - Null-sentinel normalisation and typed field coercion
//! - A two-pass batch importer with idempotent upserts by natural key
//! - Persistence backends (DuckDB, in-memory) with an import run ledger
//! - File tools for diffing and splitting input files

#[cfg(feature = "cli")]
pub mod cli;
pub mod database;
pub mod import;
pub mod models;
pub mod schema;
pub mod tools;
pub mod validation;

// Re-export commonly used types
#[cfg(feature = "duckdb-backend")]
pub use database::DuckDBBackend;
pub use database::{
    DatabaseConfig, DatabaseError, DatabaseResult, ImportRun, MemoryBackend, PersistenceService,
};
pub use import::{
    BatchImporter, BatchResult, ImportError, ImportOptions, ImportResult, RecordError,
    RecordFailure, import_file,
};
pub use models::{Entity, FieldKind, FieldValue, NaturalKey, RecordState, UpsertOutcome};
pub use schema::{Catalog, EntitySchema, FieldSpec, ReferenceSpec};
pub use tools::{ToolError, assign_ids, diff_files, split_file};
