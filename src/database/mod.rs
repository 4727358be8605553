//! Persistence service abstraction
//!
//! This module provides the storage layer the importer writes through:
//! - DuckDB: embedded database file, one table per entity type
//! - Memory: in-process maps, used for dry runs and tests
//!
//! Both backends look entities up by natural key and assign surrogate
//! identities themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Entity, EntityId, FieldMap, NaturalKey};
use crate::schema::EntitySchema;

#[cfg(feature = "duckdb-backend")]
pub mod duckdb;

pub mod config;
pub mod memory;
pub mod schema;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDBBackend;

pub use config::{DatabaseBackendType, DatabaseConfig, ImportSection};
pub use memory::MemoryBackend;
pub use schema::DatabaseSchema;

/// Error type for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema creation failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Transaction failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Schema tables are missing
    #[error("Database not initialized. Run 'init' first.")]
    NotInitialized,

    /// No entity with the given identity
    #[error("{entity} with id {id} not found")]
    NotFound { entity: String, id: EntityId },

    /// A unique column already holds the value on another entity
    #[error("Duplicate value for {entity}.{column}: {value}")]
    DuplicateKey {
        entity: String,
        column: String,
        value: String,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Ledger entry written once per imported file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: Uuid,
    pub entity: String,
    /// Input path as given on the command line
    pub source: String,
    /// SHA-256 of the input bytes, lowercase hex
    pub sha256: String,
    pub rows_read: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    /// Whether the batch's writes were committed
    pub committed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Storage the importer upserts entities into
///
/// Implementations use interior mutability so a single service can be
/// shared by reference across an import run.
pub trait PersistenceService {
    /// Create tables for `schemas` and the run ledger if they don't exist
    fn initialize(&self, schemas: &[EntitySchema]) -> DatabaseResult<()>;

    /// Look up an entity by its natural key
    fn get_by_key(&self, schema: &EntitySchema, key: &NaturalKey)
    -> DatabaseResult<Option<Entity>>;

    /// Insert or update the entity identified by `key`
    ///
    /// Only the columns present in `fields` are written on update; key
    /// columns are never changed. Returns the stored entity and whether
    /// it was created.
    fn upsert(
        &self,
        schema: &EntitySchema,
        key: &NaturalKey,
        fields: &FieldMap,
    ) -> DatabaseResult<(Entity, bool)>;

    /// Point reference `column` of entity `id` at `target`
    fn set_reference(
        &self,
        schema: &EntitySchema,
        id: EntityId,
        column: &str,
        target: Option<EntityId>,
    ) -> DatabaseResult<()>;

    /// Number of stored entities of a type
    fn count(&self, schema: &EntitySchema) -> DatabaseResult<u64>;

    fn begin(&self) -> DatabaseResult<()>;

    fn commit(&self) -> DatabaseResult<()>;

    fn rollback(&self) -> DatabaseResult<()>;

    /// Append a ledger entry (never part of a batch transaction)
    fn record_run(&self, run: &ImportRun) -> DatabaseResult<()>;

    /// Most recent ledger entries, newest first
    fn recent_runs(&self, limit: usize) -> DatabaseResult<Vec<ImportRun>>;

    /// Backend type string ("duckdb" or "memory")
    fn backend_type(&self) -> &'static str;
}

/// Reject field maps naming columns the schema does not store
pub(crate) fn check_columns(schema: &EntitySchema, fields: &FieldMap) -> DatabaseResult<()> {
    match fields
        .keys()
        .find(|column| schema.column_kind(column).is_none())
    {
        Some(column) => Err(DatabaseError::InvalidInput(format!(
            "{} has no column '{}'",
            schema.name, column
        ))),
        None => Ok(()),
    }
}
