//! Import functionality
//!
//! Reads delimited text files and upserts their rows through a
//! [`PersistenceService`]:
//! - `reader`: decoding, delimiter detection and row splitting
//! - `importer`: the two-pass batch importer
//! - `result`: per-batch counters and failures

pub mod importer;
pub mod reader;
pub mod result;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::{DatabaseError, ImportRun, PersistenceService};
use crate::models::ImportStep;
use crate::schema::Catalog;
use crate::schema::catalog::CatalogError;
use crate::validation::{HeaderMismatch, ValueError};

pub use importer::{BatchImporter, ImportOptions};
pub use reader::{Encoding, RecordReader, decode, detect_delimiter};
pub use result::BatchResult;

/// Batch-level error; always ends the import
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Header mismatch: {0}")]
    HeaderMismatch(#[from] HeaderMismatch),

    #[error("Import aborted: {0}")]
    RecordFailed(Box<RecordFailure>),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type for import operations
pub type ImportResult<T> = Result<T, ImportError>;

/// Why a single record could not be imported
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum RecordError {
    #[error("invalid value for '{field}' ({value:?}): {reason}")]
    Parse {
        field: String,
        value: String,
        reason: ValueError,
    },

    #[error("malformed row: expected {expected} fields, found {found}")]
    Malformed { expected: usize, found: usize },

    #[error("'{field}': no {target} with key {key}")]
    Reference {
        field: String,
        target: String,
        key: String,
    },

    #[error("duplicate value for {entity}.{field}: {value}")]
    DuplicateKey {
        entity: String,
        field: String,
        value: String,
    },
}

impl RecordError {
    /// Label used when tallying failures
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::Parse { .. } | RecordError::Malformed { .. } => "ParseError",
            RecordError::Reference { .. } => "ReferenceError",
            RecordError::DuplicateKey { .. } => "DuplicateKeyError",
        }
    }
}

/// A failed record with its position in the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// 1-based input line
    pub line: usize,
    /// Natural key as read from the input, when known
    pub key: Option<String>,
    pub step: ImportStep,
    pub error: RecordError,
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}", self.line)?;
        if let Some(key) = &self.key {
            write!(f, " ({})", key)?;
        }
        write!(f, " [{}] {}: {}", self.step, self.error.kind(), self.error)
    }
}

/// Lowercase hex SHA-256 of `bytes`
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Import one file into `service` and record the run in the ledger
///
/// The ledger entry is written after the batch's transaction has ended,
/// whether the batch succeeded or not. Missing files are rejected before
/// anything is recorded.
pub fn import_file(
    catalog: &Catalog,
    entity: &str,
    path: &Path,
    service: &dyn PersistenceService,
    options: &ImportOptions,
) -> ImportResult<(BatchResult, ImportRun)> {
    if !path.is_file() {
        return Err(ImportError::FileNotFound(path.to_path_buf()));
    }
    let schema = catalog.require(entity)?;
    let bytes = std::fs::read(path)?;
    let started_at = Utc::now();

    info!(entity = schema.name, path = %path.display(), "Importing file");
    let importer = BatchImporter::new(catalog, schema, service, options.clone());
    let mut result = BatchResult::new(schema.name);
    let outcome = importer.execute(bytes.as_slice(), &mut result);

    let run = ImportRun {
        id: Uuid::new_v4(),
        entity: schema.name.to_string(),
        source: path.display().to_string(),
        sha256: fingerprint(&bytes),
        rows_read: result.rows_read as u64,
        created: result.created as u64,
        updated: result.updated as u64,
        skipped: result.skipped as u64,
        committed: result.committed,
        started_at,
        finished_at: Utc::now(),
    };

    match outcome {
        Ok(()) => {
            service.record_run(&run)?;
            Ok((result, run))
        }
        Err(error) => {
            if let Err(ledger_error) = service.record_run(&run) {
                warn!(error = %ledger_error, "Failed to record import run");
            }
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let parse = RecordError::Parse {
            field: "hire_date".to_string(),
            value: "yesterday".to_string(),
            reason: ValueError::InvalidDate("yesterday".to_string()),
        };
        assert_eq!(parse.kind(), "ParseError");
        assert_eq!(
            RecordError::Malformed {
                expected: 3,
                found: 2
            }
            .kind(),
            "ParseError"
        );
        assert_eq!(
            RecordError::DuplicateKey {
                entity: "users".to_string(),
                field: "email".to_string(),
                value: "a@b.c".to_string(),
            }
            .kind(),
            "DuplicateKeyError"
        );
    }

    #[test]
    fn test_failure_display_mentions_line_and_key() {
        let failure = RecordFailure {
            line: 3,
            key: Some("territory_id=01581".to_string()),
            step: ImportStep::Resolve,
            error: RecordError::Reference {
                field: "region_id".to_string(),
                target: "regions".to_string(),
                key: "9".to_string(),
            },
        };
        let rendered = failure.to_string();
        assert!(rendered.starts_with("line 3 (territory_id=01581) [resolve] ReferenceError"));
        assert!(rendered.contains("no regions with key 9"));
    }

    #[test]
    fn test_fingerprint() {
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_import_file_missing() {
        let catalog = Catalog::northwind();
        let service = crate::database::MemoryBackend::new();
        let err = import_file(
            &catalog,
            "regions",
            Path::new("/nonexistent/regions.csv"),
            &service,
            &ImportOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::FileNotFound(_)));
        assert!(service.recent_runs(10).unwrap().is_empty());
    }
}
