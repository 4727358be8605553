//! File tools for preparing import inputs
//!
//! - `diff`: rows of a candidate file whose key is missing from a reference file
//! - `split`: cut a large file into header-carrying chunks
//! - `assign`: number the rows of a file in a new or existing id column

pub mod assign;
pub mod diff;
pub mod split;

use std::path::{Path, PathBuf};

use crate::import::{Encoding, ImportError, decode, detect_delimiter};
use crate::validation::normalize_header_name;

pub use assign::{AssignSummary, DEFAULT_FIRST_ID, DEFAULT_ID_COLUMN, assign_ids};
pub use diff::{DiffSummary, diff_files};
pub use split::{DEFAULT_CHUNK_PREFIX, DEFAULT_ROWS_PER_CHUNK, split_file};

/// Error raised by the file tools
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("{}: no column named '{column}'", .path.display())]
    MissingColumn { path: PathBuf, column: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Import(#[from] ImportError),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// A decoded delimited file with its raw header
struct Table {
    header: csv::StringRecord,
    reader: csv::Reader<std::io::Cursor<String>>,
    delimiter: u8,
}

impl Table {
    fn open(path: &Path, encoding: Encoding) -> ToolResult<Self> {
        if !path.is_file() {
            return Err(ToolError::FileNotFound(path.to_path_buf()));
        }
        let text = decode(std::fs::read(path)?, encoding)?;
        let delimiter = detect_delimiter(&text);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(std::io::Cursor::new(text));
        let header = reader.headers()?.clone();
        Ok(Self {
            header,
            reader,
            delimiter,
        })
    }

    /// Index of `column`, compared after header normalisation
    fn find(&self, column: &str) -> Option<usize> {
        let wanted = normalize_header_name(column);
        self.header
            .iter()
            .position(|name| normalize_header_name(name) == wanted)
    }

    fn column(&self, path: &Path, column: &str) -> ToolResult<usize> {
        self.find(column).ok_or_else(|| ToolError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })
    }
}

fn create_parent(path: &Path) -> ToolResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
