//! CLI-specific error types

use crate::database::DatabaseError;
use crate::import::ImportError;
use crate::tools::ToolError;
use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("{0}")]
    ImportError(#[from] ImportError),

    #[error("{0}")]
    ToolError(#[from] ToolError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to write output: {0}")]
    OutputError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
