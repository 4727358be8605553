//! Configuration file support
//!
//! Handles parsing of `northwind-import.toml` configuration files and
//! environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{DatabaseError, DatabaseResult};
use crate::import::{Encoding, ImportOptions};
use crate::validation::{DEFAULT_DATE_FORMATS, parse_bool};

/// Default database filename for DuckDB
pub const DEFAULT_DUCKDB_FILENAME: &str = "northwind.duckdb";

/// Default configuration filename
pub const CONFIG_FILENAME: &str = "northwind-import.toml";

/// Environment variable for database backend
pub const ENV_DB_BACKEND: &str = "NORTHWIND_DB_BACKEND";

/// Environment variable for DuckDB path
pub const ENV_DB_PATH: &str = "NORTHWIND_DB_PATH";

/// Environment variable for the default error policy
pub const ENV_SKIP_ERRORS: &str = "NORTHWIND_SKIP_ERRORS";

/// Database backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackendType {
    /// DuckDB embedded database (default)
    #[default]
    DuckDB,
    /// Process memory, discarded on exit
    Memory,
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "duckdb" => Ok(DatabaseBackendType::DuckDB),
            "memory" | "mem" => Ok(DatabaseBackendType::Memory),
            _ => Err(format!(
                "Unknown database backend: {}. Use 'duckdb' or 'memory'.",
                s
            )),
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::DuckDB => write!(f, "duckdb"),
            DatabaseBackendType::Memory => write!(f, "memory"),
        }
    }
}

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Database backend type
    #[serde(default)]
    pub backend: DatabaseBackendType,

    /// Path to DuckDB database file (relative to the config directory)
    #[serde(default = "default_duckdb_path")]
    pub path: String,
}

fn default_duckdb_path() -> String {
    DEFAULT_DUCKDB_FILENAME.to_string()
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            backend: DatabaseBackendType::default(),
            path: default_duckdb_path(),
        }
    }
}

/// Import defaults section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSection {
    /// Skip failing rows instead of aborting the batch
    #[serde(default)]
    pub skip_errors: bool,

    /// Wrap both passes in a single transaction
    #[serde(default = "default_atomic")]
    pub atomic: bool,

    /// Treat unknown header columns as a mismatch
    #[serde(default)]
    pub strict_header: bool,

    /// Field delimiter, detected from the header when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<char>,

    #[serde(default)]
    pub encoding: Encoding,

    /// Date formats tried in order
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
}

fn default_atomic() -> bool {
    true
}

fn default_date_formats() -> Vec<String> {
    DEFAULT_DATE_FORMATS.iter().map(|s| s.to_string()).collect()
}

impl Default for ImportSection {
    fn default() -> Self {
        Self {
            skip_errors: false,
            atomic: default_atomic(),
            strict_header: false,
            delimiter: None,
            encoding: Encoding::default(),
            date_formats: default_date_formats(),
        }
    }
}

impl ImportSection {
    /// Importer options carrying these defaults
    pub fn to_options(&self) -> DatabaseResult<ImportOptions> {
        let delimiter = match self.delimiter {
            Some(c) if c.is_ascii() => Some(c as u8),
            Some(c) => {
                return Err(DatabaseError::ConfigError(format!(
                    "delimiter must be a single ASCII character, got '{}'",
                    c
                )));
            }
            None => None,
        };
        if self.date_formats.is_empty() {
            return Err(DatabaseError::ConfigError(
                "date_formats must list at least one format".to_string(),
            ));
        }

        Ok(ImportOptions {
            skip_errors: self.skip_errors,
            atomic: self.atomic,
            strict_header: self.strict_header,
            delimiter,
            encoding: self.encoding,
            date_formats: self.date_formats.clone(),
        })
    }
}

/// Main configuration structure
///
/// Represents the `northwind-import.toml` configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseSection,

    /// Import defaults
    #[serde(default)]
    pub import: ImportSection,
}

impl DatabaseConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a DuckDB configuration
    pub fn duckdb(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseSection {
                backend: DatabaseBackendType::DuckDB,
                path: path.into(),
            },
            ..Default::default()
        }
    }

    /// Create an in-memory configuration
    pub fn memory() -> Self {
        Self {
            database: DatabaseSection {
                backend: DatabaseBackendType::Memory,
                path: String::new(),
            },
            ..Default::default()
        }
    }

    /// Load configuration from a directory
    ///
    /// Looks for `northwind-import.toml` in the directory.
    /// Falls back to defaults if not found.
    pub fn load(dir: &Path) -> DatabaseResult<Self> {
        let config_path = dir.join(CONFIG_FILENAME);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| DatabaseError::IoError(format!("Failed to read config: {}", e)))?;

            Self::parse(&content)?
        } else {
            Self::default()
        };

        // Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> DatabaseResult<Self> {
        toml::from_str(content)
            .map_err(|e| DatabaseError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to a directory
    pub fn save(&self, dir: &Path) -> DatabaseResult<()> {
        let config_path = dir.join(CONFIG_FILENAME);
        let content = self.to_toml()?;

        std::fs::write(&config_path, content)
            .map_err(|e| DatabaseError::IoError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> DatabaseResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            DatabaseError::SerializationError(format!("Failed to serialize config: {}", e))
        })
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`, keyed by environment variable name
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Backend type
        if let Some(backend) = lookup(ENV_DB_BACKEND)
            && let Ok(backend_type) = backend.parse()
        {
            self.database.backend = backend_type;
        }

        // DuckDB path
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.database.path = path;
        }

        // Error policy
        if let Some(skip) = lookup(ENV_SKIP_ERRORS)
            && let Ok(skip) = parse_bool(skip.trim())
        {
            self.import.skip_errors = skip;
        }
    }

    /// Get the DuckDB database path relative to a directory
    pub fn get_duckdb_path(&self, dir: &Path) -> PathBuf {
        if self.database.path.is_empty() {
            dir.join(DEFAULT_DUCKDB_FILENAME)
        } else if Path::new(&self.database.path).is_absolute() {
            PathBuf::from(&self.database.path)
        } else {
            dir.join(&self.database.path)
        }
    }

    /// Check if configuration exists in a directory
    pub fn exists(dir: &Path) -> bool {
        dir.join(CONFIG_FILENAME).exists()
    }
}

/// Generate a sample configuration file content
pub fn sample_config() -> &'static str {
    r#"# Northwind import configuration

[database]
# Database backend: "duckdb" (default) or "memory"
backend = "duckdb"

# Path to DuckDB database file (relative to this file's directory, or absolute)
path = "northwind.duckdb"

[import]
# Skip failing rows instead of rolling back the batch
skip_errors = false

# One transaction for the whole file; false commits each row separately
atomic = true

# Reject files with columns the entity does not know
strict_header = false

# Field delimiter; detected from the header when omitted
# delimiter = "|"

# "utf8", "latin1" or "auto" (UTF-8 with Latin-1 fallback)
encoding = "auto"

# Tried in order, first match wins
date_formats = ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"]
"#
}
