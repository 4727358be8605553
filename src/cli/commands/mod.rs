//! CLI command implementations

pub mod db;
pub mod import;
pub mod tools;

use std::path::{Path, PathBuf};

use crate::cli::error::CliError;
#[cfg(feature = "duckdb-backend")]
use crate::database::DuckDBBackend;
use crate::database::{DatabaseBackendType, DatabaseConfig, MemoryBackend, PersistenceService};

/// Database selection shared by every command
#[derive(Debug, Clone)]
pub struct ConnectionArgs {
    /// Directory holding `northwind-import.toml`
    pub config_dir: PathBuf,
    /// DuckDB file overriding the configured path
    pub database: Option<PathBuf>,
    /// Backend overriding the configured one
    pub backend: Option<DatabaseBackendType>,
}

impl Default for ConnectionArgs {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("."),
            database: None,
            backend: None,
        }
    }
}

impl ConnectionArgs {
    /// Configuration file, then environment, then command-line flags
    pub fn load_config(&self) -> Result<DatabaseConfig, CliError> {
        let mut config = DatabaseConfig::load(&self.config_dir)?;
        if let Some(backend) = self.backend {
            config.database.backend = backend;
        }
        if let Some(path) = &self.database {
            config.database.path = std::path::absolute(path)?.display().to_string();
        }
        Ok(config)
    }
}

/// Open the configured backend and make sure its tables exist
pub fn open_service(
    config: &DatabaseConfig,
    dir: &Path,
) -> Result<Box<dyn PersistenceService>, CliError> {
    let service: Box<dyn PersistenceService> = match config.database.backend {
        DatabaseBackendType::DuckDB => {
            #[cfg(feature = "duckdb-backend")]
            {
                let db_path = config.get_duckdb_path(dir);
                if let Some(parent) = db_path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent)?;
                }
                Box::new(DuckDBBackend::new(&db_path)?)
            }
            #[cfg(not(feature = "duckdb-backend"))]
            {
                let _ = dir;
                return Err(CliError::InvalidArgument(
                    "DuckDB support not enabled. Build with --features duckdb-backend".to_string(),
                ));
            }
        }
        DatabaseBackendType::Memory => Box::new(MemoryBackend::new()),
    };

    let catalog = crate::schema::Catalog::northwind();
    service.initialize(catalog.schemas())?;
    Ok(service)
}

/// Render rows as an aligned text table
pub fn format_table(columns: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "(0 rows)".to_string();
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for row in rows {
        for (i, value) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(value.len());
        }
    }

    let mut output = String::new();

    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:width$}", c, width = widths[i]))
        .collect();
    output.push_str(&header.join(" | "));
    output.push('\n');

    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&separator.join("-+-"));
    output.push('\n');

    for row in rows {
        let values: Vec<String> = row
            .iter()
            .enumerate()
            .take(widths.len())
            .map(|(i, value)| format!("{:width$}", value, width = widths[i]))
            .collect();
        output.push_str(values.join(" | ").trim_end());
        output.push('\n');
    }

    output.push_str(&format!("({} rows)", rows.len()));
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_table() {
        let rows = vec![
            vec!["regions".to_string(), "4".to_string()],
            vec!["territories".to_string(), "53".to_string()],
        ];
        let table = format_table(&["entity", "rows"], &rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "entity      | rows");
        assert_eq!(lines[1], "------------+-----");
        assert_eq!(lines[2], "regions     | 4");
        assert_eq!(lines[4], "(2 rows)");
    }

    #[test]
    fn test_format_empty_table() {
        assert_eq!(format_table(&["entity"], &[]), "(0 rows)");
    }

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let args = ConnectionArgs {
            config_dir: dir.path().to_path_buf(),
            database: Some(dir.path().join("other.duckdb")),
            backend: Some(DatabaseBackendType::Memory),
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.database.backend, DatabaseBackendType::Memory);
        assert_eq!(
            config.get_duckdb_path(dir.path()),
            dir.path().join("other.duckdb")
        );
    }
}
