//! Database CLI commands
//!
//! `init` writes a sample configuration and creates the schema, `status`
//! shows row counts per entity and the most recent import runs.

use serde::Serialize;
use std::path::PathBuf;

use super::{ConnectionArgs, format_table, open_service};
use crate::cli::error::CliError;
use crate::database::ImportRun;
use crate::database::config::{CONFIG_FILENAME, sample_config};
use crate::schema::Catalog;

/// Init command arguments
#[derive(Debug, Clone, Default)]
pub struct InitArgs {
    /// Overwrite an existing configuration file
    pub force: bool,
}

/// Status command arguments
#[derive(Debug, Clone)]
pub struct StatusArgs {
    /// Number of import runs to list
    pub limit: usize,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct EntityCount {
    entity: &'static str,
    rows: u64,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    backend: &'static str,
    entities: Vec<EntityCount>,
    runs: Vec<ImportRun>,
}

/// Write the sample configuration and create the database schema
pub fn handle_init(connection: &ConnectionArgs, args: &InitArgs) -> Result<(), CliError> {
    std::fs::create_dir_all(&connection.config_dir)?;
    let config_path: PathBuf = connection.config_dir.join(CONFIG_FILENAME);

    if config_path.exists() && !args.force {
        println!("Keeping existing {}", config_path.display());
    } else {
        std::fs::write(&config_path, sample_config())?;
        println!("Wrote {}", config_path.display());
    }

    let config = connection.load_config()?;
    let service = open_service(&config, &connection.config_dir)?;
    println!(
        "Initialized {} database with {} entity tables",
        service.backend_type(),
        Catalog::northwind().schemas().len()
    );
    Ok(())
}

/// Show per-entity row counts and recent runs
pub fn handle_status(connection: &ConnectionArgs, args: &StatusArgs) -> Result<(), CliError> {
    let config = connection.load_config()?;
    let service = open_service(&config, &connection.config_dir)?;
    let catalog = Catalog::northwind();

    let mut entities = Vec::new();
    for schema in catalog.schemas() {
        entities.push(EntityCount {
            entity: schema.name,
            rows: service.count(schema)?,
        });
    }
    let report = StatusReport {
        backend: service.backend_type(),
        entities,
        runs: service.recent_runs(args.limit)?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Backend: {}\n", report.backend);
    let counts: Vec<Vec<String>> = report
        .entities
        .iter()
        .map(|e| vec![e.entity.to_string(), e.rows.to_string()])
        .collect();
    println!("{}\n", format_table(&["entity", "rows"], &counts));

    let runs: Vec<Vec<String>> = report
        .runs
        .iter()
        .map(|run| {
            vec![
                run.finished_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                run.entity.clone(),
                run.created.to_string(),
                run.updated.to_string(),
                run.skipped.to_string(),
                String::from(if run.committed { "yes" } else { "no" }),
                run.source.clone(),
            ]
        })
        .collect();
    println!(
        "{}",
        format_table(
            &["finished", "entity", "created", "updated", "skipped", "committed", "source"],
            &runs
        )
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseBackendType;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_sample_config_once() {
        let dir = TempDir::new().unwrap();
        let connection = ConnectionArgs {
            config_dir: dir.path().to_path_buf(),
            database: None,
            backend: Some(DatabaseBackendType::Memory),
        };

        handle_init(&connection, &InitArgs::default()).unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), sample_config());

        std::fs::write(&path, "[import]\nskip_errors = true\n").unwrap();
        handle_init(&connection, &InitArgs::default()).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "[import]\nskip_errors = true\n"
        );
    }
}
