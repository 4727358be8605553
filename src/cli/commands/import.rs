//! Import CLI commands

use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use super::{ConnectionArgs, open_service};
use crate::cli::error::CliError;
use crate::database::{ImportRun, ImportSection};
use crate::import::{BatchResult, Encoding, ImportOptions, import_file};
use crate::schema::Catalog;

/// Flags adjusting the configured import defaults
#[derive(Debug, Clone, Default)]
pub struct ImportOverrides {
    pub skip_errors: bool,
    pub no_atomic: bool,
    pub strict_header: bool,
    pub delimiter: Option<char>,
    pub encoding: Option<Encoding>,
}

impl ImportOverrides {
    /// Options from `section` with these flags applied
    pub fn options(&self, section: &ImportSection) -> Result<ImportOptions, CliError> {
        let mut section = section.clone();
        if self.skip_errors {
            section.skip_errors = true;
        }
        if self.no_atomic {
            section.atomic = false;
        }
        if self.strict_header {
            section.strict_header = true;
        }
        if let Some(delimiter) = self.delimiter {
            section.delimiter = Some(delimiter);
        }
        if let Some(encoding) = self.encoding {
            section.encoding = encoding;
        }
        Ok(section.to_options()?)
    }
}

/// Import command arguments
#[derive(Debug, Clone)]
pub struct ImportArgs {
    /// Entity type (e.g. "customers")
    pub entity: String,
    /// Input file
    pub path: PathBuf,
    pub overrides: ImportOverrides,
    /// Print the summary as JSON
    pub json: bool,
}

/// Import-all command arguments
#[derive(Debug, Clone)]
pub struct ImportAllArgs {
    /// Directory holding one `<entity>.csv` per entity type
    pub dir: PathBuf,
    pub overrides: ImportOverrides,
    pub json: bool,
}

#[derive(Serialize)]
struct ImportReport<'a> {
    result: &'a BatchResult,
    run: &'a ImportRun,
}

/// Import one file
pub fn handle_import(connection: &ConnectionArgs, args: &ImportArgs) -> Result<(), CliError> {
    let config = connection.load_config()?;
    let options = args.overrides.options(&config.import)?;
    let catalog = Catalog::northwind();
    let service = open_service(&config, &connection.config_dir)?;

    let (result, run) = import_file(&catalog, &args.entity, &args.path, service.as_ref(), &options)?;
    print_report(&[(result, run)], args.json)
}

/// Import every entity file found in a directory, targets before dependents
///
/// Entity types without a file are skipped. The first failing file stops
/// the run.
pub fn handle_import_all(
    connection: &ConnectionArgs,
    args: &ImportAllArgs,
) -> Result<(), CliError> {
    if !args.dir.is_dir() {
        return Err(CliError::DirectoryNotFound(args.dir.clone()));
    }

    let config = connection.load_config()?;
    let options = args.overrides.options(&config.import)?;
    let catalog = Catalog::northwind();
    let service = open_service(&config, &connection.config_dir)?;

    let mut reports = Vec::new();
    for schema in catalog.import_order().map_err(crate::import::ImportError::from)? {
        let path = args.dir.join(format!("{}.csv", schema.name));
        if !path.is_file() {
            info!(entity = schema.name, path = %path.display(), "No input file, skipping");
            continue;
        }
        reports.push(import_file(&catalog, schema.name, &path, service.as_ref(), &options)?);
    }

    if reports.is_empty() {
        return Err(CliError::InvalidArgument(format!(
            "no entity files found in {}",
            args.dir.display()
        )));
    }
    print_report(&reports, args.json)
}

fn print_report(reports: &[(BatchResult, ImportRun)], json: bool) -> Result<(), CliError> {
    if json {
        let rendered: Vec<ImportReport<'_>> = reports
            .iter()
            .map(|(result, run)| ImportReport { result, run })
            .collect();
        let output = match rendered.as_slice() {
            [single] => serde_json::to_string_pretty(single)?,
            many => serde_json::to_string_pretty(many)?,
        };
        println!("{}", output);
        return Ok(());
    }

    for (result, run) in reports {
        println!("{}", result);
        println!("  Run: {}", run.id);
        for failure in &result.failures {
            println!("  - {}", failure);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_on_top_of_config() {
        let section = ImportSection::default();
        let overrides = ImportOverrides {
            skip_errors: true,
            no_atomic: true,
            delimiter: Some('|'),
            ..Default::default()
        };
        let options = overrides.options(&section).unwrap();
        assert!(options.skip_errors);
        assert!(!options.atomic);
        assert!(!options.strict_header);
        assert_eq!(options.delimiter, Some(b'|'));
        assert_eq!(options.encoding, Encoding::Auto);
    }

    #[test]
    fn test_import_all_requires_directory() {
        let args = ImportAllArgs {
            dir: PathBuf::from("/nonexistent/northwind"),
            overrides: ImportOverrides::default(),
            json: false,
        };
        let err = handle_import_all(&ConnectionArgs::default(), &args).unwrap_err();
        assert!(matches!(err, CliError::DirectoryNotFound(_)));
    }
}
