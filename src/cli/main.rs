//! CLI binary entry point for northwind-import

#[cfg(feature = "cli")]
use clap::{Args, CommandFactory, Parser, Subcommand, error::ErrorKind};
#[cfg(feature = "cli")]
use northwind_import::cli::commands::db::{InitArgs, StatusArgs, handle_init, handle_status};
#[cfg(feature = "cli")]
use northwind_import::cli::commands::import::{
    ImportAllArgs, ImportArgs, ImportOverrides, handle_import, handle_import_all,
};
#[cfg(feature = "cli")]
use northwind_import::cli::commands::tools::{
    AssignArgs, DiffArgs, SplitArgs, handle_assign, handle_diff, handle_split,
};
#[cfg(feature = "cli")]
use northwind_import::cli::commands::ConnectionArgs;
#[cfg(feature = "cli")]
use northwind_import::database::DatabaseBackendType;
#[cfg(feature = "cli")]
use northwind_import::import::Encoding;
#[cfg(feature = "cli")]
use northwind_import::tools::{
    DEFAULT_CHUNK_PREFIX, DEFAULT_FIRST_ID, DEFAULT_ID_COLUMN, DEFAULT_ROWS_PER_CHUNK,
};
#[cfg(feature = "cli")]
use std::path::PathBuf;
#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "northwind-import")]
#[command(about = "Import Northwind CSV exports with validated, idempotent upserts")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Increase log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Directory holding northwind-import.toml
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,
    /// DuckDB database file
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    /// Database backend (duckdb, memory)
    #[arg(long, global = true)]
    backend: Option<DatabaseBackendType>,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    direct: DirectImport,
}

/// `northwind-import <entity> <path>`
#[cfg(feature = "cli")]
#[derive(Args)]
struct DirectImport {
    /// Entity type (regions, territories, employees, ...)
    entity: Option<String>,
    /// Input file
    path: Option<PathBuf>,
    #[command(flatten)]
    flags: ImportFlags,
}

#[cfg(feature = "cli")]
#[derive(Args, Clone)]
struct ImportFlags {
    /// Log and skip failing rows instead of aborting
    #[arg(long)]
    skip_errors: bool,
    /// Commit every row on its own instead of the whole file at once
    #[arg(long)]
    no_atomic: bool,
    /// Reject header columns the entity does not know
    #[arg(long)]
    strict_header: bool,
    /// Field delimiter (detected from the header by default)
    #[arg(long)]
    delimiter: Option<char>,
    /// Input encoding (utf8, latin1, auto)
    #[arg(long)]
    encoding: Option<Encoding>,
    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[cfg(feature = "cli")]
impl ImportFlags {
    fn overrides(&self) -> ImportOverrides {
        ImportOverrides {
            skip_errors: self.skip_errors,
            no_atomic: self.no_atomic,
            strict_header: self.strict_header,
            delimiter: self.delimiter,
            encoding: self.encoding,
        }
    }
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Import one entity file
    Import {
        /// Entity type (regions, territories, employees, ...)
        entity: String,
        /// Input file
        path: PathBuf,
        #[command(flatten)]
        flags: ImportFlags,
    },
    /// Import every <entity>.csv in a directory in dependency order
    ImportAll {
        /// Directory holding the entity files
        dir: PathBuf,
        #[command(flatten)]
        flags: ImportFlags,
    },
    /// Write a sample configuration and create the database schema
    Init {
        /// Overwrite an existing configuration file
        #[arg(short, long)]
        force: bool,
    },
    /// Show row counts and recent import runs
    Status {
        /// Number of runs to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write candidate rows whose key is missing from a reference file
    Diff {
        /// File holding the known keys
        reference: PathBuf,
        /// File whose unmatched rows are written
        candidate: PathBuf,
        /// Key column
        #[arg(short, long, default_value = "order_id")]
        key: String,
        /// Output file
        #[arg(short, long, default_value = "fixtures/unmatched.csv")]
        output: PathBuf,
        /// Input encoding (utf8, latin1, auto)
        #[arg(long, default_value = "auto")]
        encoding: Encoding,
    },
    /// Split a file into chunks that each carry the header
    Split {
        /// File to split
        input: PathBuf,
        /// Data rows per chunk
        #[arg(short, long, default_value_t = DEFAULT_ROWS_PER_CHUNK)]
        rows: usize,
        /// Chunk file prefix; chunks are named <prefix>_<n>.csv
        #[arg(short, long, default_value = DEFAULT_CHUNK_PREFIX)]
        prefix: String,
        /// Input encoding (utf8, latin1, auto)
        #[arg(long, default_value = "auto")]
        encoding: Encoding,
    },
    /// Number the rows of a file in an id column
    AssignIds {
        /// File to update
        input: PathBuf,
        /// Id column, appended when the file lacks it
        #[arg(short, long, default_value = DEFAULT_ID_COLUMN)]
        column: String,
        /// First id
        #[arg(short, long, default_value_t = DEFAULT_FIRST_ID)]
        start: i64,
        /// Output file; the input is rewritten when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Input encoding (utf8, latin1, auto)
        #[arg(long, default_value = "auto")]
        encoding: Encoding,
    },
}

#[cfg(feature = "cli")]
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let default_filter = format!("northwind_import={}", level);
    let filter = if verbose == 0 {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| default_filter.into())
    } else {
        default_filter.into()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let connection = ConnectionArgs {
        config_dir: cli.config_dir,
        database: cli.database,
        backend: cli.backend,
    };

    let result = match cli.command {
        Some(Commands::Import {
            entity,
            path,
            flags,
        }) => handle_import(
            &connection,
            &ImportArgs {
                entity,
                path,
                overrides: flags.overrides(),
                json: flags.json,
            },
        ),
        Some(Commands::ImportAll { dir, flags }) => handle_import_all(
            &connection,
            &ImportAllArgs {
                dir,
                overrides: flags.overrides(),
                json: flags.json,
            },
        ),
        Some(Commands::Init { force }) => handle_init(&connection, &InitArgs { force }),
        Some(Commands::Status { limit, json }) => {
            handle_status(&connection, &StatusArgs { limit, json })
        }
        Some(Commands::Diff {
            reference,
            candidate,
            key,
            output,
            encoding,
        }) => handle_diff(&DiffArgs {
            reference,
            candidate,
            key,
            output,
            encoding,
        }),
        Some(Commands::Split {
            input,
            rows,
            prefix,
            encoding,
        }) => handle_split(&SplitArgs {
            input,
            rows,
            prefix,
            encoding,
        }),
        Some(Commands::AssignIds {
            input,
            column,
            start,
            output,
            encoding,
        }) => handle_assign(&AssignArgs {
            input,
            column,
            start,
            output,
            encoding,
        }),
        None => {
            let DirectImport {
                entity,
                path,
                flags,
            } = cli.direct;
            let (Some(entity), Some(path)) = (entity, path) else {
                Cli::command()
                    .error(
                        ErrorKind::MissingRequiredArgument,
                        "expected <ENTITY> <PATH> or a subcommand",
                    )
                    .exit();
            };
            handle_import(
                &connection,
                &ImportArgs {
                    entity,
                    path,
                    overrides: flags.overrides(),
                    json: flags.json,
                },
            )
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
