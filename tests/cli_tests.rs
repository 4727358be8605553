//! CLI command tests

#[cfg(feature = "cli")]
use northwind_import::cli::commands::ConnectionArgs;
#[cfg(feature = "cli")]
use northwind_import::cli::commands::db::{StatusArgs, handle_status};
#[cfg(feature = "cli")]
use northwind_import::cli::commands::import::{
    ImportAllArgs, ImportArgs, ImportOverrides, handle_import, handle_import_all,
};
#[cfg(feature = "cli")]
use northwind_import::cli::commands::tools::{
    AssignArgs, DiffArgs, SplitArgs, handle_assign, handle_diff, handle_split,
};
#[cfg(feature = "cli")]
use northwind_import::cli::error::CliError;
#[cfg(feature = "cli")]
use northwind_import::database::DatabaseBackendType;
#[cfg(feature = "cli")]
use northwind_import::import::{Encoding, ImportError};
#[cfg(feature = "cli")]
use tempfile::TempDir;

#[cfg(feature = "cli")]
fn memory(dir: &TempDir) -> ConnectionArgs {
    ConnectionArgs {
        config_dir: dir.path().to_path_buf(),
        database: None,
        backend: Some(DatabaseBackendType::Memory),
    }
}

#[cfg(feature = "cli")]
#[test]
fn test_cli_import_single_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("regions.csv");
    std::fs::write(&path, "region_id|region_description\n1|Eastern\n2|Western\n").unwrap();

    let args = ImportArgs {
        entity: "regions".to_string(),
        path,
        overrides: ImportOverrides::default(),
        json: true,
    };
    handle_import(&memory(&dir), &args).unwrap();
}

#[cfg(feature = "cli")]
#[test]
fn test_cli_import_missing_file() {
    let dir = TempDir::new().unwrap();
    let args = ImportArgs {
        entity: "regions".to_string(),
        path: dir.path().join("regions.csv"),
        overrides: ImportOverrides::default(),
        json: false,
    };

    let err = handle_import(&memory(&dir), &args).unwrap_err();
    assert!(matches!(
        err,
        CliError::ImportError(ImportError::FileNotFound(_))
    ));
}

#[cfg(feature = "cli")]
#[test]
fn test_cli_import_fails_fast_on_bad_row() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shippers.csv");
    std::fs::write(&path, "shipper_id,company_name\n1,Speedy Express\nx,United Package\n").unwrap();

    let mut args = ImportArgs {
        entity: "shippers".to_string(),
        path,
        overrides: ImportOverrides::default(),
        json: false,
    };
    let err = handle_import(&memory(&dir), &args).unwrap_err();
    assert!(matches!(
        err,
        CliError::ImportError(ImportError::RecordFailed(_))
    ));

    args.overrides.skip_errors = true;
    handle_import(&memory(&dir), &args).unwrap();
}

#[cfg(all(feature = "cli", feature = "duckdb-backend"))]
#[test]
fn test_cli_import_all_in_dependency_order() {
    use northwind_import::database::{DuckDBBackend, PersistenceService};
    use northwind_import::schema::Catalog;

    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir(&data).unwrap();
    std::fs::write(
        data.join("territories.csv"),
        "territory_id,territory_description,region_id\n01581,Westboro,1\n",
    )
    .unwrap();
    std::fs::write(
        data.join("regions.csv"),
        "region_id,region_description\n1,Eastern\n",
    )
    .unwrap();
    std::fs::write(data.join("employees.csv"), "employee_id|reports_to\n1|2\n2|\n").unwrap();

    let db_path = dir.path().join("northwind.duckdb");
    let connection = ConnectionArgs {
        config_dir: dir.path().to_path_buf(),
        database: Some(db_path.clone()),
        backend: Some(DatabaseBackendType::DuckDB),
    };
    let args = ImportAllArgs {
        dir: data,
        overrides: ImportOverrides::default(),
        json: false,
    };
    handle_import_all(&connection, &args).unwrap();
    handle_status(
        &connection,
        &StatusArgs {
            limit: 5,
            json: false,
        },
    )
    .unwrap();

    let catalog = Catalog::northwind();
    let backend = DuckDBBackend::new(&db_path).unwrap();
    for (entity, rows) in [("regions", 1), ("territories", 1), ("employees", 2)] {
        assert_eq!(backend.count(catalog.get(entity).unwrap()).unwrap(), rows);
    }
    assert_eq!(backend.recent_runs(10).unwrap().len(), 3);
}

#[cfg(feature = "cli")]
#[test]
fn test_cli_diff_and_split() {
    let dir = TempDir::new().unwrap();
    let reference = dir.path().join("reference.csv");
    let orders = dir.path().join("orders.csv");
    std::fs::write(&reference, "order_id\n10248\n").unwrap();
    std::fs::write(&orders, "order_id|ship_name\n10248|Vins\n10249|Toms\n10250|Hanari\n").unwrap();

    let output = dir.path().join("fixtures").join("unmatched.csv");
    handle_diff(&DiffArgs {
        reference,
        candidate: orders,
        key: "order_id".to_string(),
        output: output.clone(),
        encoding: Encoding::Auto,
    })
    .unwrap();
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "order_id,ship_name\n10249,Toms\n10250,Hanari\n"
    );

    let prefix = dir.path().join("chunk").display().to_string();
    handle_split(&SplitArgs {
        input: output,
        rows: 1,
        prefix: prefix.clone(),
        encoding: Encoding::Auto,
    })
    .unwrap();
    assert_eq!(
        std::fs::read_to_string(format!("{}_2.csv", prefix)).unwrap(),
        "order_id,ship_name\n10250,Hanari\n"
    );
}

#[cfg(feature = "cli")]
#[test]
fn test_cli_assign_ids() {
    let dir = TempDir::new().unwrap();
    let customers = dir.path().join("customers.csv");
    std::fs::write(
        &customers,
        "customer_id,company_name\nALFKI,Alfreds Futterkiste\nANATR,Ana Trujillo\n",
    )
    .unwrap();

    handle_assign(&AssignArgs {
        input: customers.clone(),
        column: "user_id".to_string(),
        start: 105,
        output: None,
        encoding: Encoding::Auto,
    })
    .unwrap();
    assert_eq!(
        std::fs::read_to_string(&customers).unwrap(),
        "customer_id,company_name,user_id\nALFKI,Alfreds Futterkiste,105\nANATR,Ana Trujillo,106\n"
    );
}
