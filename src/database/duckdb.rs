//! DuckDB database backend implementation
//!
//! Provides an embedded database backend using DuckDB. Every value is bound
//! as text and cast to the column type in SQL, and read back as text, so
//! the storage form of [`FieldValue`] is the only conversion in play.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::schema::{AUDIT_COLUMNS, DatabaseSchema, SCHEMA_VERSION};
use super::{DatabaseError, DatabaseResult, ImportRun, PersistenceService, check_columns};
use crate::models::{Entity, EntityId, FieldKind, FieldMap, FieldValue, NaturalKey};
use crate::schema::EntitySchema;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// DuckDB database backend
///
/// Supports both file-based persistence and in-memory mode.
pub struct DuckDBBackend {
    /// Path to the database file (None for in-memory)
    db_path: Option<PathBuf>,
    /// DuckDB connection (wrapped in Mutex for thread safety)
    connection: Mutex<duckdb::Connection>,
    in_transaction: AtomicBool,
}

fn query_failed(context: &'static str) -> impl Fn(duckdb::Error) -> DatabaseError {
    move |e| DatabaseError::QueryFailed(format!("{}: {}", context, e))
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(raw: Option<&str>) -> DatabaseResult<DateTime<Utc>> {
    let raw = raw.ok_or_else(|| {
        DatabaseError::SerializationError("missing audit timestamp".to_string())
    })?;
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|dt| dt.and_utc())
        .map_err(|e| {
            DatabaseError::SerializationError(format!("invalid timestamp '{}': {}", raw, e))
        })
}

impl DuckDBBackend {
    /// Create a new DuckDB backend with a file-based database
    pub fn new(db_path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let connection = duckdb::Connection::open(&path).map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to open DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: Some(path),
            connection: Mutex::new(connection),
            in_transaction: AtomicBool::new(false),
        })
    }

    /// Create an in-memory DuckDB backend
    ///
    /// Useful for testing or dry runs where persistence is not needed.
    pub fn in_memory() -> DatabaseResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to create in-memory DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: None,
            connection: Mutex::new(connection),
            in_transaction: AtomicBool::new(false),
        })
    }

    /// Get the database file path (None for in-memory)
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Check if this is an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }

    fn lock(&self) -> DatabaseResult<MutexGuard<'_, duckdb::Connection>> {
        self.connection
            .lock()
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Lock error: {}", e)))
    }

    /// Execute multiple SQL statements
    fn execute_batch(&self, sql: &str) -> DatabaseResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Batch execute failed: {}", e)))
    }

    fn column_type(schema: &EntitySchema, column: &str) -> DatabaseResult<FieldKind> {
        schema.column_kind(column).ok_or_else(|| {
            DatabaseError::InvalidInput(format!("{} has no column '{}'", schema.name, column))
        })
    }

    /// `SELECT` of the id, every column as text, and the audit timestamps
    fn select_sql(schema: &EntitySchema) -> String {
        let columns: Vec<String> = std::iter::once(DatabaseSchema::quote("id"))
            .chain(
                schema
                    .columns()
                    .into_iter()
                    .map(|(name, _)| name)
                    .chain(AUDIT_COLUMNS.iter().copied())
                    .map(|name| format!("CAST({} AS VARCHAR)", DatabaseSchema::quote(name))),
            )
            .collect();
        format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            DatabaseSchema::quote(schema.name)
        )
    }

    /// `WHERE` clause and parameters matching a natural key
    fn key_clause(
        schema: &EntitySchema,
        key: &NaturalKey,
    ) -> DatabaseResult<(String, Vec<Option<String>>)> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        for (column, value) in key.parts() {
            let kind = Self::column_type(schema, column)?;
            if value.is_null() {
                conditions.push(format!("{} IS NULL", DatabaseSchema::quote(column)));
            } else {
                conditions.push(format!(
                    "{} = CAST(? AS {})",
                    DatabaseSchema::quote(column),
                    kind.sql_type()
                ));
                params.push(value.to_storage());
            }
        }
        if conditions.is_empty() {
            return Err(DatabaseError::InvalidInput(format!(
                "empty natural key for {}",
                schema.name
            )));
        }
        Ok((conditions.join(" AND "), params))
    }

    fn fetch_one(
        conn: &duckdb::Connection,
        schema: &EntitySchema,
        where_sql: &str,
        params: Vec<Option<String>>,
    ) -> DatabaseResult<Option<Entity>> {
        let sql = format!("{} WHERE {} LIMIT 1", Self::select_sql(schema), where_sql);
        let mut stmt = conn.prepare(&sql).map_err(query_failed("Prepare failed"))?;
        let mut rows = stmt
            .query(duckdb::params_from_iter(params))
            .map_err(query_failed("Query failed"))?;

        let Some(row) = rows.next().map_err(query_failed("Row fetch error"))? else {
            return Ok(None);
        };

        let id: EntityId = row.get(0).map_err(query_failed("Row fetch error"))?;
        let columns = schema.columns();
        let mut raw = Vec::with_capacity(columns.len() + AUDIT_COLUMNS.len());
        for index in 1..=columns.len() + AUDIT_COLUMNS.len() {
            raw.push(
                row.get::<_, Option<String>>(index)
                    .map_err(query_failed("Row fetch error"))?,
            );
        }

        let mut fields = FieldMap::new();
        for ((name, kind), value) in columns.iter().zip(raw.iter()) {
            let value = FieldValue::from_storage(*kind, value.as_deref())
                .map_err(DatabaseError::SerializationError)?;
            fields.insert(name.to_string(), value);
        }

        Ok(Some(Entity {
            id,
            entity: schema.name.to_string(),
            fields,
            created_at: parse_timestamp(raw[columns.len()].as_deref())?,
            updated_at: parse_timestamp(raw[columns.len() + 1].as_deref())?,
        }))
    }

    fn fetch_by_id(
        conn: &duckdb::Connection,
        schema: &EntitySchema,
        id: EntityId,
    ) -> DatabaseResult<Entity> {
        Self::fetch_one(
            conn,
            schema,
            "\"id\" = CAST(? AS BIGINT)",
            vec![Some(id.to_string())],
        )?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: schema.name.to_string(),
            id,
        })
    }

    /// Fail when a unique column value is already held by another entity
    fn check_unique(
        conn: &duckdb::Connection,
        schema: &EntitySchema,
        fields: &FieldMap,
        own_id: Option<EntityId>,
    ) -> DatabaseResult<()> {
        for column in schema.unique_columns() {
            let Some(value) = fields.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let kind = Self::column_type(schema, column)?;
            let mut sql = format!(
                "SELECT COUNT(*) FROM {} WHERE {} = CAST(? AS {})",
                DatabaseSchema::quote(schema.name),
                DatabaseSchema::quote(column),
                kind.sql_type()
            );
            let mut params = vec![value.to_storage()];
            if let Some(id) = own_id {
                sql.push_str(" AND \"id\" <> CAST(? AS BIGINT)");
                params.push(Some(id.to_string()));
            }

            let taken: i64 = conn
                .query_row(&sql, duckdb::params_from_iter(params), |row| row.get(0))
                .map_err(query_failed("Unique check failed"))?;
            if taken > 0 {
                return Err(DatabaseError::DuplicateKey {
                    entity: schema.name.to_string(),
                    column: column.to_string(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    fn update(
        conn: &duckdb::Connection,
        schema: &EntitySchema,
        id: EntityId,
        fields: &FieldMap,
    ) -> DatabaseResult<()> {
        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (column, value) in fields {
            if schema.key.contains(&column.as_str()) {
                continue;
            }
            let kind = Self::column_type(schema, column)?;
            assignments.push(format!(
                "{} = CAST(? AS {})",
                DatabaseSchema::quote(column),
                kind.sql_type()
            ));
            params.push(value.to_storage());
        }
        assignments.push("\"updated_at\" = CAST(? AS TIMESTAMP)".to_string());
        params.push(Some(format_timestamp(Utc::now())));
        params.push(Some(id.to_string()));

        let sql = format!(
            "UPDATE {} SET {} WHERE \"id\" = CAST(? AS BIGINT)",
            DatabaseSchema::quote(schema.name),
            assignments.join(", ")
        );
        conn.execute(&sql, duckdb::params_from_iter(params))
            .map_err(query_failed("Update failed"))?;
        Ok(())
    }

    fn insert(
        conn: &duckdb::Connection,
        schema: &EntitySchema,
        key: &NaturalKey,
        fields: &FieldMap,
    ) -> DatabaseResult<EntityId> {
        let id: EntityId = conn
            .query_row(
                &format!("SELECT nextval('{}')", DatabaseSchema::sequence_name(schema)),
                [],
                |row| row.get(0),
            )
            .map_err(query_failed("Sequence failed"))?;

        let mut stored = fields.clone();
        stored.extend(key.parts().iter().cloned());

        let now = format_timestamp(Utc::now());
        let mut columns = vec![DatabaseSchema::quote("id")];
        let mut placeholders = vec!["CAST(? AS BIGINT)".to_string()];
        let mut params = vec![Some(id.to_string())];
        for (column, value) in &stored {
            let kind = Self::column_type(schema, column)?;
            columns.push(DatabaseSchema::quote(column));
            placeholders.push(format!("CAST(? AS {})", kind.sql_type()));
            params.push(value.to_storage());
        }
        for audit in AUDIT_COLUMNS {
            columns.push(DatabaseSchema::quote(audit));
            placeholders.push("CAST(? AS TIMESTAMP)".to_string());
            params.push(Some(now.clone()));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            DatabaseSchema::quote(schema.name),
            columns.join(", "),
            placeholders.join(", ")
        );
        conn.execute(&sql, duckdb::params_from_iter(params))
            .map_err(query_failed("Insert failed"))?;
        Ok(id)
    }

    fn transaction_statement(&self, sql: &str, opening: bool) -> DatabaseResult<()> {
        let active = self.in_transaction.load(Ordering::SeqCst);
        if active == opening {
            let reason = if opening {
                "a transaction is already active"
            } else {
                "no active transaction"
            };
            return Err(DatabaseError::TransactionFailed(reason.to_string()));
        }

        let conn = self.lock()?;
        conn.execute_batch(sql)
            .map_err(|e| DatabaseError::TransactionFailed(format!("{} failed: {}", sql, e)))?;
        self.in_transaction.store(opening, Ordering::SeqCst);
        Ok(())
    }
}

impl PersistenceService for DuckDBBackend {
    fn initialize(&self, schemas: &[EntitySchema]) -> DatabaseResult<()> {
        self.execute_batch(DatabaseSchema::create_ledger_sql())?;
        for schema in schemas {
            self.execute_batch(&DatabaseSchema::create_entity_sql(schema))
                .map_err(|e| {
                    DatabaseError::MigrationFailed(format!("{}: {}", schema.name, e))
                })?;
        }

        let conn = self.lock()?;
        conn.execute(DatabaseSchema::record_schema_version_sql(), [SCHEMA_VERSION])
            .map_err(|e| {
                DatabaseError::MigrationFailed(format!("Failed to record schema version: {}", e))
            })?;

        Ok(())
    }

    fn get_by_key(
        &self,
        schema: &EntitySchema,
        key: &NaturalKey,
    ) -> DatabaseResult<Option<Entity>> {
        let (where_sql, params) = Self::key_clause(schema, key)?;
        let conn = self.lock()?;
        Self::fetch_one(&conn, schema, &where_sql, params)
    }

    fn upsert(
        &self,
        schema: &EntitySchema,
        key: &NaturalKey,
        fields: &FieldMap,
    ) -> DatabaseResult<(Entity, bool)> {
        check_columns(schema, fields)?;
        let (where_sql, key_params) = Self::key_clause(schema, key)?;

        let conn = self.lock()?;
        let existing = Self::fetch_one(&conn, schema, &where_sql, key_params)?;
        let existing_id = existing.as_ref().map(|entity| entity.id);
        Self::check_unique(&conn, schema, fields, existing_id)?;

        match existing_id {
            Some(id) => {
                Self::update(&conn, schema, id, fields)?;
                Ok((Self::fetch_by_id(&conn, schema, id)?, false))
            }
            None => {
                let id = Self::insert(&conn, schema, key, fields)?;
                Ok((Self::fetch_by_id(&conn, schema, id)?, true))
            }
        }
    }

    fn set_reference(
        &self,
        schema: &EntitySchema,
        id: EntityId,
        column: &str,
        target: Option<EntityId>,
    ) -> DatabaseResult<()> {
        if schema.reference_by_column(column).is_none() {
            return Err(DatabaseError::InvalidInput(format!(
                "{} has no reference column '{}'",
                schema.name, column
            )));
        }

        let sql = format!(
            "UPDATE {} SET {} = CAST(? AS BIGINT), \"updated_at\" = CAST(? AS TIMESTAMP) WHERE \"id\" = CAST(? AS BIGINT)",
            DatabaseSchema::quote(schema.name),
            DatabaseSchema::quote(column)
        );
        let params = vec![
            target.map(|t| t.to_string()),
            Some(format_timestamp(Utc::now())),
            Some(id.to_string()),
        ];

        let conn = self.lock()?;
        let changed = conn
            .execute(&sql, duckdb::params_from_iter(params))
            .map_err(query_failed("Update failed"))?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: schema.name.to_string(),
                id,
            });
        }
        Ok(())
    }

    fn count(&self, schema: &EntitySchema) -> DatabaseResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", DatabaseSchema::quote(schema.name)),
                [],
                |row| row.get(0),
            )
            .map_err(query_failed("Count failed"))?;
        Ok(count.max(0) as u64)
    }

    fn begin(&self) -> DatabaseResult<()> {
        self.transaction_statement("BEGIN TRANSACTION", true)
    }

    fn commit(&self) -> DatabaseResult<()> {
        self.transaction_statement("COMMIT", false)
    }

    fn rollback(&self) -> DatabaseResult<()> {
        self.transaction_statement("ROLLBACK", false)
    }

    /// Timestamps are stored as fixed-width RFC 3339 text so they sort by time
    fn record_run(&self, run: &ImportRun) -> DatabaseResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO import_runs (id, entity, source, sha256, rows_read, created, updated,
                                     skipped, committed, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            duckdb::params![
                run.id.to_string(),
                &run.entity,
                &run.source,
                &run.sha256,
                run.rows_read as i64,
                run.created as i64,
                run.updated as i64,
                run.skipped as i64,
                run.committed,
                run.started_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                run.finished_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )
        .map_err(query_failed("Failed to record import run"))?;
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> DatabaseResult<Vec<ImportRun>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, entity, source, sha256, rows_read, created, updated,
                       skipped, committed, started_at, finished_at
                FROM import_runs
                ORDER BY started_at DESC
                LIMIT ?
                "#,
            )
            .map_err(query_failed("Prepare failed"))?;

        type RunRow = (
            String,
            String,
            String,
            String,
            i64,
            i64,
            i64,
            i64,
            bool,
            String,
            String,
        );
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                ))
            })
            .map_err(query_failed("Query failed"))?;

        let mut runs = Vec::new();
        for row in rows {
            let row: RunRow = row.map_err(query_failed("Row fetch error"))?;
            let (id, entity, source, sha256) = (row.0, row.1, row.2, row.3);
            let (rows_read, created, updated, skipped) = (row.4, row.5, row.6, row.7);
            let (committed, started, finished) = (row.8, row.9, row.10);
            let parse_time = |raw: &str| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| DatabaseError::SerializationError(format!("{}: {}", raw, e)))
            };
            runs.push(ImportRun {
                id: Uuid::parse_str(&id)
                    .map_err(|e| DatabaseError::SerializationError(e.to_string()))?,
                entity,
                source,
                sha256,
                rows_read: rows_read.max(0) as u64,
                created: created.max(0) as u64,
                updated: updated.max(0) as u64,
                skipped: skipped.max(0) as u64,
                committed,
                started_at: parse_time(&started)?,
                finished_at: parse_time(&finished)?,
            });
        }
        Ok(runs)
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Catalog;

    fn backend() -> (DuckDBBackend, Catalog) {
        let catalog = Catalog::northwind();
        let backend = DuckDBBackend::in_memory().unwrap();
        backend.initialize(catalog.schemas()).unwrap();
        (backend, catalog)
    }

    #[test]
    fn test_in_memory_database() {
        let backend = DuckDBBackend::in_memory().unwrap();
        assert!(backend.is_in_memory());
        assert!(backend.db_path().is_none());
        assert_eq!(backend.backend_type(), "duckdb");
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (backend, catalog) = backend();
        backend.initialize(catalog.schemas()).unwrap();
        for schema in catalog.schemas() {
            assert_eq!(backend.count(schema).unwrap(), 0);
        }
    }

    #[test]
    fn test_upsert_round_trips_typed_values() {
        let (backend, catalog) = backend();
        let schema = catalog.get("order_details").unwrap();

        let mut fields = FieldMap::new();
        fields.insert("order".to_string(), FieldValue::Reference(10248));
        fields.insert("product".to_string(), FieldValue::Reference(11));
        fields.insert(
            "unit_price".to_string(),
            FieldValue::from(rust_decimal::Decimal::new(1400, 2)),
        );
        fields.insert("quantity".to_string(), FieldValue::Integer(12));
        fields.insert("discount".to_string(), FieldValue::from(rust_decimal::Decimal::ZERO));

        let key = NaturalKey::new(vec![
            ("order".to_string(), FieldValue::Reference(10248)),
            ("product".to_string(), FieldValue::Reference(11)),
        ]);
        let (created, was_created) = backend.upsert(schema, &key, &fields).unwrap();
        assert!(was_created);
        assert_eq!(created.get("unit_price"), &FieldValue::from(rust_decimal::Decimal::from(14)));
        assert_eq!(created.get("quantity"), &FieldValue::Integer(12));

        let (updated, was_created) = backend.upsert(schema, &key, &fields).unwrap();
        assert!(!was_created);
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.fields, created.fields);
        assert_eq!(backend.count(schema).unwrap(), 1);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let (backend, catalog) = backend();
        let schema = catalog.get("regions").unwrap();

        let mut fields = FieldMap::new();
        fields.insert("region_id".to_string(), FieldValue::Integer(1));
        fields.insert("region_description".to_string(), FieldValue::from("Eastern"));
        let key = NaturalKey::single("region_id", FieldValue::Integer(1));

        backend.begin().unwrap();
        backend.upsert(schema, &key, &fields).unwrap();
        backend.rollback().unwrap();
        assert_eq!(backend.count(schema).unwrap(), 0);

        backend.begin().unwrap();
        backend.upsert(schema, &key, &fields).unwrap();
        backend.commit().unwrap();
        assert_eq!(backend.count(schema).unwrap(), 1);
        assert!(backend.commit().is_err());
    }

    #[test]
    fn test_set_reference_and_missing_entity() {
        let (backend, catalog) = backend();
        let schema = catalog.get("employees").unwrap();

        let mut fields = FieldMap::new();
        fields.insert("employee_id".to_string(), FieldValue::Integer(2));
        let key = NaturalKey::single("employee_id", FieldValue::Integer(2));
        let (entity, _) = backend.upsert(schema, &key, &fields).unwrap();

        backend
            .set_reference(schema, entity.id, "reports_to", Some(entity.id))
            .unwrap();
        let stored = backend.get_by_key(schema, &key).unwrap().unwrap();
        assert_eq!(stored.get("reports_to"), &FieldValue::Reference(entity.id));

        assert!(matches!(
            backend.set_reference(schema, 999, "reports_to", None),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn test_ledger_round_trip() {
        let (backend, _) = backend();
        let run = ImportRun {
            id: Uuid::new_v4(),
            entity: "regions".to_string(),
            source: "regions.csv".to_string(),
            sha256: "ab".repeat(32),
            rows_read: 4,
            created: 4,
            updated: 0,
            skipped: 0,
            committed: true,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        backend.record_run(&run).unwrap();

        let runs = backend.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run.id);
        assert_eq!(runs[0].created, 4);
        assert!(runs[0].committed);
    }
}
