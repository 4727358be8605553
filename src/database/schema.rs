//! Database schema definitions
//!
//! Tables are generated from the entity schemas: a surrogate `id` drawn
//! from a per-table sequence, one column per field or reference, and the
//! audit timestamps. Natural keys get a plain index; uniqueness is checked
//! by the backend before writing.

use crate::schema::EntitySchema;

/// Schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Name of the run ledger table
pub const IMPORT_RUNS_TABLE: &str = "import_runs";

/// Columns maintained by the backend on every entity table
pub const AUDIT_COLUMNS: &[&str] = &["created_at", "updated_at"];

/// Database schema helper
pub struct DatabaseSchema;

impl DatabaseSchema {
    /// Quote an identifier, doubling embedded quotes
    pub fn quote(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Name of the sequence feeding an entity table's `id`
    pub fn sequence_name(schema: &EntitySchema) -> String {
        format!("{}_id_seq", schema.name)
    }

    /// Ledger and schema version tables
    pub fn create_ledger_sql() -> &'static str {
        r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- One row per imported file, written outside the batch transaction
CREATE TABLE IF NOT EXISTS import_runs (
    id VARCHAR PRIMARY KEY,
    entity VARCHAR NOT NULL,
    source VARCHAR NOT NULL,
    sha256 VARCHAR NOT NULL,
    rows_read BIGINT NOT NULL,
    created BIGINT NOT NULL,
    updated BIGINT NOT NULL,
    skipped BIGINT NOT NULL,
    committed BOOLEAN NOT NULL,
    started_at VARCHAR NOT NULL,
    finished_at VARCHAR NOT NULL
);
"#
    }

    /// Sequence, table and key index for one entity type
    pub fn create_entity_sql(schema: &EntitySchema) -> String {
        let table = Self::quote(schema.name);
        let mut columns = vec![format!("    {} BIGINT PRIMARY KEY", Self::quote("id"))];
        for (name, kind) in schema.columns() {
            let not_null = if schema.key.contains(&name) {
                " NOT NULL"
            } else {
                ""
            };
            columns.push(format!(
                "    {} {}{}",
                Self::quote(name),
                kind.sql_type(),
                not_null
            ));
        }
        for audit in AUDIT_COLUMNS {
            columns.push(format!("    {} TIMESTAMP NOT NULL", Self::quote(audit)));
        }

        let mut sql = format!(
            "CREATE SEQUENCE IF NOT EXISTS {} START 1;\nCREATE TABLE IF NOT EXISTS {} (\n{}\n);\n",
            Self::quote(&Self::sequence_name(schema)),
            table,
            columns.join(",\n")
        );

        if !schema.key.is_empty() {
            let key_columns: Vec<String> = schema.key.iter().map(|c| Self::quote(c)).collect();
            sql.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({});\n",
                Self::quote(&format!("idx_{}_key", schema.name)),
                table,
                key_columns.join(", ")
            ));
        }

        sql
    }

    pub fn record_schema_version_sql() -> &'static str {
        "INSERT INTO schema_version (version) VALUES (?) ON CONFLICT (version) DO NOTHING"
    }
}
