//! In-memory persistence backend
//!
//! Keeps every entity table in a map behind a `Mutex`. A transaction is a
//! snapshot of the tables taken at `begin` and restored on `rollback`.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{DatabaseError, DatabaseResult, ImportRun, PersistenceService, check_columns};
use crate::models::{Entity, EntityId, FieldMap, FieldValue, NaturalKey};
use crate::schema::EntitySchema;

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<String, BTreeMap<EntityId, Entity>>,
    next_ids: BTreeMap<String, EntityId>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: Tables,
    snapshot: Option<Tables>,
    runs: Vec<ImportRun>,
}

/// Persistence service holding everything in process memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a transaction is open
    pub fn in_transaction(&self) -> bool {
        self.lock().map(|s| s.snapshot.is_some()).unwrap_or(false)
    }

    /// All stored entities of a type, in id order
    pub fn entities(&self, schema: &EntitySchema) -> DatabaseResult<Vec<Entity>> {
        let state = self.lock()?;
        Ok(state
            .tables
            .rows
            .get(schema.name)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    fn lock(&self) -> DatabaseResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Lock error: {}", e)))
    }
}

/// First unique column whose value another entity already holds
fn unique_conflict<'a>(
    schema: &EntitySchema,
    fields: &FieldMap,
    own_id: Option<EntityId>,
    existing: impl Iterator<Item = &'a Entity> + Clone,
) -> Option<DatabaseError> {
    schema.unique_columns().into_iter().find_map(|column| {
        let value = fields.get(column).filter(|v| !v.is_null())?;
        existing
            .clone()
            .any(|entity| Some(entity.id) != own_id && entity.get(column) == value)
            .then(|| DatabaseError::DuplicateKey {
                entity: schema.name.to_string(),
                column: column.to_string(),
                value: value.to_string(),
            })
    })
}

impl PersistenceService for MemoryBackend {
    fn initialize(&self, schemas: &[EntitySchema]) -> DatabaseResult<()> {
        let mut state = self.lock()?;
        for schema in schemas {
            state
                .tables
                .rows
                .entry(schema.name.to_string())
                .or_default();
        }
        Ok(())
    }

    fn get_by_key(
        &self,
        schema: &EntitySchema,
        key: &NaturalKey,
    ) -> DatabaseResult<Option<Entity>> {
        let state = self.lock()?;
        Ok(state.tables.rows.get(schema.name).and_then(|table| {
            table
                .values()
                .find(|entity| key.matches(&entity.fields))
                .cloned()
        }))
    }

    fn upsert(
        &self,
        schema: &EntitySchema,
        key: &NaturalKey,
        fields: &FieldMap,
    ) -> DatabaseResult<(Entity, bool)> {
        check_columns(schema, fields)?;

        let mut guard = self.lock()?;
        let state = &mut *guard;
        let now = Utc::now();
        let table = state
            .tables
            .rows
            .entry(schema.name.to_string())
            .or_default();

        let existing_id = table
            .values()
            .find(|entity| key.matches(&entity.fields))
            .map(|entity| entity.id);

        if let Some(err) = unique_conflict(schema, fields, existing_id, table.values()) {
            return Err(err);
        }

        if let Some(id) = existing_id {
            let entity = table.get_mut(&id).ok_or_else(|| DatabaseError::NotFound {
                entity: schema.name.to_string(),
                id,
            })?;
            for (column, value) in fields {
                if schema.key.contains(&column.as_str()) {
                    continue;
                }
                entity.fields.insert(column.clone(), value.clone());
            }
            entity.updated_at = now;
            return Ok((entity.clone(), false));
        }

        let next_id = state
            .tables
            .next_ids
            .entry(schema.name.to_string())
            .or_insert(1);
        let id = *next_id;
        *next_id += 1;

        let mut stored: FieldMap = schema
            .columns()
            .into_iter()
            .map(|(column, _)| (column.to_string(), FieldValue::Null))
            .collect();
        stored.extend(fields.iter().map(|(c, v)| (c.clone(), v.clone())));
        stored.extend(key.parts().iter().cloned());

        let entity = Entity {
            id,
            entity: schema.name.to_string(),
            fields: stored,
            created_at: now,
            updated_at: now,
        };
        table.insert(id, entity.clone());
        Ok((entity, true))
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

        let mut state = self.lock()?;
        let entity = state
            .tables
            .rows
            .get_mut(schema.name)
            .and_then(|table| table.get_mut(&id))
            .ok_or_else(|| DatabaseError::NotFound {
                entity: schema.name.to_string(),
                id,
            })?;

        let value = target.map(FieldValue::Reference).unwrap_or(FieldValue::Null);
        entity.fields.insert(column.to_string(), value);
        entity.updated_at = Utc::now();
        Ok(())
    }

    fn count(&self, schema: &EntitySchema) -> DatabaseResult<u64> {
        let state = self.lock()?;
        Ok(state
            .tables
            .rows
            .get(schema.name)
            .map(|table| table.len() as u64)
            .unwrap_or(0))
    }

    fn begin(&self) -> DatabaseResult<()> {
        let mut state = self.lock()?;
        if state.snapshot.is_some() {
            return Err(DatabaseError::TransactionFailed(
                "a transaction is already active".to_string(),
            ));
        }
        state.snapshot = Some(state.tables.clone());
        Ok(())
    }

    fn commit(&self) -> DatabaseResult<()> {
        let mut state = self.lock()?;
        state
            .snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| DatabaseError::TransactionFailed("no active transaction".to_string()))
    }

    fn rollback(&self) -> DatabaseResult<()> {
        let mut state = self.lock()?;
        let snapshot = state
            .snapshot
            .take()
            .ok_or_else(|| DatabaseError::TransactionFailed("no active transaction".to_string()))?;
        state.tables = snapshot;
        Ok(())
    }

    fn record_run(&self, run: &ImportRun) -> DatabaseResult<()> {
        let mut state = self.lock()?;
        state.runs.push(run.clone());
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> DatabaseResult<Vec<ImportRun>> {
        let state = self.lock()?;
        Ok(state.runs.iter().rev().take(limit).cloned().collect())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Catalog;

    fn region_fields(id: i64, description: &str) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("region_id".to_string(), FieldValue::Integer(id));
        fields.insert(
            "region_description".to_string(),
            FieldValue::from(description),
        );
        fields
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let catalog = Catalog::northwind();
        let schema = catalog.get("regions").unwrap();
        let backend = MemoryBackend::new();
        backend.initialize(catalog.schemas()).unwrap();

        let key = NaturalKey::single("region_id", FieldValue::Integer(1));
        let (first, created) = backend
            .upsert(schema, &key, &region_fields(1, "Eastern"))
            .unwrap();
        assert!(created);

        let (second, created) = backend
            .upsert(schema, &key, &region_fields(1, "Western"))
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.get("region_description"), &FieldValue::from("Western"));
        assert_eq!(backend.count(schema).unwrap(), 1);
    }

    #[test]
    fn test_rollback_restores_snapshot() {
        let catalog = Catalog::northwind();
        let schema = catalog.get("regions").unwrap();
        let backend = MemoryBackend::new();

        let key = NaturalKey::single("region_id", FieldValue::Integer(1));
        backend.begin().unwrap();
        assert!(backend.in_transaction());
        backend
            .upsert(schema, &key, &region_fields(1, "Eastern"))
            .unwrap();
        backend.rollback().unwrap();

        assert!(!backend.in_transaction());
        assert_eq!(backend.count(schema).unwrap(), 0);
        assert!(backend.get_by_key(schema, &key).unwrap().is_none());
    }

    #[test]
    fn test_nested_begin_and_stray_commit_fail() {
        let backend = MemoryBackend::new();
        assert!(backend.commit().is_err());
        backend.begin().unwrap();
        assert!(matches!(
            backend.begin(),
            Err(DatabaseError::TransactionFailed(_))
        ));
    }

    #[test]
    fn test_unique_column_conflict() {
        let catalog = Catalog::northwind();
        let schema = catalog.get("customers").unwrap();
        let backend = MemoryBackend::new();

        let mut alfki = FieldMap::new();
        alfki.insert("customer_id".to_string(), FieldValue::from("ALFKI"));
        alfki.insert("company_name".to_string(), FieldValue::from("Alfreds"));
        alfki.insert("user".to_string(), FieldValue::Reference(7));
        backend
            .upsert(
                schema,
                &NaturalKey::single("customer_id", FieldValue::from("ALFKI")),
                &alfki,
            )
            .unwrap();

        // Re-upserting the same customer with the same user is fine.
        backend
            .upsert(
                schema,
                &NaturalKey::single("customer_id", FieldValue::from("ALFKI")),
                &alfki,
            )
            .unwrap();

        let mut anatr = alfki.clone();
        anatr.insert("customer_id".to_string(), FieldValue::from("ANATR"));
        let err = backend
            .upsert(
                schema,
                &NaturalKey::single("customer_id", FieldValue::from("ANATR")),
                &anatr,
            )
            .unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateKey { ref column, .. } if column == "user"));
    }

    #[test]
    fn test_set_reference() {
        let catalog = Catalog::northwind();
        let schema = catalog.get("employees").unwrap();
        let backend = MemoryBackend::new();

        let mut fields = FieldMap::new();
        fields.insert("employee_id".to_string(), FieldValue::Integer(1));
        let key = NaturalKey::single("employee_id", FieldValue::Integer(1));
        let (entity, _) = backend.upsert(schema, &key, &fields).unwrap();

        backend
            .set_reference(schema, entity.id, "reports_to", Some(entity.id))
            .unwrap();
        let stored = backend.get_by_key(schema, &key).unwrap().unwrap();
        assert_eq!(stored.get("reports_to"), &FieldValue::Reference(entity.id));

        assert!(matches!(
            backend.set_reference(schema, 99, "reports_to", None),
            Err(DatabaseError::NotFound { .. })
        ));
        assert!(backend
            .set_reference(schema, entity.id, "title", None)
            .is_err());
    }

    #[test]
    fn test_recent_runs_newest_first() {
        let backend = MemoryBackend::new();
        for entity in ["regions", "territories"] {
            backend
                .record_run(&ImportRun {
                    id: uuid::Uuid::new_v4(),
                    entity: entity.to_string(),
                    source: format!("{}.csv", entity),
                    sha256: String::new(),
                    rows_read: 1,
                    created: 1,
                    updated: 0,
                    skipped: 0,
                    committed: true,
                    started_at: Utc::now(),
                    finished_at: Utc::now(),
                })
                .unwrap();
        }
        let runs = backend.recent_runs(1).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].entity, "territories");
    }
}
