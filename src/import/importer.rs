//! Two-pass batch importer
//!
//! Pass 1 validates every row, resolves its references by natural key and
//! upserts it. Self references (an employee's manager) are queued instead
//! of looked up, and pass 2 sets them once every row of the batch exists,
//! so the input order of managers and reports does not matter.
//!
//! With `atomic` both passes share one transaction. Otherwise every upsert
//! and every fixup is its own transaction.

use std::collections::BTreeMap;
use std::io::Read;
use tracing::{debug, info, warn};

use super::reader::{Encoding, RecordReader};
use super::result::BatchResult;
use super::{ImportError, ImportResult, RecordError, RecordFailure};
use crate::database::{DatabaseError, PersistenceService};
use crate::models::{
    DeferredReference, Entity, FieldMap, FieldValue, ImportStep, NaturalKey, RecordState,
    SourceRecord, UpsertOutcome, ValidatedRecord,
};
use crate::schema::catalog::CatalogError;
use crate::schema::{Catalog, EntitySchema, ReferenceSpec};
use crate::validation::{
    DEFAULT_DATE_FORMATS, FieldParser, HeaderMismatch, ValueError, normalize_null,
    validate_header,
};

/// Options of a single import run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    /// Log and skip failing records instead of aborting
    pub skip_errors: bool,
    /// One transaction for the whole batch
    pub atomic: bool,
    /// Unknown header columns are a mismatch
    pub strict_header: bool,
    /// Field delimiter, detected from the header when `None`
    pub delimiter: Option<u8>,
    pub encoding: Encoding,
    /// Date formats tried in order
    pub date_formats: Vec<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            skip_errors: false,
            atomic: true,
            strict_header: false,
            delimiter: None,
            encoding: Encoding::default(),
            date_formats: DEFAULT_DATE_FORMATS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A record that made it through pass 1
struct Persisted {
    outcome: UpsertOutcome,
    deferred: Vec<DeferredReference>,
    warnings: usize,
}

/// Imports delimited rows of one entity type
pub struct BatchImporter<'a> {
    catalog: &'a Catalog,
    schema: &'a EntitySchema,
    service: &'a dyn PersistenceService,
    parser: FieldParser,
    options: ImportOptions,
}

impl<'a> BatchImporter<'a> {
    pub fn new(
        catalog: &'a Catalog,
        schema: &'a EntitySchema,
        service: &'a dyn PersistenceService,
        options: ImportOptions,
    ) -> Self {
        Self {
            catalog,
            schema,
            service,
            parser: FieldParser::new(options.date_formats.clone()),
            options,
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        self.schema
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Check the normalised header against the schema
    pub fn validate_header(&self, header: &[String]) -> Result<(), HeaderMismatch> {
        validate_header(self.schema, header, self.options.strict_header)
    }

    /// Coerce every field of `record`
    ///
    /// Reference keys are only null-normalised here; a required reference
    /// with a null key fails like a required field.
    pub fn parse_record(&self, record: &SourceRecord) -> Result<ValidatedRecord, RecordError> {
        let mut validated = ValidatedRecord::new(record.line);

        for field in &self.schema.fields {
            let raw = record.get(field.name);
            let value =
                self.parser
                    .parse_field(field, raw)
                    .map_err(|reason| RecordError::Parse {
                        field: field.name.to_string(),
                        value: raw.unwrap_or_default().to_string(),
                        reason,
                    })?;
            validated.values.insert(field.name.to_string(), value);
        }

        for reference in &self.schema.references {
            let raw = record.get(reference.source_field);
            let key = raw.and_then(normalize_null).map(str::to_string);
            if reference.required && key.is_none() {
                return Err(RecordError::Parse {
                    field: reference.source_field.to_string(),
                    value: raw.unwrap_or_default().to_string(),
                    reason: ValueError::Missing,
                });
            }
            validated
                .references
                .insert(reference.source_field.to_string(), key);
        }

        Ok(validated)
    }

    /// Look up every reference of `record` by the target's natural key
    ///
    /// The outer result carries database failures, the inner one row-level
    /// failures. Deferred references with a key are queued for pass 2 and
    /// left out of the returned values.
    pub fn resolve_references(
        &self,
        record: &ValidatedRecord,
    ) -> ImportResult<Result<ValidatedRecord, RecordError>> {
        let mut resolved = record.clone();
        let mut targets: BTreeMap<&str, Entity> = BTreeMap::new();

        for reference in self.schema.references.iter().filter(|r| !r.deferred) {
            let Some(key) = raw_reference(record, reference) else {
                resolved
                    .values
                    .insert(reference.column.to_string(), FieldValue::Null);
                continue;
            };

            match self.lookup(reference, key)? {
                Ok(Some(target)) => {
                    resolved.values.insert(
                        reference.column.to_string(),
                        FieldValue::Reference(target.id),
                    );
                    targets.insert(reference.column, target);
                }
                Ok(None) if reference.required => {
                    return Ok(Err(RecordError::Reference {
                        field: reference.source_field.to_string(),
                        target: reference.target.to_string(),
                        key: key.to_string(),
                    }));
                }
                Ok(None) => {
                    let message = format!(
                        "{} '{}' not found for {}",
                        reference.target, key, reference.source_field
                    );
                    warn!(line = record.line, entity = self.schema.name, "{}", message);
                    resolved.warnings.push(message);
                    resolved
                        .values
                        .insert(reference.column.to_string(), FieldValue::Null);
                }
                Err(error) => return Ok(Err(error)),
            }
        }

        for field in &self.schema.fields {
            let Some(fallback) = &field.fallback else {
                continue;
            };
            if !resolved.value(field.name).is_null() {
                continue;
            }
            let value = targets
                .get(fallback.reference)
                .map(|target| target.get(fallback.field).clone())
                .filter(|value| !value.is_null())
                .unwrap_or_else(|| fallback.otherwise.clone());
            resolved.values.insert(field.name.to_string(), value);
        }

        let owner = self.natural_key(&resolved.values);
        for reference in self.schema.references.iter().filter(|r| r.deferred) {
            let Some(key) = raw_reference(record, reference) else {
                resolved
                    .values
                    .insert(reference.column.to_string(), FieldValue::Null);
                continue;
            };

            // Reject unparseable keys now rather than in pass 2.
            let target = self.catalog.require(reference.target)?;
            if let Err(error) = self.target_key(target, reference, key)? {
                return Ok(Err(error));
            }

            resolved.deferred.push(DeferredReference {
                line: record.line,
                owner: owner.clone(),
                column: reference.column.to_string(),
                source_field: reference.source_field.to_string(),
                target_key: key.to_string(),
            });
        }

        Ok(Ok(resolved))
    }

    /// Upsert a resolved record by its natural key
    pub fn upsert(
        &self,
        record: &ValidatedRecord,
    ) -> ImportResult<Result<(Entity, UpsertOutcome), RecordError>> {
        let key = self.natural_key(&record.values);
        match self.service.upsert(self.schema, &key, &record.values) {
            Ok((entity, created)) => Ok(Ok((entity, UpsertOutcome::from_created(created)))),
            Err(DatabaseError::DuplicateKey {
                entity,
                column,
                value,
            }) => Ok(Err(RecordError::DuplicateKey {
                entity,
                field: column,
                value,
            })),
            Err(error) => Err(error.into()),
        }
    }

    /// Import every row of `input`
    pub fn run(&self, input: impl Read) -> ImportResult<BatchResult> {
        let mut result = BatchResult::new(self.schema.name);
        self.execute(input, &mut result)?;
        Ok(result)
    }

    /// Import every row of `input`, accumulating into `result`
    ///
    /// `result` keeps the counts reached so far when an error aborts the run.
    pub fn execute(&self, input: impl Read, result: &mut BatchResult) -> ImportResult<()> {
        let mut reader = RecordReader::new(input, self.options.encoding, self.options.delimiter)?;
        self.validate_header(reader.header())?;

        if !self.options.atomic {
            return self.run_passes(&mut reader, result);
        }

        self.service.begin()?;
        match self.run_passes(&mut reader, result) {
            Ok(()) => {
                self.service.commit()?;
                result.committed = true;
                Ok(())
            }
            Err(error) => {
                self.rollback_quietly();
                Err(error)
            }
        }
    }

    fn run_passes(&self, reader: &mut RecordReader, result: &mut BatchResult) -> ImportResult<()> {
        info!(entity = self.schema.name, "Pass 1: upserting records");
        let mut deferred = Vec::new();

        for row in reader {
            let row = row?;
            result.rows_read += 1;

            let outcome = match row {
                Ok(source) => self.in_unit(result, || self.process_record(source))?,
                Err(failure) => Err(failure),
            };

            match outcome {
                Ok(persisted) => {
                    result.record_outcome(persisted.outcome);
                    result.warnings += persisted.warnings;
                    deferred.extend(persisted.deferred);
                }
                Err(failure) => self.handle_failure(failure, result)?,
            }
        }

        if deferred.is_empty() {
            info!(
                entity = self.schema.name,
                created = result.created,
                updated = result.updated,
                "Import finished"
            );
            return Ok(());
        }

        info!(
            entity = self.schema.name,
            count = deferred.len(),
            "Pass 2: resolving deferred references"
        );
        for reference in &deferred {
            let outcome = self.in_unit(result, || {
                Ok(self
                    .resolve_deferred(reference)?
                    .map_err(|error| RecordFailure {
                        line: reference.line,
                        key: Some(reference.owner.to_string()),
                        step: ImportStep::Fixup,
                        error,
                    }))
            })?;

            match outcome {
                Ok(true) => result.deferred_resolved += 1,
                Ok(false) => result.warnings += 1,
                Err(failure) => self.handle_failure(failure, result)?,
            }
        }

        info!(
            entity = self.schema.name,
            created = result.created,
            updated = result.updated,
            deferred = result.deferred_resolved,
            "Import finished"
        );
        Ok(())
    }

    /// Drive one record through the state machine
    fn process_record(&self, source: SourceRecord) -> ImportResult<Result<Persisted, RecordFailure>> {
        let key = self.source_key(&source);
        let mut warnings = 0;
        let mut state = RecordState::Parsed(source);

        loop {
            state = match state {
                RecordState::Persisted {
                    line,
                    id,
                    outcome,
                    deferred,
                } => {
                    debug!(line, id, ?outcome, entity = self.schema.name, "Record persisted");
                    return Ok(Ok(Persisted {
                        outcome,
                        deferred,
                        warnings,
                    }));
                }
                RecordState::Failed { line, step, error } => {
                    return Ok(Err(RecordFailure {
                        line,
                        key,
                        step,
                        error,
                    }));
                }
                pending => self.advance(pending, &mut warnings)?,
            };
        }
    }

    fn advance(&self, state: RecordState, warnings: &mut usize) -> ImportResult<RecordState> {
        Ok(match state {
            RecordState::Parsed(source) => match self.parse_record(&source) {
                Ok(record) => RecordState::Validated(record),
                Err(error) => RecordState::Parsed(source).fail(error),
            },
            RecordState::Validated(record) => match self.resolve_references(&record)? {
                Ok(resolved) => RecordState::ReferenceResolved(resolved),
                Err(error) => RecordState::Validated(record).fail(error),
            },
            RecordState::ReferenceResolved(record) => match self.upsert(&record)? {
                Ok((entity, outcome)) => {
                    *warnings += record.warnings.len();
                    RecordState::Persisted {
                        line: record.line,
                        id: entity.id,
                        outcome,
                        deferred: record.deferred,
                    }
                }
                Err(error) => RecordState::ReferenceResolved(record).fail(error),
            },
            terminal => terminal,
        })
    }

    /// Set one deferred reference; `Ok(false)` when an optional target is missing
    fn resolve_deferred(&self, deferred: &DeferredReference) -> ImportResult<Result<bool, RecordError>> {
        let reference = self
            .schema
            .reference_by_column(&deferred.column)
            .ok_or_else(|| {
                DatabaseError::InvalidInput(format!(
                    "{} has no reference column '{}'",
                    self.schema.name, deferred.column
                ))
            })?;

        let Some(owner) = self.service.get_by_key(self.schema, &deferred.owner)? else {
            return Ok(Err(RecordError::Reference {
                field: deferred.source_field.clone(),
                target: self.schema.name.to_string(),
                key: deferred.owner.to_string(),
            }));
        };

        let target = match self.lookup(reference, &deferred.target_key)? {
            Ok(target) => target,
            Err(error) => return Ok(Err(error)),
        };

        match target {
            Some(target) => {
                self.service
                    .set_reference(self.schema, owner.id, reference.column, Some(target.id))?;
                debug!(
                    line = deferred.line,
                    owner = owner.id,
                    target = target.id,
                    column = reference.column,
                    "Deferred reference set"
                );
                Ok(Ok(true))
            }
            None if reference.required => Ok(Err(RecordError::Reference {
                field: deferred.source_field.clone(),
                target: reference.target.to_string(),
                key: deferred.target_key.clone(),
            })),
            None => {
                warn!(
                    line = deferred.line,
                    entity = self.schema.name,
                    "{} '{}' not found for {}",
                    reference.target,
                    deferred.target_key,
                    deferred.source_field
                );
                self.service
                    .set_reference(self.schema, owner.id, reference.column, None)?;
                Ok(Ok(false))
            }
        }
    }

    /// Find the target of `reference` by its raw natural key
    fn lookup(
        &self,
        reference: &ReferenceSpec,
        raw_key: &str,
    ) -> ImportResult<Result<Option<Entity>, RecordError>> {
        let target = self.catalog.require(reference.target)?;
        let key = match self.target_key(target, reference, raw_key)? {
            Ok(key) => key,
            Err(error) => return Ok(Err(error)),
        };
        Ok(Ok(self.service.get_by_key(target, &key)?))
    }

    /// Coerce a raw key to the type of the target's key column
    fn target_key(
        &self,
        target: &EntitySchema,
        reference: &ReferenceSpec,
        raw_key: &str,
    ) -> ImportResult<Result<NaturalKey, RecordError>> {
        let column = target.single_key().ok_or_else(|| CatalogError::CompositeTarget {
            entity: self.schema.name.to_string(),
            target: target.name.to_string(),
        })?;
        let kind = target
            .column_kind(column)
            .ok_or_else(|| CatalogError::UnknownKeyColumn {
                entity: target.name.to_string(),
                column: column.to_string(),
            })?;

        Ok(self
            .parser
            .parse_key(kind, raw_key)
            .map(|value| NaturalKey::single(column, value))
            .map_err(|reason| RecordError::Parse {
                field: reference.source_field.to_string(),
                value: raw_key.to_string(),
                reason,
            }))
    }

    /// Natural key of this schema from resolved values
    fn natural_key(&self, values: &FieldMap) -> NaturalKey {
        NaturalKey::new(
            self.schema
                .key
                .iter()
                .map(|column| {
                    let value = values.get(*column).cloned().unwrap_or(FieldValue::Null);
                    (column.to_string(), value)
                })
                .collect(),
        )
    }

    /// Natural key as written in the input, for failure reports
    fn source_key(&self, record: &SourceRecord) -> Option<String> {
        let parts: Vec<String> = self
            .schema
            .key
            .iter()
            .map(|column| {
                let field = self
                    .schema
                    .reference_by_column(column)
                    .map(|r| r.source_field)
                    .unwrap_or(*column);
                let value = record.get(field).and_then(normalize_null)?;
                Some(format!("{}={}", field, value))
            })
            .collect::<Option<_>>()?;
        Some(parts.join(","))
    }

    /// Run `work` in its own transaction unless the batch is atomic
    fn in_unit<T>(
        &self,
        result: &mut BatchResult,
        work: impl FnOnce() -> ImportResult<Result<T, RecordFailure>>,
    ) -> ImportResult<Result<T, RecordFailure>> {
        if self.options.atomic {
            return work();
        }

        self.service.begin()?;
        match work() {
            Ok(Ok(value)) => {
                self.service.commit()?;
                result.committed = true;
                Ok(Ok(value))
            }
            Ok(Err(failure)) => {
                self.service.rollback()?;
                Ok(Err(failure))
            }
            Err(error) => {
                self.rollback_quietly();
                Err(error)
            }
        }
    }

    fn handle_failure(&self, failure: RecordFailure, result: &mut BatchResult) -> ImportResult<()> {
        result.record_failure(failure.clone());
        if self.options.skip_errors {
            warn!(
                entity = self.schema.name,
                kind = failure.error.kind(),
                "Skipping {}",
                failure
            );
            Ok(())
        } else {
            Err(ImportError::RecordFailed(Box::new(failure)))
        }
    }

    fn rollback_quietly(&self) {
        if let Err(error) = self.service.rollback() {
            warn!(%error, "Rollback failed");
        }
    }
}

fn raw_reference<'r>(record: &'r ValidatedRecord, reference: &ReferenceSpec) -> Option<&'r str> {
    record
        .references
        .get(reference.source_field)
        .and_then(|key| key.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryBackend;

    fn source(line: usize, fields: &[(&str, &str)]) -> SourceRecord {
        SourceRecord::new(
            line,
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_parse_record_normalises_nulls() {
        let catalog = Catalog::northwind();
        let service = MemoryBackend::new();
        let importer = BatchImporter::new(
            &catalog,
            catalog.get("products").unwrap(),
            &service,
            ImportOptions::default(),
        );

        let record = importer
            .parse_record(&source(
                2,
                &[
                    ("product_id", "1"),
                    ("product_name", "Chai"),
                    ("units_in_stock", "NULL"),
                    ("discontinued", "none"),
                    ("supplier_id", " "),
                ],
            ))
            .unwrap();

        assert_eq!(record.value("units_in_stock"), &FieldValue::Integer(0));
        assert_eq!(record.value("discontinued"), &FieldValue::Boolean(false));
        assert_eq!(record.references.get("supplier_id"), Some(&None));
        assert_eq!(record.references.get("category_id"), Some(&None));
    }

    #[test]
    fn test_required_reference_with_null_key_is_parse_error() {
        let catalog = Catalog::northwind();
        let service = MemoryBackend::new();
        let importer = BatchImporter::new(
            &catalog,
            catalog.get("territories").unwrap(),
            &service,
            ImportOptions::default(),
        );

        let err = importer
            .parse_record(&source(
                2,
                &[
                    ("territory_id", "01581"),
                    ("territory_description", "Westboro"),
                    ("region_id", "NULL"),
                ],
            ))
            .unwrap_err();
        assert_eq!(err.kind(), "ParseError");
        assert!(matches!(
            err,
            RecordError::Parse { reason: ValueError::Missing, .. }
        ));
    }

    #[test]
    fn test_missing_required_reference() {
        let catalog = Catalog::northwind();
        let service = MemoryBackend::new();
        let importer = BatchImporter::new(
            &catalog,
            catalog.get("territories").unwrap(),
            &service,
            ImportOptions::default(),
        );

        let record = importer
            .parse_record(&source(
                3,
                &[
                    ("territory_id", "01581"),
                    ("territory_description", "Westboro"),
                    ("region_id", "1"),
                ],
            ))
            .unwrap();
        let err = importer.resolve_references(&record).unwrap().unwrap_err();
        assert_eq!(
            err,
            RecordError::Reference {
                field: "region_id".to_string(),
                target: "regions".to_string(),
                key: "1".to_string(),
            }
        );
    }

    #[test]
    fn test_deferred_reference_is_queued() {
        let catalog = Catalog::northwind();
        let service = MemoryBackend::new();
        let importer = BatchImporter::new(
            &catalog,
            catalog.get("employees").unwrap(),
            &service,
            ImportOptions::default(),
        );

        let record = importer
            .parse_record(&source(2, &[("employee_id", "1"), ("reports_to", "2")]))
            .unwrap();
        let resolved = importer.resolve_references(&record).unwrap().unwrap();

        assert!(!resolved.values.contains_key("reports_to"));
        assert_eq!(resolved.deferred.len(), 1);
        assert_eq!(resolved.deferred[0].target_key, "2");
        assert_eq!(
            resolved.deferred[0].owner,
            NaturalKey::single("employee_id", FieldValue::Integer(1))
        );

        let record = importer
            .parse_record(&source(3, &[("employee_id", "2"), ("reports_to", "")]))
            .unwrap();
        let resolved = importer.resolve_references(&record).unwrap().unwrap();
        assert_eq!(resolved.value("reports_to"), &FieldValue::Null);
        assert!(resolved.values.contains_key("reports_to"));
        assert!(resolved.deferred.is_empty());
    }

    #[test]
    fn test_unparseable_deferred_key_fails_early() {
        let catalog = Catalog::northwind();
        let service = MemoryBackend::new();
        let importer = BatchImporter::new(
            &catalog,
            catalog.get("employees").unwrap(),
            &service,
            ImportOptions::default(),
        );

        let record = importer
            .parse_record(&source(2, &[("employee_id", "1"), ("reports_to", "boss")]))
            .unwrap();
        let err = importer.resolve_references(&record).unwrap().unwrap_err();
        assert!(matches!(err, RecordError::Parse { ref field, .. } if field == "reports_to"));
    }

    #[test]
    fn test_source_key_uses_input_field_names() {
        let catalog = Catalog::northwind();
        let service = MemoryBackend::new();
        let importer = BatchImporter::new(
            &catalog,
            catalog.get("employee_territories").unwrap(),
            &service,
            ImportOptions::default(),
        );

        let record = source(2, &[("employee_id", "1"), ("territory_id", "06897")]);
        assert_eq!(
            importer.source_key(&record),
            Some("employee_id=1,territory_id=06897".to_string())
        );
        assert_eq!(importer.source_key(&source(3, &[("employee_id", "1")])), None);
    }
}
