//! Key-based difference of two delimited files

use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use super::{Table, ToolResult};
use crate::import::Encoding;
use crate::validation::normalize_null;

/// Counts reported by [`diff_files`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    /// Distinct keys found in the reference file
    pub reference_keys: usize,
    /// Candidate rows read
    pub candidate_rows: usize,
    /// Candidate rows written to the output
    pub unmatched: usize,
}

/// Write the rows of `candidate` whose `key` value is absent from `reference`
///
/// The output is comma separated and keeps the candidate's header. Rows with
/// a null key are neither matched nor written. Missing parent directories of
/// `output` are created.
pub fn diff_files(
    reference: &Path,
    candidate: &Path,
    key: &str,
    output: &Path,
    encoding: Encoding,
) -> ToolResult<DiffSummary> {
    let mut reference_table = Table::open(reference, encoding)?;
    let reference_column = reference_table.column(reference, key)?;

    let mut keys = HashSet::new();
    for row in reference_table.reader.records() {
        let row = row?;
        if let Some(value) = row.get(reference_column).and_then(normalize_null) {
            keys.insert(value.to_string());
        }
    }

    let mut candidate_table = Table::open(candidate, encoding)?;
    let candidate_column = candidate_table.column(candidate, key)?;

    super::create_parent(output)?;
    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record(&candidate_table.header)?;

    let mut summary = DiffSummary {
        reference_keys: keys.len(),
        candidate_rows: 0,
        unmatched: 0,
    };
    for row in candidate_table.reader.records() {
        let row = row?;
        summary.candidate_rows += 1;
        let Some(value) = row.get(candidate_column).and_then(normalize_null) else {
            continue;
        };
        if !keys.contains(value) {
            writer.write_record(&row)?;
            summary.unmatched += 1;
        }
    }
    writer.flush()?;

    info!(
        candidate_delimiter = %(candidate_table.delimiter as char),
        unmatched = summary.unmatched,
        output = %output.display(),
        "Wrote unmatched rows"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolError;
    use tempfile::TempDir;

    #[test]
    fn test_diff_writes_unmatched_rows() {
        let dir = TempDir::new().unwrap();
        let reference = dir.path().join("reference.csv");
        let candidate = dir.path().join("orders.csv");
        let output = dir.path().join("missing.csv");
        std::fs::write(&reference, "order_id,customer_id\n10248,VINET\n10249,TOMSP\n").unwrap();
        std::fs::write(
            &candidate,
            "Order ID|Ship Name\n10248|Vins\n10250|Hanari\n|Nobody\n10251|\"Victuailles, en stock\"\n",
        )
        .unwrap();

        let summary = diff_files(&reference, &candidate, "order_id", &output, Encoding::Auto).unwrap();
        assert_eq!(summary.reference_keys, 2);
        assert_eq!(summary.candidate_rows, 4);
        assert_eq!(summary.unmatched, 2);

        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(
            written,
            "Order ID,Ship Name\n10250,Hanari\n10251,\"Victuailles, en stock\"\n"
        );
    }

    #[test]
    fn test_diff_creates_output_directory() {
        let dir = TempDir::new().unwrap();
        let reference = dir.path().join("reference.csv");
        let candidate = dir.path().join("orders.csv");
        std::fs::write(&reference, "order_id\n10248\n").unwrap();
        std::fs::write(&candidate, "order_id\n10248\n10249\n").unwrap();

        let output = dir.path().join("fixtures").join("unmatched.csv");
        diff_files(&reference, &candidate, "order_id", &output, Encoding::Auto).unwrap();
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "order_id\n10249\n"
        );
    }

    #[test]
    fn test_diff_missing_key_column() {
        let dir = TempDir::new().unwrap();
        let reference = dir.path().join("reference.csv");
        std::fs::write(&reference, "id\n1\n").unwrap();

        let err = diff_files(
            &reference,
            &reference,
            "order_id",
            &dir.path().join("out.csv"),
            Encoding::Auto,
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::MissingColumn { .. }));
    }
}
