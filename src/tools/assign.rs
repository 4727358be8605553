//! Sequential id assignment for delimited files

use serde::Serialize;
use std::path::Path;
use tracing::info;

use super::{Table, ToolResult};
use crate::import::Encoding;

pub const DEFAULT_ID_COLUMN: &str = "user_id";
pub const DEFAULT_FIRST_ID: i64 = 1;

/// Counts reported by [`assign_ids`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssignSummary {
    pub rows: usize,
    /// Whether the column was added rather than overwritten
    pub appended: bool,
}

/// Number the data rows of `input` in `column`, starting at `first`
///
/// An existing column (matched after header normalisation) is overwritten,
/// otherwise the column is appended. The result goes to `output`, or replaces
/// `input` when no output is given. The input delimiter is kept.
pub fn assign_ids(
    input: &Path,
    column: &str,
    first: i64,
    output: Option<&Path>,
    encoding: Encoding,
) -> ToolResult<AssignSummary> {
    let mut table = Table::open(input, encoding)?;
    let existing = table.find(column);

    let mut header: Vec<String> = table.header.iter().map(str::to_string).collect();
    let width = header.len();
    if existing.is_none() {
        header.push(column.to_string());
    }

    let mut rows = Vec::new();
    for (offset, row) in table.reader.records().enumerate() {
        let row = row?;
        let mut fields: Vec<String> = row.iter().map(str::to_string).collect();
        if fields.len() < width {
            fields.resize(width, String::new());
        }
        let id = (first + offset as i64).to_string();
        match existing {
            Some(index) => fields[index] = id,
            None => fields.insert(width, id),
        }
        rows.push(fields);
    }

    let output = output.unwrap_or(input);
    super::create_parent(output)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(table.delimiter)
        .flexible(true)
        .from_path(output)?;
    writer.write_record(&header)?;
    for fields in &rows {
        writer.write_record(fields)?;
    }
    writer.flush()?;

    let summary = AssignSummary {
        rows: rows.len(),
        appended: existing.is_none(),
    };
    info!(
        column,
        rows = summary.rows,
        output = %output.display(),
        "Assigned ids"
    );
    Ok(summary)
}
