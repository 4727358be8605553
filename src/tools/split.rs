//! Chunking of large delimited files

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{Table, ToolError, ToolResult};
use crate::import::Encoding;

pub const DEFAULT_ROWS_PER_CHUNK: usize = 100_000;
pub const DEFAULT_CHUNK_PREFIX: &str = "output_chunk";

/// Split `input` into `{prefix}_{n}.csv` files of at most `rows` data rows
///
/// Chunks are numbered from 1, carry the input header and keep its delimiter.
/// Returns the written paths in order.
pub fn split_file(
    input: &Path,
    rows: usize,
    prefix: &str,
    encoding: Encoding,
) -> ToolResult<Vec<PathBuf>> {
    if rows == 0 {
        return Err(ToolError::InvalidArgument(
            "rows per chunk must be at least 1".to_string(),
        ));
    }
    let mut table = Table::open(input, encoding)?;

    let mut written = Vec::new();
    let mut writer: Option<csv::Writer<std::fs::File>> = None;
    let mut in_chunk = 0;

    for row in table.reader.records() {
        let row = row?;
        if writer.is_none() || in_chunk == rows {
            if let Some(mut full) = writer.take() {
                full.flush()?;
            }
            let path = PathBuf::from(format!("{}_{}.csv", prefix, written.len() + 1));
            let mut next = csv::WriterBuilder::new()
                .delimiter(table.delimiter)
                .from_path(&path)?;
            next.write_record(&table.header)?;
            debug!(path = %path.display(), "Started chunk");
            written.push(path);
            writer = Some(next);
            in_chunk = 0;
        }
        if let Some(current) = writer.as_mut() {
            current.write_record(&row)?;
        }
        in_chunk += 1;
    }

    if let Some(mut last) = writer {
        last.flush()?;
    }
    info!(input = %input.display(), chunks = written.len(), "Split file");
    Ok(written)
}
