//! Delimited text reader
//!
//! Decodes the input, detects the delimiter from the header line and splits
//! rows with the `csv` crate (RFC 4180 quoting). Rows whose field count
//! differs from the header are reported as malformed rather than ending the
//! read.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read};
use std::str::FromStr;
use tracing::debug;

use super::{ImportError, ImportResult, RecordError, RecordFailure};
use crate::models::{ImportStep, SourceRecord};
use crate::validation::normalize_header;

const BOM: char = '\u{feff}';

/// Delimiters considered when none is configured, in tie-break order
const CANDIDATE_DELIMITERS: &[u8] = b",|\t;";

/// Text encoding of an input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Utf8,
    Latin1,
    /// UTF-8, falling back to Latin-1 when the bytes are not valid UTF-8
    #[default]
    Auto,
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" => Ok(Encoding::Latin1),
            "auto" => Ok(Encoding::Auto),
            _ => Err(format!(
                "Unknown encoding: {}. Use 'utf8', 'latin1' or 'auto'.",
                s
            )),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Utf8 => write!(f, "utf8"),
            Encoding::Latin1 => write!(f, "latin1"),
            Encoding::Auto => write!(f, "auto"),
        }
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Decode `bytes` to text and strip a leading byte order mark
pub fn decode(bytes: Vec<u8>, encoding: Encoding) -> ImportResult<String> {
    let text = match encoding {
        Encoding::Latin1 => latin1(&bytes),
        Encoding::Utf8 => String::from_utf8(bytes)
            .map_err(|e| ImportError::Encoding(format!("input is not valid UTF-8: {}", e)))?,
        Encoding::Auto => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "Input is not UTF-8, decoding as Latin-1");
                latin1(e.as_bytes())
            }
        },
    };

    Ok(match text.strip_prefix(BOM) {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

/// Pick the candidate delimiter occurring most often in the header line
///
/// Commas win ties, so a single-column header reads as comma separated.
pub fn detect_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    let mut best = b',';
    let mut best_count = 0;
    for &candidate in CANDIDATE_DELIMITERS {
        let count = header.bytes().filter(|&b| b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

/// Row reader over decoded input
pub struct RecordReader {
    reader: csv::Reader<Cursor<String>>,
    header: Vec<String>,
    delimiter: u8,
}

impl RecordReader {
    /// Read all of `input`, decode it and parse the header line
    pub fn new(
        mut input: impl Read,
        encoding: Encoding,
        delimiter: Option<u8>,
    ) -> ImportResult<Self> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        let text = decode(bytes, encoding)?;
        let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(&text));

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(Cursor::new(text));

        let raw_header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let header = normalize_header(&raw_header);
        debug!(delimiter = %(delimiter as char), columns = ?header, "Read header");

        Ok(Self {
            reader,
            header,
            delimiter,
        })
    }

    /// Normalised header names
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Next row: a record, a malformed-row failure, or `None` at the end
    pub fn next_record(&mut self) -> ImportResult<Option<Result<SourceRecord, RecordFailure>>> {
        let mut row = csv::StringRecord::new();
        if !self.reader.read_record(&mut row)? {
            return Ok(None);
        }

        let line = row
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or_default();

        if row.len() != self.header.len() {
            return Ok(Some(Err(RecordFailure {
                line,
                key: None,
                step: ImportStep::Read,
                error: RecordError::Malformed {
                    expected: self.header.len(),
                    found: row.len(),
                },
            })));
        }

        let fields = self
            .header
            .iter()
            .cloned()
            .zip(row.iter().map(str::to_string))
            .collect();
        Ok(Some(Ok(SourceRecord::new(line, fields))))
    }
}

impl Iterator for RecordReader {
    type Item = ImportResult<Result<SourceRecord, RecordFailure>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
