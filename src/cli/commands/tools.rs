//! File tool CLI commands

use std::path::PathBuf;

use crate::cli::error::CliError;
use crate::import::Encoding;
use crate::tools::{assign_ids, diff_files, split_file};

/// Diff command arguments
#[derive(Debug, Clone)]
pub struct DiffArgs {
    pub reference: PathBuf,
    pub candidate: PathBuf,
    /// Key column compared between the two files
    pub key: String,
    pub output: PathBuf,
    pub encoding: Encoding,
}

/// Split command arguments
#[derive(Debug, Clone)]
pub struct SplitArgs {
    pub input: PathBuf,
    pub rows: usize,
    pub prefix: String,
    pub encoding: Encoding,
}

/// Assign-ids command arguments
#[derive(Debug, Clone)]
pub struct AssignArgs {
    pub input: PathBuf,
    pub column: String,
    pub start: i64,
    /// Replaces the input when absent
    pub output: Option<PathBuf>,
    pub encoding: Encoding,
}

pub fn handle_diff(args: &DiffArgs) -> Result<(), CliError> {
    let summary = diff_files(
        &args.reference,
        &args.candidate,
        &args.key,
        &args.output,
        args.encoding,
    )?;
    println!(
        "{} of {} rows not found in {} ({} keys), written to {}",
        summary.unmatched,
        summary.candidate_rows,
        args.reference.display(),
        summary.reference_keys,
        args.output.display()
    );
    Ok(())
}

pub fn handle_split(args: &SplitArgs) -> Result<(), CliError> {
    let chunks = split_file(&args.input, args.rows, &args.prefix, args.encoding)?;
    for chunk in &chunks {
        println!("{}", chunk.display());
    }
    println!("{} chunks written", chunks.len());
    Ok(())
}

pub fn handle_assign(args: &AssignArgs) -> Result<(), CliError> {
    let summary = assign_ids(
        &args.input,
        &args.column,
        args.start,
        args.output.as_deref(),
        args.encoding,
    )?;
    let written = args.output.as_ref().unwrap_or(&args.input);
    println!(
        "{} {} for {} rows, written to {}",
        if summary.appended { "Added" } else { "Rewrote" },
        args.column,
        summary.rows,
        written.display()
    );
    Ok(())
}
