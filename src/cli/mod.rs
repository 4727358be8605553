//! Command-line interface support for the `northwind-import` binary

pub mod commands;
pub mod error;

pub use error::CliError;
