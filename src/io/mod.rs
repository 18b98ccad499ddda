//! Input and output of a calibration run
//!
//! - `stream`: reader for the tagged measurement stream produced by the logging tools
//! - `output`: corrected-trajectory writers, filtered GPS dump and calibration report
//! - `hypergraph`: save and reload an assembled hypergraph through a [`FactorRegistry`]
//!
//! [`FactorRegistry`]: crate::factors::FactorRegistry

use std::str::FromStr;
use thiserror::Error;

// Module declarations
pub mod hypergraph;
pub mod output;
pub mod stream;

// Re-exports
pub use hypergraph::HypergraphFile;
pub use output::{CalibrationReport, OutputWriter};
pub use stream::{StreamReader, StreamRecord};

/// Errors that can occur while reading or writing run files
#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Missing required fields at line {line}")]
    MissingFields { line: usize },

    #[error("Invalid number format at line {line}: {value}")]
    InvalidNumber { line: usize, value: String },

    #[error("Unknown record tag: {0}")]
    UnknownTag(String),

    #[error("Duplicate vertex ID: {id}")]
    DuplicateVertex { id: usize },
}

/// Parse the whitespace-separated field at `index`.
pub(crate) fn parse_field<T: FromStr>(
    parts: &[&str],
    index: usize,
    line_num: usize,
) -> Result<T, IoError> {
    let raw = parts
        .get(index)
        .ok_or(IoError::MissingFields { line: line_num })?;
    raw.parse::<T>().map_err(|_| IoError::InvalidNumber {
        line: line_num,
        value: raw.to_string(),
    })
}

/// Parse every field from `start` on as a float.
pub(crate) fn parse_tail(parts: &[&str], start: usize, line_num: usize) -> Result<Vec<f64>, IoError> {
    (start..parts.len())
        .map(|index| parse_field::<f64>(parts, index, line_num))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_reports_line_and_value() {
        let parts = ["VERTEX", "3", "abc"];
        assert_eq!(parse_field::<usize>(&parts, 1, 7).ok(), Some(3));
        assert!(matches!(
            parse_field::<f64>(&parts, 2, 7),
            Err(IoError::InvalidNumber { line: 7, ref value }) if value == "abc"
        ));
        assert!(matches!(
            parse_field::<f64>(&parts, 5, 7),
            Err(IoError::MissingFields { line: 7 })
        ));
    }

    #[test]
    fn test_parse_tail() -> Result<(), IoError> {
        let parts = ["EDGE_HEADING", "4", "0.5", "100"];
        assert_eq!(parse_tail(&parts, 2, 1)?, vec![0.5, 100.0]);
        assert!(parse_tail(&parts, 4, 1)?.is_empty());
        Ok(())
    }
}
