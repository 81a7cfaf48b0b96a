use std::io;

use thiserror::Error;

use crate::dimension::{Dimension, NaturalKey};
use crate::types::{RowIndex, TableName};
use crate::verify::VerificationReport;

/// Error type for ingestion, normalization, persistence, and verification failures.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// A required value is null or cannot be parsed.
    #[error("malformed input at {}: column '{column}' {reason}", describe_row(*row))]
    MalformedInput {
        /// Zero-based record index, when known.
        row: Option<RowIndex>,
        /// Column header.
        column: String,
        /// What is wrong with the value.
        reason: String,
    },
    /// A key has no dimension entry.
    #[error(
        "unresolved reference at {}: dimension '{dimension}' has no entry for key {key}",
        describe_row(*row)
    )]
    UnresolvedReference {
        /// Dimension that was searched.
        dimension: Dimension,
        /// Key that was not found.
        key: NaturalKey,
        /// Zero-based record index, when known.
        row: Option<RowIndex>,
    },
    /// The builder found a duplicate or a dangling reference.
    #[error("relational graph invalid in table '{table}': {details}")]
    GraphInvariant {
        /// Table holding the offending row.
        table: TableName,
        /// Which rule was broken, and by what.
        details: String,
    },
    /// A store rejected or failed an operation.
    #[error("graph store failure: {0}")]
    Store(String),
    /// Invalid configuration or arguments.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// CSV reader or writer error.
    #[error(transparent)]
    Csv(#[from] csv::Error),
    /// Raised by the verify driver only.
    #[error("verification failed with {} discrepancies", .0.discrepancies.len())]
    VerificationFailed(Box<VerificationReport>),
}

fn describe_row(row: Option<RowIndex>) -> String {
    match row {
        Some(idx) => format!("row {idx}"),
        None => "batch scope".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_reference_names_dimension_key_and_row() {
        let err = NormalizeError::UnresolvedReference {
            dimension: Dimension::Location,
            key: NaturalKey::from_parts(["East", "Tokyo", "Japan", "Tokyo"]),
            row: Some(7),
        };
        let message = err.to_string();
        assert!(message.contains("row 7"));
        assert!(message.contains("location"));
        assert!(message.contains("East | Tokyo | Japan | Tokyo"));
    }

    #[test]
    fn malformed_input_without_row_reports_scope() {
        let err = NormalizeError::MalformedInput {
            row: None,
            column: "Order_Date".into(),
            reason: "header is missing".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed input at batch scope: column 'Order_Date' header is missing"
        );
    }
}
