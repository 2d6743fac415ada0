//! Store error types.

use thiserror::Error;

/// Errors raised by the SQL execution layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite returned an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File system error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A column index past the end of the row was requested.
    #[error("column {index} out of range (row has {len} columns)")]
    ColumnOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of columns in the row.
        len: usize,
    },

    /// A column held a value of an unexpected type.
    #[error("column {column}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Expected storage class.
        expected: &'static str,
        /// Actual storage class.
        found: &'static str,
    },
}
