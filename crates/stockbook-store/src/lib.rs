//! Stockbook Store - SQL execution and file primitives.
//!
//! This crate is the narrow surface the migration engine consumes from its
//! environment:
//! - [`SqlExecutor`]: execute statements, fetch one row, fetch all rows
//! - [`FileOps`]: copy files and check for their existence
//! - [`Transaction`]: explicit `BEGIN`/`COMMIT`/`ROLLBACK` scopes
//!
//! [`SqliteStore`] and [`LocalFs`] are the production implementations.

pub mod error;
pub mod executor;
pub mod fs;
pub mod sqlite;
pub mod transaction;
pub mod value;

pub use error::StoreError;
pub use executor::SqlExecutor;
pub use fs::{FileOps, LocalFs};
pub use sqlite::SqliteStore;
pub use transaction::Transaction;
pub use value::{Row, SqlValue, WriteOutcome};
