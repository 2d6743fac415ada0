//! The SQL execution seam.

use crate::error::StoreError;
use crate::value::{Row, SqlValue, WriteOutcome};

/// Transactional SQL execution interface.
///
/// Implementations must accept `BEGIN`, `COMMIT` and `ROLLBACK` through
/// [`execute`](SqlExecutor::execute); transaction scoping is left to callers.
pub trait SqlExecutor {
    /// Execute a statement that produces no result rows.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<WriteOutcome, StoreError>;

    /// Fetch the first row produced by a query, if any.
    fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, StoreError>;

    /// Fetch every row produced by a query.
    fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StoreError>;

    /// Run a single-value scalar query and read it as an integer.
    ///
    /// Returns 0 when the query yields no row or a NULL value.
    fn query_i64(&self, sql: &str, params: &[SqlValue]) -> Result<i64, StoreError> {
        match self.query_one(sql, params)? {
            Some(row) => Ok(row.get_opt_i64(0)?.unwrap_or(0)),
            None => Ok(0),
        }
    }
}

impl<T: SqlExecutor + ?Sized> SqlExecutor for &T {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<WriteOutcome, StoreError> {
        (**self).execute(sql, params)
    }

    fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, StoreError> {
        (**self).query_one(sql, params)
    }

    fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StoreError> {
        (**self).query_all(sql, params)
    }
}

impl<T: SqlExecutor + ?Sized> SqlExecutor for std::sync::Arc<T> {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<WriteOutcome, StoreError> {
        (**self).execute(sql, params)
    }

    fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, StoreError> {
        (**self).query_one(sql, params)
    }

    fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StoreError> {
        (**self).query_all(sql, params)
    }
}
