//! SQLite implementation of [`SqlExecutor`].

use crate::error::StoreError;
use crate::executor::SqlExecutor;
use crate::value::{Row, SqlValue, WriteOutcome};
use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default busy timeout applied to every connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A single SQLite connection behind a mutex.
///
/// The database is opened in rollback-journal mode so the main file is the
/// complete state whenever no transaction is open; file-level backup and
/// restore rely on this.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        conn.query_row("PRAGMA journal_mode=DELETE", [], |_| Ok(()))?;
        debug!(path = %path.display(), "Opened sqlite store");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a batch of semicolon-separated statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    /// Check whether the connection is inside an open transaction.
    pub fn in_transaction(&self) -> bool {
        !self.conn.lock().is_autocommit()
    }
}

impl SqlExecutor for SqliteStore {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<WriteOutcome, StoreError> {
        let conn = self.conn.lock();
        let rows_affected = conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(WriteOutcome {
            rows_affected,
            last_insert_id: conn.last_insert_rowid(),
        })
    }

    fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        match rows.next()? {
            Some(row) => Ok(Some(read_row(row, &columns)?)),
            None => Ok(None),
        }
    }

    fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_row(row, &columns)?);
        }
        Ok(out)
    }
}

fn read_row(row: &rusqlite::Row<'_>, columns: &[String]) -> Result<Row, StoreError> {
    let mut values = Vec::with_capacity(columns.len());
    for idx in 0..columns.len() {
        let value: rusqlite::types::Value = row.get(idx)?;
        values.push(SqlValue::from(value));
    }
    Ok(Row::new(columns.to_vec(), values))
}
