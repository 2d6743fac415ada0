//! Dynamically typed SQL values and result rows.

use crate::error::StoreError;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::ToSql;

/// A single SQL value, mirroring SQLite's storage classes.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Name of the storage class, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "NULL",
            SqlValue::Integer(_) => "INTEGER",
            SqlValue::Real(_) => "REAL",
            SqlValue::Text(_) => "TEXT",
            SqlValue::Blob(_) => "BLOB",
        }
    }

    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Borrow the value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Read the value as an integer, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

impl From<Value> for SqlValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => SqlValue::Null,
            Value::Integer(i) => SqlValue::Integer(i),
            Value::Real(f) => SqlValue::Real(f),
            Value::Text(s) => SqlValue::Text(s),
            Value::Blob(b) => SqlValue::Blob(b),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Rows inserted, updated or deleted by the statement.
    pub rows_affected: usize,
    /// Rowid of the most recent successful insert on the connection.
    pub last_insert_id: i64,
}

/// A result row: column names paired with values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Build a row from parallel column and value vectors.
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names in select order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Consume the row, yielding its values.
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Get a value by position.
    pub fn get(&self, index: usize) -> Result<&SqlValue, StoreError> {
        self.values.get(index).ok_or(StoreError::ColumnOutOfRange {
            index,
            len: self.values.len(),
        })
    }

    /// Get a value by column name.
    pub fn get_named(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    /// Read a nullable integer column.
    pub fn get_opt_i64(&self, index: usize) -> Result<Option<i64>, StoreError> {
        match self.get(index)? {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(v) => Ok(Some(*v)),
            other => Err(self.mismatch(index, "INTEGER", other)),
        }
    }

    /// Read a non-null integer column.
    pub fn get_i64(&self, index: usize) -> Result<i64, StoreError> {
        match self.get(index)? {
            SqlValue::Integer(v) => Ok(*v),
            other => Err(self.mismatch(index, "INTEGER", other)),
        }
    }

    /// Read a nullable text column.
    pub fn get_opt_text(&self, index: usize) -> Result<Option<&str>, StoreError> {
        match self.get(index)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s)),
            other => Err(self.mismatch(index, "TEXT", other)),
        }
    }

    /// Read a non-null text column.
    pub fn get_text(&self, index: usize) -> Result<&str, StoreError> {
        match self.get(index)? {
            SqlValue::Text(s) => Ok(s),
            other => Err(self.mismatch(index, "TEXT", other)),
        }
    }

    fn mismatch(&self, index: usize, expected: &'static str, found: &SqlValue) -> StoreError {
        StoreError::TypeMismatch {
            column: self
                .columns
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("#{index}")),
            expected,
            found: found.type_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        Row::new(
            vec!["id".into(), "name".into(), "supplier_id".into()],
            vec![
                SqlValue::Integer(7),
                SqlValue::Text("Rice".into()),
                SqlValue::Null,
            ],
        )
    }

    #[test]
    fn test_typed_accessors() {
        let row = sample_row();
        assert_eq!(row.get_i64(0).unwrap(), 7);
        assert_eq!(row.get_text(1).unwrap(), "Rice");
        assert_eq!(row.get_opt_i64(2).unwrap(), None);
        assert_eq!(row.get_named("name"), Some(&SqlValue::Text("Rice".into())));
    }

    #[test]
    fn test_type_mismatch_names_column() {
        let row = sample_row();
        let err = row.get_i64(1).unwrap_err();
        assert!(err.to_string().contains("name"));
        assert!(err.to_string().contains("TEXT"));
    }

    #[test]
    fn test_out_of_range() {
        let row = sample_row();
        assert!(matches!(
            row.get(5),
            Err(StoreError::ColumnOutOfRange { index: 5, len: 3 })
        ));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".into()));
    }
}
