//! Shadow-table creation.
//!
//! The schema phase is the first of two transactional scopes: every shadow
//! table is created inside one `BEGIN`/`COMMIT`, and any failure rolls the
//! whole phase back before the error is returned.

use crate::catalog::{quote_ident, Table};
use crate::error::MigrationError;
use stockbook_store::{SqlExecutor, StoreError, Transaction};
use tracing::{debug, info, warn};

/// A user-created index on a legacy table, re-created after the swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyIndex {
    /// Indexed table.
    pub table: Table,
    /// Index name.
    pub name: String,
    /// The `CREATE INDEX` statement as stored in `sqlite_master`.
    pub sql: String,
}

/// Creates and drops the UUID-keyed shadow tables.
pub struct SchemaBuilder<'a, S: SqlExecutor> {
    store: &'a S,
}

impl<'a, S: SqlExecutor> SchemaBuilder<'a, S> {
    /// Create a schema builder over `store`.
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Create a shadow table for each of the ten tables in one transaction.
    ///
    /// Leftover shadow tables from an interrupted run are dropped first.
    pub fn create_shadow_tables(&self) -> Result<(), MigrationError> {
        let txn = Transaction::begin(self.store, "schema")?;

        for table in Table::ALL {
            if let Err(source) = self.create_shadow_table(table) {
                // Release the transaction before surfacing which table failed.
                if let Err(e) = txn.rollback() {
                    warn!(error = %e, "Schema rollback failed");
                }
                return Err(MigrationError::SchemaCreationFailure { table, source });
            }
            debug!(table = %table, "Shadow table created");
        }

        txn.commit()?;
        info!(tables = Table::ALL.len(), "Shadow tables created");
        Ok(())
    }

    fn create_shadow_table(&self, table: Table) -> Result<(), StoreError> {
        self.store.execute(
            &format!("DROP TABLE IF EXISTS {}", quote_ident(&table.shadow_name())),
            &[],
        )?;
        self.store.execute(&table.def().shadow_ddl(), &[])?;
        Ok(())
    }

    /// Create the integer-keyed tables shipped by older releases, if missing.
    pub fn create_legacy_tables(&self) -> Result<(), StoreError> {
        let txn = Transaction::begin(self.store, "legacy-schema")?;
        for table in Table::ALL {
            self.store.execute(&table.def().legacy_ddl(), &[])?;
        }
        txn.commit()
    }

    /// Check whether a table with this exact name exists.
    pub fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        let count = self.store.query_i64(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[name.into()],
        )?;
        Ok(count > 0)
    }

    /// Check that every legacy table matches the catalog before anything is
    /// written, and collect the indexes the swap must re-create.
    ///
    /// Columns outside the catalog, missing catalog columns, triggers and
    /// views that read a migrated table are refused: the swap would drop
    /// them silently.
    pub fn check_legacy_layout(&self) -> Result<Vec<LegacyIndex>, MigrationError> {
        let views = self.store.query_all(
            "SELECT name, sql FROM sqlite_master WHERE type = 'view'",
            &[],
        )?;
        let mut indexes = Vec::new();

        for table in Table::ALL {
            let unsupported = |detail: String| MigrationError::UnsupportedSchema { table, detail };

            let columns = self
                .store
                .query_all("SELECT name FROM pragma_table_info(?1)", &[table.name().into()])?
                .iter()
                .map(|row| row.get_text(0).map(str::to_ascii_lowercase))
                .collect::<Result<Vec<_>, _>>()?;
            if columns.is_empty() {
                return Err(unsupported("table does not exist".to_string()));
            }

            let expected = table.def().column_names();
            if let Some(extra) = columns.iter().find(|c| !expected.iter().any(|e| *e == c.as_str())) {
                return Err(unsupported(format!("unknown column {extra:?}")));
            }
            if let Some(missing) = expected.iter().find(|e| !columns.iter().any(|c| c.as_str() == **e)) {
                return Err(unsupported(format!("missing column {missing:?}")));
            }

            let triggers = self.store.query_all(
                "SELECT name FROM sqlite_master WHERE type = 'trigger' AND tbl_name = ?1",
                &[table.name().into()],
            )?;
            if let Some(trigger) = triggers.first() {
                return Err(unsupported(format!("trigger {:?}", trigger.get_text(0)?)));
            }

            for view in &views {
                let sql = view.get_opt_text(1)?.unwrap_or_default().to_ascii_lowercase();
                if sql.contains(table.name()) {
                    return Err(unsupported(format!("view {:?} reads it", view.get_text(0)?)));
                }
            }

            for row in self.store.query_all(
                "SELECT name, sql FROM sqlite_master \
                 WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY name",
                &[table.name().into()],
            )? {
                indexes.push(LegacyIndex {
                    table,
                    name: row.get_text(0)?.to_string(),
                    sql: row.get_text(1)?.to_string(),
                });
            }
        }

        debug!(indexes = indexes.len(), "Legacy layout matches catalog");
        Ok(indexes)
    }

    /// Declared type of a table's `id` column, upper-cased.
    ///
    /// Returns `None` if the table or column does not exist.
    pub fn id_column_type(&self, table: Table) -> Result<Option<String>, StoreError> {
        let row = self.store.query_one(
            "SELECT type FROM pragma_table_info(?1) WHERE name = 'id'",
            &[table.name().into()],
        )?;
        match row {
            Some(row) => Ok(row.get_opt_text(0)?.map(str::to_ascii_uppercase)),
            None => Ok(None),
        }
    }
}
