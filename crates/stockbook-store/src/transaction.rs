//! Explicit `BEGIN`/`COMMIT`/`ROLLBACK` scopes over a [`SqlExecutor`].

use crate::error::StoreError;
use crate::executor::SqlExecutor;
use tracing::{debug, warn};

/// An open transaction on an executor.
///
/// The scope must be closed with [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback). Dropping an open scope issues a
/// best-effort `ROLLBACK`.
pub struct Transaction<'a, S: SqlExecutor + ?Sized> {
    store: &'a S,
    label: &'static str,
    open: bool,
}

impl<'a, S: SqlExecutor + ?Sized> Transaction<'a, S> {
    /// Issue `BEGIN` and return the open scope.
    pub fn begin(store: &'a S, label: &'static str) -> Result<Self, StoreError> {
        store.execute("BEGIN", &[])?;
        debug!(scope = label, "Transaction started");
        Ok(Self {
            store,
            label,
            open: true,
        })
    }

    /// The executor this transaction runs on.
    pub fn store(&self) -> &'a S {
        self.store
    }

    /// Commit the transaction.
    ///
    /// If `COMMIT` fails the scope is rolled back before the error is returned.
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.open = false;
        match self.store.execute("COMMIT", &[]) {
            Ok(_) => {
                debug!(scope = self.label, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = self.store.execute("ROLLBACK", &[]) {
                    warn!(scope = self.label, error = %rollback_err, "Rollback after failed commit failed");
                }
                Err(e)
            }
        }
    }

    /// Roll the transaction back.
    pub fn rollback(mut self) -> Result<(), StoreError> {
        self.open = false;
        self.store.execute("ROLLBACK", &[])?;
        debug!(scope = self.label, "Transaction rolled back");
        Ok(())
    }
}

impl<S: SqlExecutor + ?Sized> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.store.execute("ROLLBACK", &[]) {
                warn!(scope = self.label, error = %e, "Implicit rollback failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;
    use tempfile::tempdir;

    fn store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.db")).unwrap();
        store
            .execute_batch("CREATE TABLE suppliers (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();
        (store, dir)
    }

    fn count(store: &SqliteStore) -> i64 {
        store.query_i64("SELECT COUNT(*) FROM suppliers", &[]).unwrap()
    }

    #[test]
    fn test_commit_persists() {
        let (store, _dir) = store();
        let txn = Transaction::begin(&store, "test").unwrap();
        store
            .execute("INSERT INTO suppliers (name) VALUES ('Acme')", &[])
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(count(&store), 1);
    }

    #[test]
    fn test_explicit_rollback_discards() {
        let (store, _dir) = store();
        let txn = Transaction::begin(&store, "test").unwrap();
        store
            .execute("INSERT INTO suppliers (name) VALUES ('Acme')", &[])
            .unwrap();
        txn.rollback().unwrap();
        assert_eq!(count(&store), 0);
        assert!(!store.in_transaction());
    }

    #[test]
    fn test_drop_rolls_back() {
        let (store, _dir) = store();
        {
            let _txn = Transaction::begin(&store, "test").unwrap();
            store
                .execute("INSERT INTO suppliers (name) VALUES ('Acme')", &[])
                .unwrap();
        }
        assert_eq!(count(&store), 0);
        assert!(!store.in_transaction());
    }
}
