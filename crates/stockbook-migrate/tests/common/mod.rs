//! Shared fixtures for the migration integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use stockbook_migrate::schema::SchemaBuilder;
use stockbook_migrate::validator::count_rows;
use stockbook_migrate::{MigrationConfig, MigrationEngine, Table, UuidV4Generator};
use stockbook_store::{FileOps, LocalFs, Row, SqlExecutor, SqlValue, SqliteStore, StoreError, WriteOutcome};
use tempfile::TempDir;

/// A small shop with one orphaned sale item (product 5 never existed) and
/// one product without a category.
pub const SHOP_SEED: &str = r#"
    INSERT INTO categories (id, name) VALUES (1, 'Beverages'), (2, 'Snacks');
    INSERT INTO expense_categories (id, name) VALUES (1, 'Rent'), (2, 'Utilities');
    INSERT INTO suppliers (id, name, phone) VALUES (1, 'Metro Wholesale', '555-0100'), (2, 'Fresh Farms', '555-0101');
    INSERT INTO customers (id, name) VALUES (1, 'Walk-in'), (2, 'Amina Yusuf'), (3, 'Kofi Mensah');
    INSERT INTO products (id, name, category_id, supplier_id, cost_price, selling_price, stock_quantity) VALUES
        (1, 'Cola 500ml', 1, 1, 0.6, 1.0, 48),
        (2, 'Orange Juice', 1, 2, 1.2, 2.0, 20),
        (3, 'Crisps', 2, 1, 0.4, 0.8, 60),
        (4, 'Loose Candy', NULL, NULL, 0.1, 0.25, 200);
    INSERT INTO sales (id, customer_id, total_amount, payment_method) VALUES
        (1, 2, 3.0, 'cash'),
        (2, NULL, 0.8, 'card'),
        (3, 3, 2.25, 'cash');
    INSERT INTO sale_items (id, sale_id, product_id, quantity, unit_price, total_price) VALUES
        (1, 1, 1, 1, 1.0, 1.0),
        (2, 1, 2, 1, 2.0, 2.0),
        (3, 2, 3, 1, 0.8, 0.8),
        (4, 3, 4, 1, 0.25, 0.25),
        (5, 3, 5, 2, 1.0, 2.0);
    INSERT INTO expenses (id, category_id, amount, description) VALUES
        (1, 1, 500.0, 'March rent'),
        (2, 2, 42.5, 'Electricity');
    INSERT INTO stock_movements (id, product_id, supplier_id, movement_type, quantity) VALUES
        (1, 1, 1, 'in', 48),
        (2, 3, NULL, 'in', 60),
        (3, 4, NULL, 'adjustment', 200);
    INSERT INTO bulk_pricing (id, product_id, min_quantity, price) VALUES
        (1, 1, 12, 0.9),
        (2, 3, 24, 0.7);
"#;

pub struct TestContext {
    pub db_path: PathBuf,
    dir: TempDir,
}

impl TestContext {
    /// A legacy database loaded with [`SHOP_SEED`].
    pub fn seeded() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("stockbook.db");
        let store = SqliteStore::open(&db_path).unwrap();
        // The seed holds broken references for the integrity pass to repair.
        store.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        SchemaBuilder::new(&store).create_legacy_tables().unwrap();
        store.execute_batch(SHOP_SEED).unwrap();
        Self { db_path, dir }
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    pub fn config(&self) -> MigrationConfig {
        MigrationConfig::new(&self.db_path).with_backup_dir(self.backup_dir())
    }

    pub fn engine(&self) -> MigrationEngine<SqliteStore> {
        MigrationEngine::open(self.config()).unwrap()
    }

    pub fn failing_engine(&self, files: FailingFs) -> MigrationEngine<FailingStore, FailingFs> {
        let store = FailingStore::new(SqliteStore::open(&self.db_path).unwrap());
        MigrationEngine::with_parts(store, files, UuidV4Generator, self.config())
    }

    /// Backup files written so far.
    pub fn backups(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.backup_dir()) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Store wrapper that fails any statement containing a chosen fragment.
pub struct FailingStore {
    inner: SqliteStore,
    fail_on: Mutex<Option<String>>,
}

impl FailingStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            fail_on: Mutex::new(None),
        }
    }

    pub fn fail_on(&self, fragment: &str) {
        *self.fail_on.lock() = Some(fragment.to_string());
    }

    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }

    fn check(&self, sql: &str) -> Result<(), StoreError> {
        match self.fail_on.lock().as_deref() {
            Some(fragment) if sql.contains(fragment) => Err(StoreError::Io(io::Error::other(
                format!("injected failure on {fragment}"),
            ))),
            _ => Ok(()),
        }
    }
}

impl SqlExecutor for FailingStore {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<WriteOutcome, StoreError> {
        self.check(sql)?;
        self.inner.execute(sql, params)
    }

    fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, StoreError> {
        self.check(sql)?;
        self.inner.query_one(sql, params)
    }

    fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StoreError> {
        self.check(sql)?;
        self.inner.query_all(sql, params)
    }
}

/// Local file system that stops copying after a set number of copies.
pub struct FailingFs {
    copies_left: AtomicUsize,
}

impl FailingFs {
    pub fn unlimited() -> Self {
        Self::allowing(usize::MAX)
    }

    pub fn allowing(copies: usize) -> Self {
        Self {
            copies_left: AtomicUsize::new(copies),
        }
    }
}

impl FileOps for FailingFs {
    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let allowed = self
            .copies_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "disk is read-only"));
        }
        LocalFs.copy_file(from, to)
    }

    fn file_exists(&self, path: &Path) -> bool {
        LocalFs.file_exists(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        LocalFs.create_dir_all(path)
    }
}

/// Declared `id` type of every table.
pub fn id_types<S: SqlExecutor>(store: &S) -> BTreeMap<Table, Option<String>> {
    let schema = SchemaBuilder::new(store);
    Table::ALL
        .into_iter()
        .map(|t| (t, schema.id_column_type(t).unwrap()))
        .collect()
}

pub fn assert_all_ids_typed<S: SqlExecutor>(store: &S, expected: &str) {
    for (table, id_type) in id_types(store) {
        assert_eq!(id_type.as_deref(), Some(expected), "id type of {table}");
    }
}

pub fn counts<S: SqlExecutor>(store: &S) -> BTreeMap<Table, u64> {
    count_rows(store).unwrap()
}

pub fn shadow_table_count<S: SqlExecutor>(store: &S) -> i64 {
    store
        .query_i64(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name GLOB '*__uuid'",
            &[],
        )
        .unwrap()
}

/// Row counts of [`SHOP_SEED`] after the integrity pass.
pub fn repaired_counts() -> BTreeMap<Table, u64> {
    BTreeMap::from([
        (Table::Categories, 3),
        (Table::ExpenseCategories, 2),
        (Table::Suppliers, 2),
        (Table::Customers, 3),
        (Table::Products, 4),
        (Table::Sales, 3),
        (Table::Expenses, 2),
        (Table::SaleItems, 4),
        (Table::StockMovements, 3),
        (Table::BulkPricing, 2),
    ])
}
