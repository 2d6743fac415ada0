//! Row migration and the table swap.
//!
//! Rows are copied from each legacy table into its shadow table with a fresh
//! identifier, foreign keys rewritten through the [`IdMapper`]. The caller
//! wraps row migration and [`RowMigrator::swap_tables`] in the second
//! transactional scope so the swap commits together with the rows.

use crate::catalog::{quote_ident, relations, ForeignKey, Table};
use crate::error::MigrationError;
use crate::identifier::{IdGenerator, Identifier};
use crate::mapping::{IdMapper, TableMapping};
use crate::schema::LegacyIndex;
use stockbook_store::{Row, SqlExecutor, SqlValue, StoreError};
use tracing::{debug, info};

/// Fresh identifiers drawn before a generator is declared broken.
const MAX_GENERATION_ATTEMPTS: usize = 8;

/// A row read from an integer-keyed table.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyRow {
    /// Source table.
    pub table: Table,
    /// Legacy primary key.
    pub id: i64,
    /// Legacy foreign keys, in catalog order.
    pub foreign_keys: Vec<Option<i64>>,
    /// Payload columns, in catalog order.
    pub payload: Vec<SqlValue>,
}

impl LegacyRow {
    /// Decode a row selected with [`TableDef::column_list`](crate::catalog::TableDef::column_list).
    pub fn decode(table: Table, row: &Row) -> Result<Self, StoreError> {
        let fk_count = table.foreign_keys().len();
        let id = row.get_i64(0)?;
        let foreign_keys = (1..=fk_count)
            .map(|i| row.get_opt_i64(i))
            .collect::<Result<Vec<_>, _>>()?;
        let payload = (1 + fk_count..row.len())
            .map(|i| row.get(i).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            table,
            id,
            foreign_keys,
            payload,
        })
    }
}

/// A row ready for its shadow table.
#[derive(Debug, Clone, PartialEq)]
pub struct MigratedRow {
    /// Target table.
    pub table: Table,
    /// New primary key.
    pub id: Identifier,
    /// Rewritten foreign keys, in catalog order.
    pub foreign_keys: Vec<Option<Identifier>>,
    /// Payload columns, unchanged.
    pub payload: Vec<SqlValue>,
}

impl MigratedRow {
    /// Insert parameters in column order.
    pub fn into_params(self) -> Vec<SqlValue> {
        std::iter::once(SqlValue::Text(self.id.to_string()))
            .chain(
                self.foreign_keys
                    .into_iter()
                    .map(|fk| SqlValue::from(fk.map(|id| id.to_string()))),
            )
            .chain(self.payload)
            .collect()
    }
}

/// Copies legacy rows into shadow tables and swaps them into place.
pub struct RowMigrator<'a, S: SqlExecutor, G: IdGenerator> {
    store: &'a S,
    ids: &'a G,
    mapper: IdMapper,
    processed: Vec<Table>,
}

impl<'a, S: SqlExecutor, G: IdGenerator> RowMigrator<'a, S, G> {
    /// Create a migrator with an empty mapping.
    pub fn new(store: &'a S, ids: &'a G) -> Self {
        Self {
            store,
            ids,
            mapper: IdMapper::new(),
            processed: Vec::new(),
        }
    }

    /// The mapping built so far.
    pub fn mapper(&self) -> &IdMapper {
        &self.mapper
    }

    /// Tables migrated so far, in order.
    pub fn processed(&self) -> &[Table] {
        &self.processed
    }

    /// Migrate all ten tables in dependency order.
    ///
    /// Fails with [`MigrationError::ForeignKeysEnforced`] unless the
    /// connection has `PRAGMA foreign_keys` off.
    pub fn migrate_all(&mut self) -> Result<Vec<Table>, MigrationError> {
        self.migrate_all_with(|_, _| {})
    }

    /// Migrate all ten tables, calling `on_table` after each with the table
    /// and the number of rows copied.
    ///
    /// Same preconditions as [`RowMigrator::migrate_all`].
    pub fn migrate_all_with(
        &mut self,
        mut on_table: impl FnMut(Table, usize),
    ) -> Result<Vec<Table>, MigrationError> {
        for table in Table::ALL {
            let rows = self.migrate_table(table)?;
            on_table(table, rows);
        }
        Ok(self.processed.clone())
    }

    /// Copy one table's rows into its shadow table and publish its mapping.
    ///
    /// Every table the given one depends on must already be migrated, and
    /// foreign-key enforcement must be off: shadow rows reference shadow
    /// parents that the schema declares against the legacy names.
    pub fn migrate_table(&mut self, table: Table) -> Result<usize, MigrationError> {
        self.require_unenforced_foreign_keys()?;
        let def = table.def();
        let rows = self.store.query_all(
            &format!(
                "SELECT {} FROM {} ORDER BY \"id\"",
                def.column_list(),
                quote_ident(table.name())
            ),
            &[],
        )?;

        let placeholders = (1..=def.column_names().len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(&table.shadow_name()),
            def.column_list()
        );

        let mut staged = TableMapping::new(table);
        for row in &rows {
            let legacy = LegacyRow::decode(table, row)?;
            let migrated = self.migrate_row(legacy, &mut staged)?;
            self.store.execute(&insert, &migrated.into_params())?;
        }

        let count = staged.len();
        self.mapper.publish(staged);
        if !self.processed.contains(&table) {
            self.processed.push(table);
        }
        debug!(table = %table, rows = count, "Table migrated");
        Ok(count)
    }

    fn migrate_row(
        &self,
        legacy: LegacyRow,
        staged: &mut TableMapping,
    ) -> Result<MigratedRow, MigrationError> {
        let table = legacy.table;
        let foreign_keys = table
            .foreign_keys()
            .iter()
            .zip(legacy.foreign_keys)
            .map(|(fk, old_id)| self.resolve(fk, old_id))
            .collect::<Result<Vec<_>, _>>()?;

        let id = self.fresh_identifier(staged)?;
        staged.assign(legacy.id, id.clone());

        Ok(MigratedRow {
            table,
            id,
            foreign_keys,
            payload: legacy.payload,
        })
    }

    /// Rewrite one legacy foreign key.
    fn resolve(
        &self,
        fk: &ForeignKey,
        old_id: Option<i64>,
    ) -> Result<Option<Identifier>, MigrationError> {
        let Some(old_id) = old_id else {
            if fk.required {
                return Err(MigrationError::ReferentialIntegrityViolation {
                    table: fk.table,
                    column: fk.column,
                    parent: fk.references,
                    old_id: None,
                });
            }
            return Ok(None);
        };

        if let Some(id) = self.mapper.get_uuid_from_mapping(fk.references, old_id) {
            return Ok(Some(id.clone()));
        }

        if self.parent_exists(fk.references, old_id)? {
            Err(MigrationError::MappingOrderViolation {
                table: fk.table,
                column: fk.column,
                parent: fk.references,
                old_id,
            })
        } else {
            Err(MigrationError::ReferentialIntegrityViolation {
                table: fk.table,
                column: fk.column,
                parent: fk.references,
                old_id: Some(old_id),
            })
        }
    }

    fn parent_exists(&self, parent: Table, old_id: i64) -> Result<bool, StoreError> {
        let row = self.store.query_one(
            &format!("SELECT 1 FROM {} WHERE \"id\" = ?1", quote_ident(parent.name())),
            &[old_id.into()],
        )?;
        Ok(row.is_some())
    }

    fn fresh_identifier(&self, staged: &TableMapping) -> Result<Identifier, MigrationError> {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let id = self.ids.new_identifier();
            if !self.ids.is_valid_identifier(id.as_str()) {
                return Err(MigrationError::IdentifierGeneration {
                    table: staged.table(),
                    reason: format!("generator produced malformed identifier {id:?}"),
                });
            }
            if !staged.contains(&id) {
                return Ok(id);
            }
        }
        Err(MigrationError::IdentifierGeneration {
            table: staged.table(),
            reason: format!("no unique identifier after {MAX_GENERATION_ATTEMPTS} attempts"),
        })
    }

    fn require_unenforced_foreign_keys(&self) -> Result<(), MigrationError> {
        if self.store.query_i64("PRAGMA foreign_keys", &[])? != 0 {
            return Err(MigrationError::ForeignKeysEnforced);
        }
        Ok(())
    }

    /// Replace every legacy table with its shadow, re-create `preserved`
    /// indexes and index the foreign keys.
    ///
    /// Must run inside the caller's transaction with foreign-key enforcement
    /// off, since parents are dropped while children still reference them.
    pub fn swap_tables(&self, preserved: &[LegacyIndex]) -> Result<(), MigrationError> {
        self.require_unenforced_foreign_keys()?;
        for table in Table::ALL {
            self.store
                .execute(&format!("DROP TABLE {}", quote_ident(table.name())), &[])?;
            self.store.execute(
                &format!(
                    "ALTER TABLE {} RENAME TO {}",
                    quote_ident(&table.shadow_name()),
                    quote_ident(table.name())
                ),
                &[],
            )?;
        }

        for index in preserved {
            self.store.execute(&index.sql, &[])?;
            debug!(table = %index.table, index = %index.name, "Index re-created");
        }

        for fk in relations() {
            self.store.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote_ident(&fk.index_name()),
                    quote_ident(fk.table.name()),
                    quote_ident(fk.column)
                ),
                &[],
            )?;
        }

        info!(tables = Table::ALL.len(), "Shadow tables swapped into place");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{is_valid_identifier, UuidV4Generator};
    use crate::schema::SchemaBuilder;
    use stockbook_store::SqliteStore;
    use tempfile::tempdir;

    fn store_with_shadows() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("shop.db")).unwrap();
        store.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        let builder = SchemaBuilder::new(&store);
        builder.create_legacy_tables().unwrap();
        store
            .execute_batch(
                r#"
                INSERT INTO categories (id, name) VALUES (1, 'Grains'), (2, 'Spices');
                INSERT INTO suppliers (id, name) VALUES (10, 'Acme');
                INSERT INTO products (id, name, category_id, supplier_id, selling_price)
                    VALUES (1, 'Rice', 1, 10, 2.5), (2, 'Pepper', 2, NULL, 4.0);
                INSERT INTO sales (id, customer_id, total_amount) VALUES (1, NULL, 9.0);
                INSERT INTO sale_items (id, sale_id, product_id, quantity, unit_price, total_price)
                    VALUES (1, 1, 1, 2, 2.5, 5.0), (2, 1, 2, 1, 4.0, 4.0);
                "#,
            )
            .unwrap();
        builder.create_shadow_tables().unwrap();
        (store, dir)
    }

    #[test]
    fn test_decode_and_params() {
        let row = Row::new(
            vec!["id".into(), "sale_id".into(), "product_id".into(), "quantity".into()],
            vec![
                SqlValue::Integer(3),
                SqlValue::Integer(1),
                SqlValue::Null,
                SqlValue::Integer(2),
            ],
        );
        let legacy = LegacyRow::decode(Table::SaleItems, &row).unwrap();
        assert_eq!(legacy.id, 3);
        assert_eq!(legacy.foreign_keys, vec![Some(1), None]);
        assert_eq!(legacy.payload, vec![SqlValue::Integer(2)]);

        let id = UuidV4Generator.new_identifier();
        let migrated = MigratedRow {
            table: Table::SaleItems,
            id: id.clone(),
            foreign_keys: vec![None],
            payload: vec![SqlValue::Real(1.0)],
        };
        assert_eq!(
            migrated.into_params(),
            vec![SqlValue::Text(id.to_string()), SqlValue::Null, SqlValue::Real(1.0)]
        );
    }

    #[test]
    fn test_migrate_all_rewrites_foreign_keys() {
        let (store, _dir) = store_with_shadows();
        let generator = UuidV4Generator;
        let mut migrator = RowMigrator::new(&store, &generator);
        let processed = migrator.migrate_all().unwrap();
        assert_eq!(processed, Table::ALL.to_vec());

        let rice = migrator
            .mapper()
            .get_uuid_from_mapping(Table::Products, 1)
            .unwrap()
            .clone();
        let grains = migrator
            .mapper()
            .get_uuid_from_mapping(Table::Categories, 1)
            .unwrap()
            .clone();

        let row = store
            .query_one(
                "SELECT category_id, supplier_id FROM products__uuid WHERE id = ?1",
                &[rice.as_str().into()],
            )
            .unwrap()
            .unwrap();
        assert_eq!(row.get_text(0).unwrap(), grains.as_str());
        assert!(is_valid_identifier(row.get_text(1).unwrap()));

        let pepper_supplier = store
            .query_one(
                "SELECT supplier_id FROM products__uuid WHERE name = 'Pepper'",
                &[],
            )
            .unwrap()
            .unwrap();
        assert_eq!(pepper_supplier.get_opt_text(0).unwrap(), None);

        assert_eq!(
            store
                .query_i64(
                    "SELECT COUNT(*) FROM sale_items__uuid WHERE product_id = ?1",
                    &[rice.as_str().into()]
                )
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_out_of_order_is_mapping_order_violation() {
        let (store, _dir) = store_with_shadows();
        let generator = UuidV4Generator;
        let mut migrator = RowMigrator::new(&store, &generator);
        let err = migrator.migrate_table(Table::Products).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::MappingOrderViolation {
                table: Table::Products,
                parent: Table::Categories,
                old_id: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_parent_is_referential_violation() {
        let (store, _dir) = store_with_shadows();
        store
            .execute(
                "INSERT INTO sale_items (id, sale_id, product_id, quantity, unit_price, total_price) \
                 VALUES (3, 1, 77, 1, 1.0, 1.0)",
                &[],
            )
            .unwrap();
        let generator = UuidV4Generator;
        let mut migrator = RowMigrator::new(&store, &generator);
        let err = migrator.migrate_all().unwrap_err();
        assert!(matches!(
            err,
            MigrationError::ReferentialIntegrityViolation {
                table: Table::SaleItems,
                column: "product_id",
                old_id: Some(77),
                ..
            }
        ));
    }

    #[test]
    fn test_null_required_key_is_referential_violation() {
        let (store, _dir) = store_with_shadows();
        store
            .execute("UPDATE products SET category_id = NULL WHERE id = 2", &[])
            .unwrap();
        let generator = UuidV4Generator;
        let mut migrator = RowMigrator::new(&store, &generator);
        let err = migrator.migrate_all().unwrap_err();
        assert!(matches!(
            err,
            MigrationError::ReferentialIntegrityViolation { old_id: None, .. }
        ));
    }

    struct StuckGenerator(Identifier);

    impl IdGenerator for StuckGenerator {
        fn new_identifier(&self) -> Identifier {
            self.0.clone()
        }
    }

    #[test]
    fn test_repeating_generator_is_rejected() {
        let (store, _dir) = store_with_shadows();
        let generator = StuckGenerator(UuidV4Generator.new_identifier());
        let mut migrator = RowMigrator::new(&store, &generator);
        let err = migrator.migrate_table(Table::Categories).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::IdentifierGeneration {
                table: Table::Categories,
                ..
            }
        ));
    }

    #[test]
    fn test_enforced_foreign_keys_are_refused() {
        let (store, _dir) = store_with_shadows();
        store.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let generator = UuidV4Generator;
        let mut migrator = RowMigrator::new(&store, &generator);
        let err = migrator.migrate_table(Table::Categories).unwrap_err();
        assert!(matches!(err, MigrationError::ForeignKeysEnforced));
        assert!(migrator.processed().is_empty());
        assert!(matches!(
            migrator.swap_tables(&[]).unwrap_err(),
            MigrationError::ForeignKeysEnforced
        ));
        assert_eq!(store.query_i64("SELECT COUNT(*) FROM categories__uuid", &[]).unwrap(), 0);
    }

    #[test]
    fn test_swap_recreates_preserved_indexes() {
        let (store, _dir) = store_with_shadows();
        store
            .execute_batch("CREATE UNIQUE INDEX idx_products_barcode ON products(barcode);")
            .unwrap();
        let preserved = SchemaBuilder::new(&store).check_legacy_layout().unwrap();
        let generator = UuidV4Generator;
        let mut migrator = RowMigrator::new(&store, &generator);
        migrator.migrate_all().unwrap();
        migrator.swap_tables(&preserved).unwrap();

        let sql = store
            .query_one(
                "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = 'idx_products_barcode'",
                &[],
            )
            .unwrap()
            .unwrap();
        assert!(sql.get_text(0).unwrap().contains("products"));
    }

    #[test]
    fn test_swap_replaces_tables_and_indexes_foreign_keys() {
        let (store, _dir) = store_with_shadows();
        let generator = UuidV4Generator;
        let mut migrator = RowMigrator::new(&store, &generator);
        migrator.migrate_all().unwrap();
        migrator.swap_tables(&[]).unwrap();

        let builder = SchemaBuilder::new(&store);
        for table in Table::ALL {
            assert_eq!(builder.id_column_type(table).unwrap().as_deref(), Some("TEXT"));
            assert!(!builder.table_exists(&table.shadow_name()).unwrap());
        }
        for fk in relations() {
            assert_eq!(
                store
                    .query_i64(
                        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
                        &[fk.index_name().into()]
                    )
                    .unwrap(),
                1
            );
        }
        assert_eq!(store.query_i64("SELECT COUNT(*) FROM sale_items", &[]).unwrap(), 2);
    }
}
