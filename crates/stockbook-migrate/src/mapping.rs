//! Legacy-id to identifier mapping.

use crate::catalog::{quote_ident, Table};
use crate::identifier::Identifier;
use std::collections::{BTreeMap, HashMap, HashSet};
use stockbook_store::{SqlExecutor, StoreError};

/// Table holding the persisted mapping after migration.
pub const ID_MAP_TABLE: &str = "id_migration_map";

/// Identifiers assigned to one table's rows, not yet published.
#[derive(Debug)]
pub struct TableMapping {
    table: Table,
    entries: Vec<(i64, Identifier)>,
    issued: HashSet<Identifier>,
}

impl TableMapping {
    /// Start collecting identifiers for `table`.
    pub fn new(table: Table) -> Self {
        Self {
            table,
            entries: Vec::new(),
            issued: HashSet::new(),
        }
    }

    /// The table being migrated.
    pub fn table(&self) -> Table {
        self.table
    }

    /// Record an assignment. Returns `false` if the identifier was already
    /// issued for this table.
    pub fn assign(&mut self, old_id: i64, id: Identifier) -> bool {
        if !self.issued.insert(id.clone()) {
            return false;
        }
        self.entries.push((old_id, id));
        true
    }

    /// Check whether an identifier was already issued for this table.
    pub fn contains(&self, id: &Identifier) -> bool {
        self.issued.contains(id)
    }

    /// Number of assignments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was assigned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps `(table, legacy id)` to the identifier that replaced it.
///
/// A table's entries become visible only once the whole table is published,
/// so children never resolve against a partially migrated parent.
#[derive(Debug, Default)]
pub struct IdMapper {
    entries: HashMap<(Table, i64), Identifier>,
    published: Vec<Table>,
}

impl IdMapper {
    /// Create an empty mapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the identifier assigned to a legacy row.
    pub fn get_uuid_from_mapping(&self, table: Table, old_id: i64) -> Option<&Identifier> {
        self.entries.get(&(table, old_id))
    }

    /// Check whether a table's mapping has been published.
    pub fn is_published(&self, table: Table) -> bool {
        self.published.contains(&table)
    }

    /// Tables published so far, in publication order.
    pub fn published(&self) -> &[Table] {
        &self.published
    }

    /// Make a finished table's assignments visible to dependent tables.
    pub fn publish(&mut self, mapping: TableMapping) {
        let table = mapping.table;
        self.entries.extend(
            mapping
                .entries
                .into_iter()
                .map(|(old_id, id)| ((table, old_id), id)),
        );
        if !self.published.contains(&table) {
            self.published.push(table);
        }
    }

    /// Total number of mapped rows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the mapper holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mapped row count per table.
    pub fn counts(&self) -> BTreeMap<Table, u64> {
        let mut counts: BTreeMap<Table, u64> = self.published.iter().map(|t| (*t, 0)).collect();
        for (table, _) in self.entries.keys() {
            *counts.entry(*table).or_default() += 1;
        }
        counts
    }

    /// Write every entry to [`ID_MAP_TABLE`], replacing earlier contents.
    pub fn persist<S: SqlExecutor>(&self, store: &S) -> Result<(), StoreError> {
        let table = quote_ident(ID_MAP_TABLE);
        store.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 table_name TEXT NOT NULL, \
                 legacy_id INTEGER NOT NULL, \
                 uuid TEXT NOT NULL, \
                 PRIMARY KEY (table_name, legacy_id))"
            ),
            &[],
        )?;
        store.execute(&format!("DELETE FROM {table}"), &[])?;

        let insert = format!("INSERT INTO {table} (table_name, legacy_id, uuid) VALUES (?1, ?2, ?3)");
        for ((t, old_id), id) in &self.entries {
            store.execute(
                &insert,
                &[t.name().into(), (*old_id).into(), id.as_str().into()],
            )?;
        }
        Ok(())
    }
}

/// Read per-table row counts from a persisted mapping, if one exists.
pub fn persisted_counts<S: SqlExecutor>(store: &S) -> Result<Option<BTreeMap<Table, u64>>, StoreError> {
    let exists = store.query_i64(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        &[ID_MAP_TABLE.into()],
    )?;
    if exists == 0 {
        return Ok(None);
    }

    let rows = store.query_all(
        &format!(
            "SELECT table_name, COUNT(*) FROM {} GROUP BY table_name",
            quote_ident(ID_MAP_TABLE)
        ),
        &[],
    )?;
    let mut counts: BTreeMap<Table, u64> = Table::ALL.into_iter().map(|t| (t, 0)).collect();
    for row in rows {
        if let Some(table) = Table::from_name(row.get_text(0)?) {
            counts.insert(table, row.get_i64(1)?.max(0) as u64);
        }
    }
    Ok(Some(counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{IdGenerator, UuidV4Generator};
    use stockbook_store::SqliteStore;
    use tempfile::tempdir;

    #[test]
    fn test_entries_invisible_until_published() {
        let generator = UuidV4Generator;
        let mut mapper = IdMapper::new();
        let mut staged = TableMapping::new(Table::Categories);
        let id = generator.new_identifier();
        assert!(staged.assign(1, id.clone()));

        assert_eq!(mapper.get_uuid_from_mapping(Table::Categories, 1), None);
        mapper.publish(staged);
        assert_eq!(mapper.get_uuid_from_mapping(Table::Categories, 1), Some(&id));
        assert_eq!(mapper.get_uuid_from_mapping(Table::Suppliers, 1), None);
        assert!(mapper.is_published(Table::Categories));
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let id = UuidV4Generator.new_identifier();
        let mut staged = TableMapping::new(Table::Customers);
        assert!(staged.assign(1, id.clone()));
        assert!(!staged.assign(2, id));
        assert_eq!(staged.len(), 1);
    }

    #[test]
    fn test_counts_include_empty_tables() {
        let mut mapper = IdMapper::new();
        mapper.publish(TableMapping::new(Table::Suppliers));
        let mut staged = TableMapping::new(Table::Customers);
        staged.assign(1, UuidV4Generator.new_identifier());
        staged.assign(2, UuidV4Generator.new_identifier());
        mapper.publish(staged);

        let counts = mapper.counts();
        assert_eq!(counts.get(&Table::Suppliers), Some(&0));
        assert_eq!(counts.get(&Table::Customers), Some(&2));
        assert_eq!(mapper.published(), &[Table::Suppliers, Table::Customers]);
    }

    #[test]
    fn test_persist_and_read_counts() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("map.db")).unwrap();
        assert_eq!(persisted_counts(&store).unwrap(), None);

        let mut mapper = IdMapper::new();
        let mut staged = TableMapping::new(Table::Sales);
        for old_id in 1..=3 {
            staged.assign(old_id, UuidV4Generator.new_identifier());
        }
        mapper.publish(staged);
        mapper.persist(&store).unwrap();

        let counts = persisted_counts(&store).unwrap().unwrap();
        assert_eq!(counts[&Table::Sales], 3);
        assert_eq!(counts[&Table::Products], 0);
    }
}
