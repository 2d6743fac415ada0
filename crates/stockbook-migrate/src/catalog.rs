//! Table catalog for the Stockbook dataset.
//!
//! Ten tables form a dependency DAG through nine foreign-key relations. The
//! catalog is the single definition from which both the legacy
//! (integer-keyed) and shadow (UUID-keyed) DDL are rendered.

use serde::Serialize;
use std::fmt;

/// Suffix appended to a table name to form its shadow table.
pub const SHADOW_SUFFIX: &str = "__uuid";

/// One of the ten migrated tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Product categories.
    Categories,
    /// Expense categories.
    ExpenseCategories,
    /// Suppliers.
    Suppliers,
    /// Customers.
    Customers,
    /// Products (categories, suppliers).
    Products,
    /// Sales (customers).
    Sales,
    /// Expenses (expense categories).
    Expenses,
    /// Sale line items (sales, products).
    SaleItems,
    /// Stock movements (products, suppliers).
    StockMovements,
    /// Bulk pricing tiers (products).
    BulkPricing,
}

impl Table {
    /// Every table in migration order: no table precedes one it depends on.
    pub const ALL: [Table; 10] = [
        Table::Categories,
        Table::ExpenseCategories,
        Table::Suppliers,
        Table::Customers,
        Table::Products,
        Table::Sales,
        Table::Expenses,
        Table::SaleItems,
        Table::StockMovements,
        Table::BulkPricing,
    ];

    /// SQL name of the table.
    pub fn name(self) -> &'static str {
        match self {
            Table::Categories => "categories",
            Table::ExpenseCategories => "expense_categories",
            Table::Suppliers => "suppliers",
            Table::Customers => "customers",
            Table::Products => "products",
            Table::Sales => "sales",
            Table::Expenses => "expenses",
            Table::SaleItems => "sale_items",
            Table::StockMovements => "stock_movements",
            Table::BulkPricing => "bulk_pricing",
        }
    }

    /// Look a table up by its SQL name.
    pub fn from_name(name: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Name of the shadow table built during migration.
    pub fn shadow_name(self) -> String {
        format!("{}{}", self.name(), SHADOW_SUFFIX)
    }

    /// Column and relation definition.
    pub fn def(self) -> &'static TableDef {
        match self {
            Table::Categories => &CATEGORIES,
            Table::ExpenseCategories => &EXPENSE_CATEGORIES,
            Table::Suppliers => &SUPPLIERS,
            Table::Customers => &CUSTOMERS,
            Table::Products => &PRODUCTS,
            Table::Sales => &SALES,
            Table::Expenses => &EXPENSES,
            Table::SaleItems => &SALE_ITEMS,
            Table::StockMovements => &STOCK_MOVEMENTS,
            Table::BulkPricing => &BULK_PRICING,
        }
    }

    /// Foreign keys declared on this table.
    pub fn foreign_keys(self) -> &'static [ForeignKey] {
        self.def().foreign_keys
    }

    /// Tables this table references.
    pub fn depends_on(self) -> impl Iterator<Item = Table> {
        self.foreign_keys().iter().map(|fk| fk.references)
    }

    /// Position in [`Table::ALL`].
    pub fn migration_rank(self) -> usize {
        Table::ALL
            .iter()
            .position(|t| *t == self)
            .unwrap_or(Table::ALL.len())
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage affinity of a payload column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// INTEGER.
    Integer,
    /// REAL.
    Real,
    /// TEXT.
    Text,
}

impl Affinity {
    fn sql(self) -> &'static str {
        match self {
            Affinity::Integer => "INTEGER",
            Affinity::Real => "REAL",
            Affinity::Text => "TEXT",
        }
    }
}

/// A non-key column carried through the migration unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: &'static str,
    /// Storage affinity.
    pub affinity: Affinity,
    /// Whether the column is declared NOT NULL.
    pub not_null: bool,
    /// SQL default expression, if any.
    pub default: Option<&'static str>,
}

impl ColumnDef {
    const fn new(name: &'static str, affinity: Affinity) -> Self {
        Self {
            name,
            affinity,
            not_null: false,
            default: None,
        }
    }

    const fn required(name: &'static str, affinity: Affinity) -> Self {
        Self {
            name,
            affinity,
            not_null: true,
            default: None,
        }
    }

    const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    fn render(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(self.name), self.affinity.sql());
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// A foreign-key relation from a child column to a parent table's `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    /// Child table.
    pub table: Table,
    /// Child column holding the parent id.
    pub column: &'static str,
    /// Parent table.
    pub references: Table,
    /// Whether the column must be non-null.
    pub required: bool,
}

impl ForeignKey {
    const fn required(table: Table, column: &'static str, references: Table) -> Self {
        Self {
            table,
            column,
            references,
            required: true,
        }
    }

    const fn optional(table: Table, column: &'static str, references: Table) -> Self {
        Self {
            table,
            column,
            references,
            required: false,
        }
    }

    /// Name of the index created on the child column.
    pub fn index_name(&self) -> String {
        format!("idx_{}_{}", self.table.name(), self.column)
    }

    /// Count query for child rows whose non-null key has no parent.
    pub fn orphan_count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM {child} WHERE {col} IS NOT NULL AND {col} NOT IN (SELECT id FROM {parent})",
            child = quote_ident(self.table.name()),
            col = quote_ident(self.column),
            parent = quote_ident(self.references.name()),
        )
    }
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} -> {}", self.table, self.column, self.references)
    }
}

/// Definition of one table: key columns plus payload.
#[derive(Debug)]
pub struct TableDef {
    /// The table.
    pub table: Table,
    /// Foreign-key columns, in column order.
    pub foreign_keys: &'static [ForeignKey],
    /// Remaining columns, in column order.
    pub payload: &'static [ColumnDef],
}

impl TableDef {
    /// Column names in storage order: `id`, foreign keys, payload.
    pub fn column_names(&self) -> Vec<&'static str> {
        std::iter::once("id")
            .chain(self.foreign_keys.iter().map(|fk| fk.column))
            .chain(self.payload.iter().map(|c| c.name))
            .collect()
    }

    /// Quoted, comma-separated column list.
    pub fn column_list(&self) -> String {
        self.column_names()
            .into_iter()
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// DDL for the integer-keyed table as shipped by older releases.
    ///
    /// Foreign-key columns are nullable here: older releases never enforced
    /// them, which is why the integrity pass exists.
    pub fn legacy_ddl(&self) -> String {
        let mut columns = vec!["\"id\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
        for fk in self.foreign_keys {
            columns.push(format!(
                "{} INTEGER REFERENCES {}(\"id\")",
                quote_ident(fk.column),
                quote_ident(fk.references.name())
            ));
        }
        columns.extend(self.payload.iter().map(ColumnDef::render));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(self.table.name()),
            columns.join(", ")
        )
    }

    /// DDL for the UUID-keyed shadow table.
    pub fn shadow_ddl(&self) -> String {
        let mut columns = vec!["\"id\" TEXT PRIMARY KEY NOT NULL".to_string()];
        for fk in self.foreign_keys {
            let null = if fk.required { " NOT NULL" } else { "" };
            columns.push(format!(
                "{} TEXT{} REFERENCES {}(\"id\")",
                quote_ident(fk.column),
                null,
                quote_ident(fk.references.name())
            ));
        }
        columns.extend(self.payload.iter().map(ColumnDef::render));
        format!(
            "CREATE TABLE {} ({})",
            quote_ident(&self.table.shadow_name()),
            columns.join(", ")
        )
    }
}

/// Every foreign-key relation, grouped by child table in migration order.
pub fn relations() -> impl Iterator<Item = &'static ForeignKey> {
    Table::ALL.into_iter().flat_map(|t| t.foreign_keys().iter())
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

use Affinity::{Integer, Real, Text};

const CREATED_AT: ColumnDef = ColumnDef::new("created_at", Text).with_default("CURRENT_TIMESTAMP");

static CATEGORIES: TableDef = TableDef {
    table: Table::Categories,
    foreign_keys: &[],
    payload: &[
        ColumnDef::required("name", Text),
        ColumnDef::new("description", Text),
        CREATED_AT,
    ],
};

static EXPENSE_CATEGORIES: TableDef = TableDef {
    table: Table::ExpenseCategories,
    foreign_keys: &[],
    payload: &[
        ColumnDef::required("name", Text),
        ColumnDef::new("description", Text),
        CREATED_AT,
    ],
};

static SUPPLIERS: TableDef = TableDef {
    table: Table::Suppliers,
    foreign_keys: &[],
    payload: &[
        ColumnDef::required("name", Text),
        ColumnDef::new("contact_person", Text),
        ColumnDef::new("phone", Text),
        ColumnDef::new("email", Text),
        ColumnDef::new("address", Text),
        CREATED_AT,
    ],
};

static CUSTOMERS: TableDef = TableDef {
    table: Table::Customers,
    foreign_keys: &[],
    payload: &[
        ColumnDef::required("name", Text),
        ColumnDef::new("phone", Text),
        ColumnDef::new("email", Text),
        ColumnDef::new("address", Text),
        CREATED_AT,
    ],
};

static PRODUCTS: TableDef = TableDef {
    table: Table::Products,
    foreign_keys: &[
        ForeignKey::required(Table::Products, "category_id", Table::Categories),
        ForeignKey::optional(Table::Products, "supplier_id", Table::Suppliers),
    ],
    payload: &[
        ColumnDef::required("name", Text),
        ColumnDef::new("barcode", Text),
        ColumnDef::new("cost_price", Real),
        ColumnDef::required("selling_price", Real),
        ColumnDef::required("stock_quantity", Integer).with_default("0"),
        ColumnDef::new("min_stock_level", Integer).with_default("0"),
        ColumnDef::new("unit", Text),
        CREATED_AT,
        ColumnDef::new("updated_at", Text),
    ],
};

static SALES: TableDef = TableDef {
    table: Table::Sales,
    foreign_keys: &[ForeignKey::optional(
        Table::Sales,
        "customer_id",
        Table::Customers,
    )],
    payload: &[
        ColumnDef::required("total_amount", Real),
        ColumnDef::new("discount", Real).with_default("0"),
        ColumnDef::new("payment_method", Text),
        ColumnDef::new("notes", Text),
        CREATED_AT,
    ],
};

static EXPENSES: TableDef = TableDef {
    table: Table::Expenses,
    foreign_keys: &[ForeignKey::required(
        Table::Expenses,
        "category_id",
        Table::ExpenseCategories,
    )],
    payload: &[
        ColumnDef::required("amount", Real),
        ColumnDef::new("description", Text),
        ColumnDef::new("expense_date", Text),
        CREATED_AT,
    ],
};

static SALE_ITEMS: TableDef = TableDef {
    table: Table::SaleItems,
    foreign_keys: &[
        ForeignKey::required(Table::SaleItems, "sale_id", Table::Sales),
        ForeignKey::required(Table::SaleItems, "product_id", Table::Products),
    ],
    payload: &[
        ColumnDef::required("quantity", Integer),
        ColumnDef::required("unit_price", Real),
        ColumnDef::required("total_price", Real),
    ],
};

static STOCK_MOVEMENTS: TableDef = TableDef {
    table: Table::StockMovements,
    foreign_keys: &[
        ForeignKey::required(Table::StockMovements, "product_id", Table::Products),
        ForeignKey::optional(Table::StockMovements, "supplier_id", Table::Suppliers),
    ],
    payload: &[
        ColumnDef::required("movement_type", Text),
        ColumnDef::required("quantity", Integer),
        ColumnDef::new("reference", Text),
        ColumnDef::new("notes", Text),
        CREATED_AT,
    ],
};

static BULK_PRICING: TableDef = TableDef {
    table: Table::BulkPricing,
    foreign_keys: &[ForeignKey::required(
        Table::BulkPricing,
        "product_id",
        Table::Products,
    )],
    payload: &[
        ColumnDef::required("min_quantity", Integer),
        ColumnDef::required("price", Real),
        CREATED_AT,
    ],
};
