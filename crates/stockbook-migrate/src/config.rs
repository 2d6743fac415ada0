//! Migration engine configuration.

use crate::catalog::Table;
use std::path::{Path, PathBuf};

/// Default number of rows sampled per table by the UUID format check.
pub const DEFAULT_UUID_SAMPLE_SIZE: usize = 100;

/// Default name of the category that absorbs orphaned products.
pub const DEFAULT_CATEGORY_NAME: &str = "Uncategorized";

/// Default table whose `id` column type decides whether migration is complete.
pub const DEFAULT_REFERENCE_TABLE: Table = Table::Categories;

/// Migration engine configuration.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Path to the live database file.
    pub db_path: PathBuf,

    /// Directory receiving backups. `None` places them next to the database.
    pub backup_dir: Option<PathBuf>,

    /// Table inspected by the completion check.
    pub reference_table: Table,

    /// Rows sampled per table by the UUID format check.
    pub uuid_sample_size: usize,

    /// Name of the category created for products without a valid category.
    pub default_category_name: String,

    /// Whether `execute_migration` runs the validator after the swap.
    pub validate_after_migration: bool,

    /// Whether the legacy-id mapping is written to `id_migration_map`.
    pub persist_id_map: bool,
}

impl MigrationConfig {
    /// Create a configuration for the database at `db_path`.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            backup_dir: None,
            reference_table: DEFAULT_REFERENCE_TABLE,
            uuid_sample_size: DEFAULT_UUID_SAMPLE_SIZE,
            default_category_name: DEFAULT_CATEGORY_NAME.to_string(),
            validate_after_migration: true,
            persist_id_map: true,
        }
    }

    /// Set the backup directory.
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Set the reference table for the completion check.
    pub fn with_reference_table(mut self, table: Table) -> Self {
        self.reference_table = table;
        self
    }

    /// Set the UUID sample size (at least one row).
    pub fn with_uuid_sample_size(mut self, size: usize) -> Self {
        self.uuid_sample_size = size.max(1);
        self
    }

    /// Set the default category name.
    pub fn with_default_category_name(mut self, name: impl Into<String>) -> Self {
        self.default_category_name = name.into();
        self
    }

    /// Skip the validator inside `execute_migration`.
    pub fn without_validation(mut self) -> Self {
        self.validate_after_migration = false;
        self
    }

    /// Do not persist the legacy-id mapping.
    pub fn without_id_map(mut self) -> Self {
        self.persist_id_map = false;
        self
    }

    /// Directory that receives backups.
    pub fn effective_backup_dir(&self) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => self
                .db_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::new("./stockbook.db")
    }
}
