//! Migration orchestrator.
//!
//! [`MigrationEngine`] sequences the integrity pass, backup, shadow schema,
//! row migration with the table swap, and validation. A failure before the
//! swap commits restores the backup taken for the run and surfaces the
//! original error. A failed validation leaves the committed tables in place
//! for inspection.

use crate::backup::BackupManager;
use crate::catalog::Table;
use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::identifier::{IdGenerator, UuidV4Generator};
use crate::integrity::{IntegrityFixer, IntegrityReport};
use crate::migrator::RowMigrator;
use crate::schema::{LegacyIndex, SchemaBuilder};
use crate::state::{MigrationPhase, MigrationReport, MigrationStatus};
use crate::validator::{count_rows, ValidationReport, Validator};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use stockbook_store::{FileOps, LocalFs, SqlExecutor, SqliteStore, Transaction};
use tracing::{debug, error, info, warn};

/// Warning attached when `execute_migration` finds nothing to do.
pub const ALREADY_COMPLETED_WARNING: &str = "Migration was already completed previously";

/// Progress reached once every table has been swapped.
const SWAPPED_PROGRESS: u8 = 90;

/// Drives a migration run and tracks its status.
///
/// Status belongs to the engine instance: a new engine starts at
/// "Not started" regardless of the store's state. Runs must not overlap.
pub struct MigrationEngine<S, F = LocalFs, G = UuidV4Generator>
where
    S: SqlExecutor,
    F: FileOps,
    G: IdGenerator,
{
    store: S,
    files: F,
    ids: G,
    config: MigrationConfig,
    status: RwLock<MigrationStatus>,
    baseline: RwLock<Option<BTreeMap<Table, u64>>>,
    last_report: RwLock<Option<MigrationReport>>,
}

impl MigrationEngine<SqliteStore> {
    /// Open the database named in `config` with the default file system and
    /// identifier generator.
    pub fn open(config: MigrationConfig) -> Result<Self, MigrationError> {
        let store = SqliteStore::open(&config.db_path)?;
        Ok(Self::new(store, config))
    }
}

impl<S: SqlExecutor> MigrationEngine<S> {
    /// Create an engine over `store` using the local file system.
    pub fn new(store: S, config: MigrationConfig) -> Self {
        Self::with_parts(store, LocalFs, UuidV4Generator, config)
    }
}

impl<S, F, G> MigrationEngine<S, F, G>
where
    S: SqlExecutor,
    F: FileOps,
    G: IdGenerator,
{
    /// Create an engine from explicit collaborators.
    pub fn with_parts(store: S, files: F, ids: G, config: MigrationConfig) -> Self {
        Self {
            store,
            files,
            ids,
            config,
            status: RwLock::new(MigrationStatus::new()),
            baseline: RwLock::new(None),
            last_report: RwLock::new(None),
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot of the current status.
    pub fn get_migration_status(&self) -> MigrationStatus {
        self.status.read().clone()
    }

    /// Report of the last `execute_migration` call, if any.
    pub fn last_report(&self) -> Option<MigrationReport> {
        self.last_report.read().clone()
    }

    /// Check whether the reference table is already keyed by text identifiers.
    pub fn is_migration_complete(&self) -> Result<bool, MigrationError> {
        let id_type = SchemaBuilder::new(&self.store).id_column_type(self.config.reference_table)?;
        Ok(id_type.as_deref() == Some("TEXT"))
    }

    /// Copy the database aside and return the backup path.
    pub fn create_backup(&self) -> Result<PathBuf, MigrationError> {
        BackupManager::new(&self.files, &self.config).create_backup()
    }

    /// Copy a backup back over the live database.
    pub fn restore_backup(&self, backup_path: &Path) -> Result<(), MigrationError> {
        BackupManager::new(&self.files, &self.config)
            .restore_backup(backup_path)
            .inspect_err(|e| error!(error = %e, "Restore failed; database may be inconsistent"))
    }

    /// Run the post-migration checks.
    ///
    /// Fails with [`MigrationError::MigrationValidationFailed`] if any check
    /// fails. Nothing is rolled back; the caller decides what to do.
    pub fn validate_migration(&self) -> Result<ValidationReport, MigrationError> {
        let report = self.run_validation();
        if report.success {
            Ok(report)
        } else {
            Err(MigrationError::MigrationValidationFailed {
                report: Box::new(report),
            })
        }
    }

    /// Migrate every table from integer keys to UUIDs.
    ///
    /// Re-running on a migrated store succeeds without writing anything. A
    /// legacy layout the catalog does not describe is refused before any
    /// write. On failure the backup taken for this run is restored and the
    /// original error returned; if the restore itself fails the error is
    /// [`MigrationError::RollbackFailure`] carrying the original. A
    /// [`MigrationError::MigrationValidationFailed`] is not rolled back.
    pub fn execute_migration(&self) -> Result<MigrationReport, MigrationError> {
        if self.is_migration_complete()? {
            info!("Migration already completed; nothing to do");
            self.enter(MigrationPhase::Complete);
            let report = MigrationReport {
                success: true,
                warnings: vec![ALREADY_COMPLETED_WARNING.to_string()],
                ..Default::default()
            };
            *self.last_report.write() = Some(report.clone());
            return Ok(report);
        }

        info!(database = %self.config.db_path.display(), "Starting identifier migration");

        // Parents are dropped during the swap while children still point at them.
        let enforced = self.store.query_i64("PRAGMA foreign_keys", &[])? != 0;
        if enforced {
            self.store.execute("PRAGMA foreign_keys = OFF", &[])?;
        }

        let mut report = MigrationReport::default();
        let mut backup = None;
        let outcome = self.run(&mut report, &mut backup);

        if enforced {
            if let Err(e) = self.store.execute("PRAGMA foreign_keys = ON", &[]) {
                warn!(error = %e, "Failed to re-enable foreign key enforcement");
                report
                    .warnings
                    .push(format!("Foreign key enforcement could not be re-enabled: {e}"));
            }
        }

        let result = match outcome {
            Ok(()) => {
                report.success = true;
                self.enter(MigrationPhase::Complete);
                info!(
                    tables = report.tables_processed.len(),
                    warnings = report.warnings.len(),
                    "Identifier migration completed"
                );
                Ok(report.clone())
            }
            Err(err) => Err(self.fail(err, backup.as_deref(), &mut report)),
        };

        *self.last_report.write() = Some(report);
        result
    }

    fn run(
        &self,
        report: &mut MigrationReport,
        backup: &mut Option<PathBuf>,
    ) -> Result<(), MigrationError> {
        self.enter(MigrationPhase::Diagnosing);
        let preserved = SchemaBuilder::new(&self.store).check_legacy_layout()?;
        let integrity = IntegrityFixer::new(&self.store, &self.config.default_category_name)
            .diagnose_and_fix()?;
        if !integrity.is_clean() {
            report.warnings.push(describe_repairs(&integrity));
        }
        report.integrity = Some(integrity);
        *self.baseline.write() = Some(count_rows(&self.store)?);

        self.enter(MigrationPhase::BackingUp);
        let path = self.create_backup()?;
        *backup = Some(path.clone());
        report.backup_path = Some(path);

        self.enter(MigrationPhase::BuildingSchema);
        SchemaBuilder::new(&self.store).create_shadow_tables()?;

        self.enter(MigrationPhase::MigratingRows);
        report.tables_processed = self.migrate_rows(&preserved)?;

        if self.config.validate_after_migration {
            self.enter(MigrationPhase::Validating);
            let validation = self.run_validation();
            report.validation = Some(validation.clone());
            if !validation.success {
                return Err(MigrationError::MigrationValidationFailed {
                    report: Box::new(validation),
                });
            }
        }
        Ok(())
    }

    /// Copy rows and swap tables inside the second transaction.
    fn migrate_rows(&self, preserved: &[LegacyIndex]) -> Result<Vec<Table>, MigrationError> {
        let start = MigrationPhase::MigratingRows.progress().unwrap_or(0);
        let span = SWAPPED_PROGRESS.saturating_sub(start).saturating_sub(5);
        let total = Table::ALL.len();

        let txn = Transaction::begin(&self.store, "rows")?;
        let mut migrator = RowMigrator::new(&self.store, &self.ids);
        let tables = migrator.migrate_all_with(|table, rows| {
            let done = table.migration_rank() + 1;
            let mut status = self.status.write();
            status.describe(format!("Migrated {table} ({done}/{total})"));
            status.advance(start + (usize::from(span) * done / total) as u8);
            debug!(table = %table, rows, "Rows copied");
        })?;

        self.status.write().describe("Swapping tables");
        migrator.swap_tables(preserved)?;
        if self.config.persist_id_map {
            migrator.mapper().persist(&self.store)?;
        }
        txn.commit()?;

        self.status.write().advance(SWAPPED_PROGRESS);
        info!(rows = migrator.mapper().len(), "Rows migrated and tables swapped");
        Ok(tables)
    }

    fn run_validation(&self) -> ValidationReport {
        let baseline = self.baseline.read();
        Validator::new(&self.store, &self.ids, self.config.uuid_sample_size)
            .with_baseline((*baseline).as_ref())
            .validate()
    }

    fn enter(&self, phase: MigrationPhase) {
        self.status.write().enter(phase);
        debug!(phase = %phase, "Migration phase entered");
    }

    /// Record `err`, restore the backup if one was taken, and pick the error
    /// to surface. Validation failures keep the committed state.
    fn fail(
        &self,
        err: MigrationError,
        backup: Option<&Path>,
        report: &mut MigrationReport,
    ) -> MigrationError {
        self.enter(MigrationPhase::Failed);
        report.success = false;
        report.errors.push(err.to_string());
        warn!(error = %err, kind = ?err.kind(), "Migration failed");

        let Some(path) = backup else {
            report
                .warnings
                .push("Failed before a backup was taken; nothing to restore".to_string());
            return err;
        };

        if matches!(err, MigrationError::MigrationValidationFailed { .. }) {
            report.warnings.push(format!(
                "Migration committed but failed validation; backup kept at {}",
                path.display()
            ));
            return err;
        }

        match self.restore_backup(path) {
            Ok(()) => {
                report
                    .warnings
                    .push(format!("Database restored from backup {}", path.display()));
                err
            }
            Err(MigrationError::RollbackFailure {
                backup_path,
                source,
                ..
            }) => {
                report.errors.push(format!(
                    "Rollback from {} failed: {source}",
                    backup_path.display()
                ));
                MigrationError::RollbackFailure {
                    backup_path,
                    source,
                    cause: Some(Box::new(err)),
                }
            }
            Err(other) => {
                report.errors.push(format!("Rollback failed: {other}"));
                err
            }
        }
    }
}

fn describe_repairs(integrity: &IntegrityReport) -> String {
    format!(
        "Repaired {} rows with broken references before migrating ({} deleted)",
        integrity.fixes_applied,
        integrity.rows_deleted()
    )
}
