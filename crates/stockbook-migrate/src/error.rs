//! Migration-specific error types.

use crate::catalog::Table;
use crate::validator::ValidationReport;
use serde::Serialize;
use std::path::PathBuf;
use stockbook_store::StoreError;
use thiserror::Error;

/// Coarse classification of a [`MigrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The legacy schema holds objects the swap would lose.
    UnsupportedSchema,
    /// Pre-migration repair failed.
    DataIntegrityUnrecoverable,
    /// The store could not be snapshotted.
    BackupFailure,
    /// Shadow-table creation failed.
    SchemaCreationFailure,
    /// A foreign key pointed at a missing parent.
    ReferentialIntegrityViolation,
    /// A parent table was migrated after its child.
    MappingOrderViolation,
    /// No usable identifier could be generated.
    IdentifierGeneration,
    /// Rows were copied with foreign-key enforcement on.
    ForeignKeysEnforced,
    /// Post-migration checks failed.
    MigrationValidationFailed,
    /// Restoring the backup failed.
    RollbackFailure,
    /// A statement failed during row migration or the swap.
    Store,
}

/// Migration errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A legacy table has columns, triggers or dependent views outside the
    /// catalog; nothing was changed.
    #[error("unsupported legacy schema for {table}: {detail}")]
    UnsupportedSchema {
        /// The offending table.
        table: Table,
        /// What does not match the catalog.
        detail: String,
    },

    /// A repair step of the integrity pass failed; nothing was changed.
    #[error("data integrity repair failed during {step}: {source}")]
    DataIntegrityUnrecoverable {
        /// The repair being attempted.
        step: String,
        /// Underlying store error.
        source: StoreError,
    },

    /// The store file could not be copied aside.
    #[error("backup of {} failed: {source}", .path.display())]
    BackupFailure {
        /// File being backed up.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A shadow table could not be created.
    #[error("shadow table creation failed for {table}: {source}")]
    SchemaCreationFailure {
        /// The table whose shadow failed.
        table: Table,
        /// Underlying store error.
        source: StoreError,
    },

    /// A foreign key resolved to no parent row in the original table.
    #[error(
        "referential integrity violation: {table}.{column} references {parent} id {}",
        describe_id(.old_id)
    )]
    ReferentialIntegrityViolation {
        /// Child table.
        table: Table,
        /// Foreign-key column.
        column: &'static str,
        /// Parent table.
        parent: Table,
        /// Legacy id held by the column (`None` for a NULL in a required column).
        old_id: Option<i64>,
    },

    /// A parent row exists but has not been assigned an identifier yet.
    #[error("mapping order violation: {table}.{column} references {parent} id {old_id} before {parent} was migrated")]
    MappingOrderViolation {
        /// Child table.
        table: Table,
        /// Foreign-key column.
        column: &'static str,
        /// Parent table.
        parent: Table,
        /// Legacy parent id.
        old_id: i64,
    },

    /// The identifier generator produced a malformed or repeating value.
    #[error("identifier generation failed for {table}: {reason}")]
    IdentifierGeneration {
        /// The table being migrated.
        table: Table,
        /// What went wrong.
        reason: String,
    },

    /// Rows cannot be copied while the store enforces foreign keys: shadow
    /// tables reference parents that are still integer-keyed.
    #[error("foreign key enforcement must be off while rows are migrated")]
    ForeignKeysEnforced,

    /// Post-migration validation failed.
    #[error(
        "migration validation failed: {}/{} checks passed",
        .report.passed_validations,
        .report.total_validations
    )]
    MigrationValidationFailed {
        /// Per-check breakdown.
        report: Box<ValidationReport>,
    },

    /// The backup could not be restored; the store may be inconsistent.
    #[error("rollback from {} failed: {source}", .backup_path.display())]
    RollbackFailure {
        /// Backup that was being restored.
        backup_path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
        /// The failure that triggered the rollback, if any.
        cause: Option<Box<MigrationError>>,
    },

    /// A statement failed during row migration or the swap.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl MigrationError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::UnsupportedSchema { .. } => ErrorKind::UnsupportedSchema,
            MigrationError::DataIntegrityUnrecoverable { .. } => ErrorKind::DataIntegrityUnrecoverable,
            MigrationError::BackupFailure { .. } => ErrorKind::BackupFailure,
            MigrationError::SchemaCreationFailure { .. } => ErrorKind::SchemaCreationFailure,
            MigrationError::ReferentialIntegrityViolation { .. } => {
                ErrorKind::ReferentialIntegrityViolation
            }
            MigrationError::MappingOrderViolation { .. } => ErrorKind::MappingOrderViolation,
            MigrationError::IdentifierGeneration { .. } => ErrorKind::IdentifierGeneration,
            MigrationError::ForeignKeysEnforced => ErrorKind::ForeignKeysEnforced,
            MigrationError::MigrationValidationFailed { .. } => ErrorKind::MigrationValidationFailed,
            MigrationError::RollbackFailure { .. } => ErrorKind::RollbackFailure,
            MigrationError::Store(_) => ErrorKind::Store,
        }
    }

    /// Errors that indicate a defect in the engine rather than in the data.
    pub fn is_bug_signal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ReferentialIntegrityViolation | ErrorKind::MappingOrderViolation
        )
    }

    /// The error that triggered a failed rollback, if this is one.
    pub fn rollback_cause(&self) -> Option<&MigrationError> {
        match self {
            MigrationError::RollbackFailure { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }
}

fn describe_id(old_id: &Option<i64>) -> String {
    match old_id {
        Some(id) => id.to_string(),
        None => "NULL".to_string(),
    }
}
