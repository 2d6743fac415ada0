//! Migration state machine, status and run report.

use crate::catalog::Table;
use crate::integrity::IntegrityReport;
use crate::validator::ValidationReport;
use serde::Serialize;
use std::path::PathBuf;

/// Phase of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    /// No run has started on this engine.
    NotStarted,
    /// Integrity diagnosis and repair.
    Diagnosing,
    /// Copying the database aside.
    BackingUp,
    /// Creating shadow tables.
    BuildingSchema,
    /// Copying rows and swapping tables.
    MigratingRows,
    /// Post-migration checks.
    Validating,
    /// Migration finished.
    Complete,
    /// Migration failed.
    Failed,
}

impl MigrationPhase {
    /// Human-readable step description.
    pub fn label(&self) -> &'static str {
        match self {
            MigrationPhase::NotStarted => "Not started",
            MigrationPhase::Diagnosing => "Checking data integrity",
            MigrationPhase::BackingUp => "Creating backup",
            MigrationPhase::BuildingSchema => "Creating UUID tables",
            MigrationPhase::MigratingRows => "Migrating rows",
            MigrationPhase::Validating => "Validating migration",
            MigrationPhase::Complete => "Migration complete",
            MigrationPhase::Failed => "Migration failed",
        }
    }

    /// Progress reached on entering this phase.
    ///
    /// `Failed` has no value of its own; the status keeps the last progress.
    pub fn progress(&self) -> Option<u8> {
        match self {
            MigrationPhase::NotStarted => Some(0),
            MigrationPhase::Diagnosing => Some(10),
            MigrationPhase::BackingUp => Some(20),
            MigrationPhase::BuildingSchema => Some(30),
            MigrationPhase::MigratingRows => Some(40),
            MigrationPhase::Validating => Some(95),
            MigrationPhase::Complete => Some(100),
            MigrationPhase::Failed => None,
        }
    }

    /// Check if no further transitions happen from this phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationPhase::Complete | MigrationPhase::Failed)
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationPhase::NotStarted => write!(f, "not_started"),
            MigrationPhase::Diagnosing => write!(f, "diagnosing"),
            MigrationPhase::BackingUp => write!(f, "backing_up"),
            MigrationPhase::BuildingSchema => write!(f, "building_schema"),
            MigrationPhase::MigratingRows => write!(f, "migrating_rows"),
            MigrationPhase::Validating => write!(f, "validating"),
            MigrationPhase::Complete => write!(f, "complete"),
            MigrationPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Progress of the engine's current or last run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    /// Description of the current step.
    pub current_step: String,
    /// Percent complete, never decreasing.
    pub progress: u8,
    /// Whether the store is fully migrated.
    pub is_complete: bool,
    /// State-machine phase.
    pub phase: MigrationPhase,
}

impl MigrationStatus {
    /// Status of a fresh engine.
    pub fn new() -> Self {
        Self {
            current_step: MigrationPhase::NotStarted.label().to_string(),
            progress: 0,
            is_complete: false,
            phase: MigrationPhase::NotStarted,
        }
    }

    /// Move to `phase`, keeping progress monotonic.
    pub fn enter(&mut self, phase: MigrationPhase) {
        self.phase = phase;
        self.current_step = phase.label().to_string();
        if let Some(progress) = phase.progress() {
            self.advance(progress);
        }
        self.is_complete = phase == MigrationPhase::Complete;
    }

    /// Replace the step description without changing phase.
    pub fn describe(&mut self, step: impl Into<String>) {
        self.current_step = step.into();
    }

    /// Raise progress to `progress`; lower values are ignored.
    pub fn advance(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }
}

impl Default for MigrationStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of `execute_migration`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Whether the store ended up migrated and validated.
    pub success: bool,
    /// Tables migrated, in order.
    pub tables_processed: Vec<Table>,
    /// Non-fatal notes.
    pub warnings: Vec<String>,
    /// Failures, including rollback notes.
    pub errors: Vec<String>,
    /// Backup taken for this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    /// Repairs made before migrating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegrityReport>,
    /// Post-migration checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
}

impl MigrationReport {
    /// Render the report as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
