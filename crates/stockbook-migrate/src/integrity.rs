//! Pre-migration referential-integrity repair.
//!
//! Runs against the original integer-keyed tables. Child rows whose foreign
//! key points nowhere, or whose required foreign key is NULL, are deleted;
//! products without a valid category are instead moved to a default category.
//! Relations are processed in child dependency order so rows orphaned by an
//! earlier deletion are caught by a later relation.

use crate::catalog::{quote_ident, relations, ForeignKey, Table};
use crate::error::MigrationError;
use serde::Serialize;
use stockbook_store::{SqlExecutor, StoreError, Transaction};
use tracing::{info, warn};

/// What was wrong with the rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Non-null foreign key with no matching parent.
    OrphanedReference,
    /// NULL in a required foreign-key column.
    MissingReference,
}

/// What was done about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    /// Rows were deleted.
    Deleted,
    /// Rows were re-pointed at the default category.
    Reassigned,
    /// Diagnosis only; nothing was changed.
    None,
}

/// One class of broken rows found on one relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityIssue {
    /// Child table.
    pub table: Table,
    /// Foreign-key column.
    pub column: &'static str,
    /// Parent table.
    pub references: Table,
    /// Issue class.
    pub kind: IssueKind,
    /// Rows affected.
    pub rows: u64,
    /// Repair applied.
    pub action: RepairAction,
}

/// Summary of a diagnosis or repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// Broken rows found.
    pub issues_found: u64,
    /// Rows repaired.
    pub fixes_applied: u64,
    /// Legacy id of the default category, if one was used.
    pub default_category_id: Option<i64>,
    /// Per-relation breakdown.
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    /// Check if no issues were found.
    pub fn is_clean(&self) -> bool {
        self.issues_found == 0
    }

    /// Rows deleted by the repair.
    pub fn rows_deleted(&self) -> u64 {
        self.issues
            .iter()
            .filter(|i| i.action == RepairAction::Deleted)
            .map(|i| i.rows)
            .sum()
    }
}

/// Finds and repairs orphaned rows before migration.
pub struct IntegrityFixer<'a, S: SqlExecutor> {
    store: &'a S,
    default_category_name: &'a str,
}

impl<'a, S: SqlExecutor> IntegrityFixer<'a, S> {
    /// Create a fixer that files stray products under `default_category_name`.
    pub fn new(store: &'a S, default_category_name: &'a str) -> Self {
        Self {
            store,
            default_category_name,
        }
    }

    /// Count broken rows on each relation without changing anything.
    ///
    /// Counts reflect the current data only; a repair may uncover further
    /// orphans in dependent tables.
    pub fn diagnose(&self) -> Result<IntegrityReport, MigrationError> {
        let mut report = IntegrityReport::default();
        for fk in relations() {
            if fk.required {
                let rows = self
                    .count_missing(fk)
                    .map_err(|e| unrecoverable(fk, "count missing references", e))?;
                report.record(fk, IssueKind::MissingReference, rows, RepairAction::None);
            }
            let rows = self
                .count_orphans(fk)
                .map_err(|e| unrecoverable(fk, "count orphaned references", e))?;
            report.record(fk, IssueKind::OrphanedReference, rows, RepairAction::None);
        }
        Ok(report)
    }

    /// Repair every broken relation in a single transaction.
    ///
    /// Either all repairs are applied or, on error, none are.
    pub fn diagnose_and_fix(&self) -> Result<IntegrityReport, MigrationError> {
        let txn = Transaction::begin(self.store, "integrity").map_err(|e| {
            MigrationError::DataIntegrityUnrecoverable {
                step: "begin repair transaction".to_string(),
                source: e,
            }
        })?;

        let mut report = IntegrityReport::default();
        for fk in relations() {
            if fk.required {
                self.repair(fk, IssueKind::MissingReference, &mut report)?;
            }
            self.repair(fk, IssueKind::OrphanedReference, &mut report)?;
        }

        txn.commit()
            .map_err(|e| MigrationError::DataIntegrityUnrecoverable {
                step: "commit repairs".to_string(),
                source: e,
            })?;

        if report.is_clean() {
            info!("Integrity check found no issues");
        } else {
            info!(
                issues_found = report.issues_found,
                fixes_applied = report.fixes_applied,
                "Integrity repairs applied"
            );
        }
        Ok(report)
    }

    fn repair(
        &self,
        fk: &ForeignKey,
        kind: IssueKind,
        report: &mut IntegrityReport,
    ) -> Result<(), MigrationError> {
        let rows = match kind {
            IssueKind::MissingReference => self.count_missing(fk),
            IssueKind::OrphanedReference => self.count_orphans(fk),
        }
        .map_err(|e| unrecoverable(fk, "count broken references", e))?;
        if rows == 0 {
            return Ok(());
        }

        let filter = broken_filter(fk, kind);
        let action = if reassigns_to_default(fk) {
            let category_id = match report.default_category_id {
                Some(id) => id,
                None => {
                    let id = self.ensure_default_category()?;
                    report.default_category_id = Some(id);
                    id
                }
            };
            self.store
                .execute(
                    &format!(
                        "UPDATE {} SET {} = ?1 WHERE {filter}",
                        quote_ident(fk.table.name()),
                        quote_ident(fk.column)
                    ),
                    &[category_id.into()],
                )
                .map_err(|e| unrecoverable(fk, "reassign to default category", e))?;
            RepairAction::Reassigned
        } else {
            self.store
                .execute(
                    &format!("DELETE FROM {} WHERE {filter}", quote_ident(fk.table.name())),
                    &[],
                )
                .map_err(|e| unrecoverable(fk, "delete broken rows", e))?;
            RepairAction::Deleted
        };

        warn!(
            relation = %fk,
            kind = ?kind,
            action = ?action,
            rows,
            "Repaired broken references"
        );
        report.record(fk, kind, rows, action);
        Ok(())
    }

    fn count_missing(&self, fk: &ForeignKey) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            quote_ident(fk.table.name()),
            broken_filter(fk, IssueKind::MissingReference)
        );
        Ok(self.store.query_i64(&sql, &[])?.max(0) as u64)
    }

    fn count_orphans(&self, fk: &ForeignKey) -> Result<u64, StoreError> {
        Ok(self.store.query_i64(&fk.orphan_count_sql(), &[])?.max(0) as u64)
    }

    fn ensure_default_category(&self) -> Result<i64, MigrationError> {
        let fail = |source| MigrationError::DataIntegrityUnrecoverable {
            step: format!("create default category {:?}", self.default_category_name),
            source,
        };

        let existing = self
            .store
            .query_one(
                "SELECT id FROM \"categories\" WHERE name = ?1 ORDER BY id LIMIT 1",
                &[self.default_category_name.into()],
            )
            .map_err(fail)?;
        if let Some(row) = existing {
            return row.get_i64(0).map_err(fail);
        }

        let outcome = self
            .store
            .execute(
                "INSERT INTO \"categories\" (name, description) VALUES (?1, ?2)",
                &[
                    self.default_category_name.into(),
                    "Created for products whose category was missing".into(),
                ],
            )
            .map_err(fail)?;
        info!(
            category_id = outcome.last_insert_id,
            name = self.default_category_name,
            "Default category created"
        );
        Ok(outcome.last_insert_id)
    }
}

impl IntegrityReport {
    fn record(&mut self, fk: &ForeignKey, kind: IssueKind, rows: u64, action: RepairAction) {
        if rows == 0 {
            return;
        }
        self.issues_found += rows;
        if action != RepairAction::None {
            self.fixes_applied += rows;
        }
        self.issues.push(IntegrityIssue {
            table: fk.table,
            column: fk.column,
            references: fk.references,
            kind,
            rows,
            action,
        });
    }
}

/// A product losing its category is recoverable; every other broken row is dropped.
fn reassigns_to_default(fk: &ForeignKey) -> bool {
    fk.table == Table::Products && fk.references == Table::Categories
}

fn broken_filter(fk: &ForeignKey, kind: IssueKind) -> String {
    let col = quote_ident(fk.column);
    match kind {
        IssueKind::MissingReference => format!("{col} IS NULL"),
        IssueKind::OrphanedReference => format!(
            "{col} IS NOT NULL AND {col} NOT IN (SELECT id FROM {})",
            quote_ident(fk.references.name())
        ),
    }
}

fn unrecoverable(fk: &ForeignKey, step: &str, source: StoreError) -> MigrationError {
    MigrationError::DataIntegrityUnrecoverable {
        step: format!("{step} on {fk}"),
        source,
    }
}
