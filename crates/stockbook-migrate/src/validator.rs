//! Post-migration checks.
//!
//! Four independent checks run against the swapped tables: identifier
//! format, foreign-key closure, row counts against a baseline, and key
//! uniqueness plus index presence. A failing query fails its check rather
//! than aborting validation.

use crate::catalog::{quote_ident, relations, Table};
use crate::identifier::IdGenerator;
use crate::mapping::persisted_counts;
use serde::Serialize;
use std::collections::BTreeMap;
use stockbook_store::{SqlExecutor, SqlValue, StoreError};
use tracing::{debug, info, warn};

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    /// Whether the check passed.
    pub passed: bool,
    /// What was checked or what went wrong.
    pub details: String,
}

impl CheckResult {
    fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }

    fn from_problems(problems: Vec<String>, ok: impl Into<String>) -> Self {
        if problems.is_empty() {
            Self::pass(ok)
        } else {
            Self::fail(problems.join("; "))
        }
    }
}

/// The four checks by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResults {
    /// Identifiers are canonical UUIDs.
    pub uuid_formats: CheckResult,
    /// Every foreign key resolves.
    pub foreign_keys: CheckResult,
    /// Row counts match the baseline.
    pub record_counts: CheckResult,
    /// Keys are unique and foreign keys are indexed.
    pub data_integrity: CheckResult,
}

impl ValidationResults {
    fn checks(&self) -> [&CheckResult; 4] {
        [
            &self.uuid_formats,
            &self.foreign_keys,
            &self.record_counts,
            &self.data_integrity,
        ]
    }
}

/// Outcome of validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Whether every check passed.
    pub success: bool,
    /// Checks passed.
    pub passed_validations: usize,
    /// Checks run.
    pub total_validations: usize,
    /// Per-check results.
    pub validation_results: ValidationResults,
}

impl ValidationReport {
    fn new(validation_results: ValidationResults) -> Self {
        let checks = validation_results.checks();
        let passed_validations = checks.iter().filter(|c| c.passed).count();
        let total_validations = checks.len();
        Self {
            success: passed_validations == total_validations,
            passed_validations,
            total_validations,
            validation_results,
        }
    }
}

/// Row count of every table.
pub fn count_rows<S: SqlExecutor>(store: &S) -> Result<BTreeMap<Table, u64>, StoreError> {
    Table::ALL
        .into_iter()
        .map(|table| {
            let n = store.query_i64(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(table.name())),
                &[],
            )?;
            Ok((table, n.max(0) as u64))
        })
        .collect()
}

/// Runs the post-migration checks.
pub struct Validator<'a, S: SqlExecutor, G: IdGenerator> {
    store: &'a S,
    ids: &'a G,
    sample_size: usize,
    baseline: Option<&'a BTreeMap<Table, u64>>,
}

impl<'a, S: SqlExecutor, G: IdGenerator> Validator<'a, S, G> {
    /// Create a validator sampling up to `sample_size` rows per table.
    pub fn new(store: &'a S, ids: &'a G, sample_size: usize) -> Self {
        Self {
            store,
            ids,
            sample_size,
            baseline: None,
        }
    }

    /// Compare row counts against `baseline` instead of the persisted mapping.
    pub fn with_baseline(mut self, baseline: Option<&'a BTreeMap<Table, u64>>) -> Self {
        self.baseline = baseline;
        self
    }

    /// Run all four checks.
    pub fn validate(&self) -> ValidationReport {
        let report = ValidationReport::new(ValidationResults {
            uuid_formats: self.check_uuid_formats(),
            foreign_keys: self.check_foreign_keys(),
            record_counts: self.check_record_counts(),
            data_integrity: self.check_data_integrity(),
        });

        if report.success {
            info!(checks = report.total_validations, "Migration validated");
        } else {
            warn!(
                passed = report.passed_validations,
                total = report.total_validations,
                "Migration validation failed"
            );
        }
        report
    }

    /// Sampled `id` and non-null foreign keys must be valid identifiers.
    pub fn check_uuid_formats(&self) -> CheckResult {
        let mut problems = Vec::new();
        let mut checked = 0usize;

        for table in Table::ALL {
            let columns: Vec<&str> = std::iter::once("id")
                .chain(table.foreign_keys().iter().map(|fk| fk.column))
                .collect();
            let sql = format!(
                "SELECT {} FROM {} LIMIT ?1",
                columns
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", "),
                quote_ident(table.name())
            );
            let rows = match self.store.query_all(&sql, &[(self.sample_size as i64).into()]) {
                Ok(rows) => rows,
                Err(e) => {
                    problems.push(format!("{table}: {e}"));
                    continue;
                }
            };

            let mut invalid = 0usize;
            for row in rows {
                for (i, value) in row.into_values().iter().enumerate() {
                    // Only the primary key may not be NULL.
                    let valid = match value {
                        SqlValue::Text(s) => self.ids.is_valid_identifier(s),
                        SqlValue::Null => i > 0,
                        _ => false,
                    };
                    if !valid {
                        invalid += 1;
                    }
                    if !value.is_null() {
                        checked += 1;
                    }
                }
            }
            if invalid > 0 {
                problems.push(format!("{table}: {invalid} invalid identifiers"));
            }
        }

        debug!(checked, "Identifier formats sampled");
        CheckResult::from_problems(
            problems,
            format!("{checked} sampled identifiers are valid UUIDs"),
        )
    }

    /// Every non-null foreign key must match a parent row.
    pub fn check_foreign_keys(&self) -> CheckResult {
        let mut problems = Vec::new();
        for fk in relations() {
            match self.store.query_i64(&fk.orphan_count_sql(), &[]) {
                Ok(0) => {}
                Ok(n) => problems.push(format!("{fk}: {n} orphaned rows")),
                Err(e) => problems.push(format!("{fk}: {e}")),
            }
        }
        CheckResult::from_problems(problems, "All foreign keys resolve")
    }

    /// Row counts must equal the baseline, when one is known.
    pub fn check_record_counts(&self) -> CheckResult {
        let persisted;
        let baseline = match self.baseline {
            Some(baseline) => baseline,
            None => match persisted_counts(self.store) {
                Ok(Some(counts)) => {
                    persisted = counts;
                    &persisted
                }
                Ok(None) => return CheckResult::pass("No baseline available; counts not compared"),
                Err(e) => return CheckResult::fail(format!("reading persisted mapping: {e}")),
            },
        };

        let current = match count_rows(self.store) {
            Ok(current) => current,
            Err(e) => return CheckResult::fail(format!("counting rows: {e}")),
        };

        let problems = Table::ALL
            .into_iter()
            .filter_map(|table| {
                let expected = baseline.get(&table).copied().unwrap_or(0);
                let actual = current.get(&table).copied().unwrap_or(0);
                (expected != actual)
                    .then(|| format!("{table}: expected {expected} rows, found {actual}"))
            })
            .collect();
        let total: u64 = current.values().sum();
        CheckResult::from_problems(problems, format!("{total} rows match the baseline"))
    }

    /// No table may hold a duplicate `id`, and every foreign key must be indexed.
    pub fn check_data_integrity(&self) -> CheckResult {
        let mut problems = Vec::new();

        for table in Table::ALL {
            let sql = format!(
                "SELECT COUNT(*) FROM (SELECT \"id\" FROM {} GROUP BY \"id\" HAVING COUNT(*) > 1)",
                quote_ident(table.name())
            );
            match self.store.query_i64(&sql, &[]) {
                Ok(0) => {}
                Ok(n) => problems.push(format!("{table}: {n} duplicated ids")),
                Err(e) => problems.push(format!("{table}: {e}")),
            }
        }

        for fk in relations() {
            let name = fk.index_name();
            match self.store.query_i64(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
                &[name.as_str().into()],
            ) {
                Ok(0) => problems.push(format!("missing index {name}")),
                Ok(_) => {}
                Err(e) => problems.push(format!("{name}: {e}")),
            }
        }

        CheckResult::from_problems(problems, "Identifiers are unique and foreign keys indexed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::UuidV4Generator;
    use crate::migrator::RowMigrator;
    use crate::schema::SchemaBuilder;
    use stockbook_store::SqliteStore;
    use tempfile::tempdir;

    fn migrated_store() -> (SqliteStore, BTreeMap<Table, u64>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("shop.db")).unwrap();
        store.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        let builder = SchemaBuilder::new(&store);
        builder.create_legacy_tables().unwrap();
        store
            .execute_batch(
                r#"
                INSERT INTO customers (id, name) VALUES (1, 'Ada'), (2, 'Grace');
                INSERT INTO sales (id, customer_id, total_amount) VALUES (1, 1, 3.0), (2, NULL, 4.0);
                "#,
            )
            .unwrap();
        let baseline = count_rows(&store).unwrap();
        builder.create_shadow_tables().unwrap();
        let generator = UuidV4Generator;
        let mut migrator = RowMigrator::new(&store, &generator);
        migrator.migrate_all().unwrap();
        migrator.swap_tables(&[]).unwrap();
        (store, baseline, dir)
    }

    #[test]
    fn test_migrated_store_passes() {
        let (store, baseline, _dir) = migrated_store();
        let report = Validator::new(&store, &UuidV4Generator, 100)
            .with_baseline(Some(&baseline))
            .validate();
        assert!(report.success, "{report:?}");
        assert_eq!(report.passed_validations, 4);
        assert_eq!(report.total_validations, 4);
    }

    #[test]
    fn test_legacy_store_fails_format_check() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("shop.db")).unwrap();
        SchemaBuilder::new(&store).create_legacy_tables().unwrap();
        store
            .execute("INSERT INTO categories (name) VALUES ('Grains')", &[])
            .unwrap();

        let validator = Validator::new(&store, &UuidV4Generator, 100);
        assert!(!validator.check_uuid_formats().passed);
        assert!(!validator.check_data_integrity().passed);
        let counts = validator.check_record_counts();
        assert!(counts.passed);
        assert!(counts.details.contains("No baseline"));
    }

    #[test]
    fn test_count_mismatch_is_reported() {
        let (store, mut baseline, _dir) = migrated_store();
        baseline.insert(Table::Customers, 3);
        let check = Validator::new(&store, &UuidV4Generator, 100)
            .with_baseline(Some(&baseline))
            .check_record_counts();
        assert!(!check.passed);
        assert!(check.details.contains("customers: expected 3 rows, found 2"));
    }

    #[test]
    fn test_orphan_after_migration_is_reported() {
        let (store, baseline, _dir) = migrated_store();
        store
            .execute(
                "UPDATE sales SET customer_id = ?1 WHERE customer_id IS NOT NULL",
                &[UuidV4Generator.new_identifier().as_str().into()],
            )
            .unwrap();
        let report = Validator::new(&store, &UuidV4Generator, 100)
            .with_baseline(Some(&baseline))
            .validate();
        assert!(!report.success);
        assert!(!report.validation_results.foreign_keys.passed);
        assert!(report.validation_results.uuid_formats.passed);
        assert_eq!(report.passed_validations, 3);
    }
}
