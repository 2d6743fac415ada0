//! Stockbook Migrate - integer-to-UUID identifier migration.
//!
//! Converts the primary and foreign keys of the ten Stockbook tables from
//! auto-increment integers to random UUID strings, in place and all or
//! nothing:
//! - [`IntegrityFixer`]: repairs broken references before anything changes
//! - [`BackupManager`]: copies the database file aside and back
//! - [`SchemaBuilder`]: creates UUID-keyed shadow tables in one transaction
//! - [`RowMigrator`]: copies rows in dependency order and swaps tables
//! - [`Validator`]: checks formats, references, counts and uniqueness
//! - [`MigrationEngine`]: sequences the above and rolls back on failure
//!
//! ```no_run
//! use stockbook_migrate::{MigrationConfig, MigrationEngine};
//!
//! let engine = MigrationEngine::open(MigrationConfig::new("stockbook.db"))?;
//! let report = engine.execute_migration()?;
//! println!("{}", report.to_json()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod identifier;
pub mod integrity;
pub mod mapping;
pub mod migrator;
pub mod schema;
pub mod state;
pub mod validator;

pub use backup::BackupManager;
pub use catalog::{ForeignKey, Table};
pub use config::MigrationConfig;
pub use engine::{MigrationEngine, ALREADY_COMPLETED_WARNING};
pub use error::{ErrorKind, MigrationError};
pub use identifier::{is_valid_identifier, IdGenerator, Identifier, UuidV4Generator};
pub use integrity::{IntegrityFixer, IntegrityReport};
pub use mapping::IdMapper;
pub use migrator::RowMigrator;
pub use schema::{LegacyIndex, SchemaBuilder};
pub use state::{MigrationPhase, MigrationReport, MigrationStatus};
pub use validator::{CheckResult, ValidationReport, Validator};
