//! Whole-file backup and restore of the database.

use crate::config::MigrationConfig;
use crate::error::MigrationError;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use stockbook_store::FileOps;
use tracing::{info, warn};

/// Attempts at finding a free backup file name within one second.
const MAX_NAME_ATTEMPTS: usize = 100;

/// Copies the database file aside and back.
pub struct BackupManager<'a, F: FileOps> {
    files: &'a F,
    db_path: &'a Path,
    backup_dir: PathBuf,
}

impl<'a, F: FileOps> BackupManager<'a, F> {
    /// Create a manager for the database named in `config`.
    pub fn new(files: &'a F, config: &'a MigrationConfig) -> Self {
        Self {
            files,
            db_path: &config.db_path,
            backup_dir: config.effective_backup_dir(),
        }
    }

    /// Copy the database to a timestamped path and return that path.
    pub fn create_backup(&self) -> Result<PathBuf, MigrationError> {
        let fail = |source: io::Error| MigrationError::BackupFailure {
            path: self.db_path.to_path_buf(),
            source,
        };

        if !self.files.file_exists(self.db_path) {
            return Err(fail(io::Error::new(
                io::ErrorKind::NotFound,
                "database file does not exist",
            )));
        }
        self.files.create_dir_all(&self.backup_dir).map_err(fail)?;

        let backup_path = self.next_backup_path(Utc::now()).map_err(fail)?;
        let bytes = self.files.copy_file(self.db_path, &backup_path).map_err(fail)?;
        if !self.files.file_exists(&backup_path) {
            return Err(fail(io::Error::other(format!(
                "backup {} missing after copy",
                backup_path.display()
            ))));
        }

        info!(
            backup = %backup_path.display(),
            bytes,
            "Database backup created"
        );
        Ok(backup_path)
    }

    /// Copy `backup_path` back over the live database.
    pub fn restore_backup(&self, backup_path: &Path) -> Result<(), MigrationError> {
        let fail = |source: io::Error| MigrationError::RollbackFailure {
            backup_path: backup_path.to_path_buf(),
            source,
            cause: None,
        };

        if !self.files.file_exists(backup_path) {
            return Err(fail(io::Error::new(
                io::ErrorKind::NotFound,
                "backup file does not exist",
            )));
        }
        self.files
            .copy_file(backup_path, self.db_path)
            .map_err(fail)?;

        warn!(
            backup = %backup_path.display(),
            database = %self.db_path.display(),
            "Database restored from backup"
        );
        Ok(())
    }

    fn next_backup_path(&self, now: DateTime<Utc>) -> io::Result<PathBuf> {
        let stem = self
            .db_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "database".to_string());
        let ext = self
            .db_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stamp = now.format("%Y%m%d-%H%M%S");

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{stem}.backup-{stamp}{ext}")
            } else {
                format!("{stem}.backup-{stamp}-{attempt:02}{ext}")
            };
            let candidate = self.backup_dir.join(name);
            if !self.files.file_exists(&candidate) {
                return Ok(candidate);
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "unable to allocate a backup file name",
        ))
    }
}
