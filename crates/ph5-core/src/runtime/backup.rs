// crates/ph5-core/src/runtime/backup.rs
// ============================================================================
// Module: Table Backups
// Description: Timestamped kef backups written before destructive steps.
// Purpose: Provide the only undo path for table deletes and truncates.
// Dependencies: crate::core, thiserror, tracing
// ============================================================================

//! ## Overview
//! Backups are named `<table>_<YYYY><DOY>_<NN>.kef`, where `NN` is the first
//! two-digit disambiguator from `00` whose file does not exist yet. Files
//! are created exclusively so a concurrent writer can never overwrite an
//! earlier backup. A backup is written even when the table is empty.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::identifiers::NodePath;
use crate::core::kef::KefError;
use crate::core::kef::KefTable;
use crate::core::kef::encode_table;
use crate::core::kef::parse;
use crate::core::table::TableData;
use crate::core::time::Ph5Time;
use crate::core::time::year_day_stamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Largest disambiguator probed for one table and day.
const MAX_DISAMBIGUATOR: u32 = 99;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Backup write and read errors.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Filesystem error.
    #[error("backup io error for {path}: {message}")]
    Io {
        /// File or directory concerned.
        path: String,
        /// Error detail.
        message: String,
    },
    /// Every disambiguator for the day is taken.
    #[error("no free backup name for {0}")]
    Exhausted(String),
    /// Backup content is not valid kef.
    #[error("backup {path} is not valid kef: {source}")]
    Kef {
        /// Backup file.
        path: String,
        /// Parse error.
        source: KefError,
    },
}

// ============================================================================
// SECTION: Backup Store
// ============================================================================

/// A written backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    /// Backup file path.
    pub file: PathBuf,
    /// Exact text written.
    pub text: String,
    /// Number of rows captured.
    pub rows: usize,
}

/// Directory receiving table backups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupStore {
    /// Backup directory.
    dir: PathBuf,
}

impl BackupStore {
    /// Creates a backup store rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
        }
    }

    /// Returns the backup directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a backup of `table` (stored at `path`) under `label`.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] when no file can be created or written.
    pub fn write(
        &self,
        label: &str,
        path: &NodePath,
        table: &TableData,
        at: Ph5Time,
    ) -> Result<Backup, BackupError> {
        fs::create_dir_all(&self.dir).map_err(|err| BackupError::Io {
            path: self.dir.display().to_string(),
            message: err.to_string(),
        })?;
        let text = encode_table(path, table, at);
        let stamp = year_day_stamp(at);
        for disambiguator in 0 ..= MAX_DISAMBIGUATOR {
            let file = self.dir.join(backup_file_name(label, &stamp, disambiguator));
            let mut handle = match OpenOptions::new().write(true).create_new(true).open(&file) {
                Ok(handle) => handle,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(BackupError::Io {
                        path: file.display().to_string(),
                        message: err.to_string(),
                    });
                }
            };
            handle.write_all(text.as_bytes()).and_then(|()| handle.sync_all()).map_err(|err| {
                BackupError::Io {
                    path: file.display().to_string(),
                    message: err.to_string(),
                }
            })?;
            tracing::info!(
                table = %path,
                backup = %file.display(),
                rows = table.rows.len(),
                "wrote table backup"
            );
            return Ok(Backup {
                file,
                text,
                rows: table.rows.len(),
            });
        }
        Err(BackupError::Exhausted(label.to_string()))
    }
}

/// Returns the backup file name for a label, day stamp and disambiguator.
#[must_use]
pub fn backup_file_name(label: &str, stamp: &str, disambiguator: u32) -> String {
    format!("{label}_{stamp}_{disambiguator:02}.kef")
}

/// Reads a backup file back into per-table raw rows.
///
/// # Errors
///
/// Returns [`BackupError`] when the file cannot be read or parsed.
pub fn read_backup(file: &Path) -> Result<Vec<KefTable>, BackupError> {
    let text = fs::read_to_string(file).map_err(|err| BackupError::Io {
        path: file.display().to_string(),
        message: err.to_string(),
    })?;
    parse(&text).map_err(|source| BackupError::Kef {
        path: file.display().to_string(),
        source,
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
