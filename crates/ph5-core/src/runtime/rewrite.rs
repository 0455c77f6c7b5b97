// crates/ph5-core/src/runtime/rewrite.rs
// ============================================================================
// Module: Table Rewrites
// Description: Backup, delete, recreate and repopulate sequences for tables.
// Purpose: Share the destructive rewrite path by repairs and audit writes.
// Dependencies: crate::{core, interfaces}, thiserror, tracing
// ============================================================================

//! ## Overview
//! Every destructive table change runs the same non-atomic sequence:
//! read the current rows, write a backup, remove the table, recreate it
//! empty and append the replacement rows. The replacement is derived from
//! the backup text, so what is restored is a replay of what was saved.
//! A failed backup aborts before anything is removed; a failure after the
//! removal leaves the table empty or partial and the error names the backup
//! to restore from.
//!
//! The same module carries kef import and export for table maintenance.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

use crate::core::identifiers::NodePath;
use crate::core::kef::KefError;
use crate::core::kef::encode_table;
use crate::core::kef::parse;
use crate::core::table::Column;
use crate::core::table::Row;
use crate::core::table::TableData;
use crate::core::time::Clock;
use crate::interfaces::Container;
use crate::interfaces::StoreError;
use crate::runtime::backup::BackupError;
use crate::runtime::backup::BackupStore;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by destructive table rewrites and repairs.
#[derive(Debug, Error)]
pub enum RepairError {
    /// The backup could not be written; nothing was removed.
    #[error("backup of {table} failed, table left untouched: {source}")]
    Backup {
        /// Table concerned.
        table: String,
        /// Backup failure.
        source: BackupError,
    },
    /// Store failure before any destructive step.
    #[error("store error on {table}: {source}")]
    Store {
        /// Table concerned.
        table: String,
        /// Store failure.
        source: StoreError,
    },
    /// Store failure after the table was removed.
    #[error("rewrite of {table} interrupted, restore from {backup}: {source}")]
    Interrupted {
        /// Table concerned.
        table: String,
        /// Backup holding the pre-rewrite rows.
        backup: String,
        /// Store failure.
        source: StoreError,
    },
    /// Replacement text could not be parsed.
    #[error("kef error on {table}: {source}")]
    Kef {
        /// Table concerned.
        table: String,
        /// Parse failure.
        source: KefError,
    },
    /// The requested target does not exist.
    #[error("repair target not found: {0}")]
    NotFound(String),
    /// The catalog or deployment data could not be read.
    #[error("repair setup failed: {0}")]
    Setup(String),
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Shared inputs for destructive operations.
#[derive(Clone, Copy)]
pub struct RepairContext<'a> {
    /// Backup destination.
    pub backups: &'a BackupStore,
    /// Clock for backup names and catalog stamps.
    pub clock: &'a dyn Clock,
}

/// Replacement contents produced from a backup.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    /// Columns of the recreated table.
    pub columns: Vec<Column>,
    /// Rows to repopulate, in order.
    pub rows: Vec<Row>,
}

/// Result of one completed rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// Table rewritten.
    pub table: NodePath,
    /// Backup written before the removal.
    pub backup: PathBuf,
    /// Row count before.
    pub rows_before: usize,
    /// Row count after.
    pub rows_after: usize,
}

// ============================================================================
// SECTION: Rewrite
// ============================================================================

/// Rewrites `path` through backup, remove, recreate and repopulate.
///
/// `replace` receives the current table and the exact backup text and
/// returns the replacement contents.
///
/// # Errors
///
/// Returns [`RepairError::Backup`] when the backup fails (nothing removed),
/// [`RepairError::Interrupted`] when a store step fails after removal, or
/// the error returned by `replace` (nothing removed).
pub fn rewrite_table<C, F>(
    container: &mut C,
    path: &NodePath,
    label: &str,
    ctx: RepairContext<'_>,
    replace: F,
) -> Result<Rewrite, RepairError>
where
    C: Container,
    F: FnOnce(&TableData, &str) -> Result<Replacement, RepairError>,
{
    let table = container.read_table(path).map_err(|source| RepairError::Store {
        table: path.to_string(),
        source,
    })?;
    let backup =
        ctx.backups.write(label, path, &table, ctx.clock.now()).map_err(|source| {
            tracing::error!(table = %path, error = %source, "backup failed, aborting rewrite");
            RepairError::Backup {
                table: path.to_string(),
                source,
            }
        })?;
    let replacement = replace(&table, &backup.text)?;
    let interrupted = |source: StoreError| {
        tracing::error!(
            table = %path,
            backup = %backup.file.display(),
            error = %source,
            "rewrite interrupted"
        );
        RepairError::Interrupted {
            table: path.to_string(),
            backup: backup.file.display().to_string(),
            source,
        }
    };
    container.remove_node(path).map_err(interrupted)?;
    tracing::debug!(table = %path, "removed table");
    container.create_table(path, &replacement.columns).map_err(interrupted)?;
    if !replacement.rows.is_empty() {
        container.append_rows(path, &replacement.rows).map_err(interrupted)?;
    }
    tracing::info!(
        table = %path,
        rows_before = table.rows.len(),
        rows_after = replacement.rows.len(),
        "rewrote table"
    );
    Ok(Rewrite {
        table: path.clone(),
        backup: backup.file,
        rows_before: table.rows.len(),
        rows_after: replacement.rows.len(),
    })
}

/// Parses kef text and returns the rows recorded for `path`.
///
/// # Errors
///
/// Returns [`RepairError::Kef`] when the text or a value fails to parse.
pub fn rows_from_kef(text: &str, path: &NodePath, columns: &[Column]) -> Result<Vec<Row>, RepairError> {
    let kef_error = |source| RepairError::Kef {
        table: path.to_string(),
        source,
    };
    let tables = parse(text).map_err(kef_error)?;
    match tables.into_iter().find(|table| &table.path == path) {
        Some(table) => table.typed_rows(columns).map_err(kef_error),
        None => Ok(Vec::new()),
    }
}

// ============================================================================
// SECTION: Import / Export
// ============================================================================

/// Summary of one kef import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// `(table, rows appended)` per table in document order.
    pub tables: Vec<(NodePath, usize)>,
}

/// Imports kef text, creating absent tables with suffix-typed columns.
///
/// # Errors
///
/// Returns [`RepairError`] when the text is invalid or a table rejects rows.
pub fn import_kef<C: Container>(container: &mut C, text: &str) -> Result<ImportReport, RepairError> {
    let tables = parse(text).map_err(|source| RepairError::Kef {
        table: "<document>".to_string(),
        source,
    })?;
    let mut report = ImportReport::default();
    for table in tables {
        let store_error = |source| RepairError::Store {
            table: table.path.to_string(),
            source,
        };
        let columns = if container.has_node(&table.path).map_err(store_error)? {
            container.read_table(&table.path).map_err(store_error)?.columns
        } else {
            let columns = table.inferred_columns();
            container.create_table(&table.path, &columns).map_err(store_error)?;
            tracing::info!(table = %table.path, columns = columns.len(), "created table from kef");
            columns
        };
        let rows = table.typed_rows(&columns).map_err(|source| RepairError::Kef {
            table: table.path.to_string(),
            source,
        })?;
        container.append_rows(&table.path, &rows).map_err(store_error)?;
        report.tables.push((table.path.clone(), rows.len()));
    }
    Ok(report)
}

/// Exports a table as kef text.
///
/// # Errors
///
/// Returns [`RepairError::Store`] when the table cannot be read.
pub fn export_table<C: Container>(
    container: &C,
    path: &NodePath,
    clock: &dyn Clock,
) -> Result<String, RepairError> {
    let table = container.read_table(path).map_err(|source| RepairError::Store {
        table: path.to_string(),
        source,
    })?;
    Ok(encode_table(path, &table, clock.now()))
}
