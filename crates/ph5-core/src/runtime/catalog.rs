// crates/ph5-core/src/runtime/catalog.rs
// ============================================================================
// Module: Catalog
// Description: Master-file index of instrument serial to shard and coverage.
// Purpose: Accumulate, flush, read, merge and rewrite catalog entries.
// Dependencies: crate::{core, interfaces}, thiserror, tracing
// ============================================================================

//! ## Overview
//! Ingestion records per-batch coverage into [`Catalog`], which keeps the
//! minimum start and maximum stop per serial until [`Catalog::flush`] writes
//! one entry per serial to `/Experiment_g/Receivers_g/Index_t`. Sessions
//! append; nothing is overwritten. Readers merge entries per serial with
//! [`CatalogView`]. An instrument recorded in more than one shard is not
//! supported: the view reports such serials as conflicts and placement
//! refuses them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::identifiers::CATALOG_TABLE;
use crate::core::identifiers::DasSerial;
use crate::core::identifiers::NodePath;
use crate::core::identifiers::ShardName;
use crate::core::records::CatalogEntry;
use crate::core::table::TableRecord;
use crate::core::time::Clock;
use crate::core::time::Ph5Time;
use crate::interfaces::Container;
use crate::interfaces::StoreError;
use crate::runtime::rewrite::RepairContext;
use crate::runtime::rewrite::RepairError;
use crate::runtime::rewrite::Replacement;
use crate::runtime::rewrite::Rewrite;
use crate::runtime::rewrite::rewrite_table;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Master store failure.
    #[error("catalog store error: {0}")]
    Store(#[from] StoreError),
    /// A catalog row could not be decoded.
    #[error("catalog row {row} is corrupt: {message}")]
    Corrupt {
        /// Zero-based row index.
        row: usize,
        /// Decode failure.
        message: String,
    },
    /// A serial was recorded against two different locations.
    #[error("serial {serial} is recorded in {existing} and {requested}")]
    Conflict {
        /// Instrument serial.
        serial: DasSerial,
        /// Location already recorded.
        existing: String,
        /// Location requested.
        requested: String,
    },
}

// ============================================================================
// SECTION: Accumulator
// ============================================================================

/// Coverage accumulated for one serial since the last flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Shard holding the data.
    pub shard: ShardName,
    /// Instrument group path inside the shard.
    pub path: NodePath,
    /// Minimum start seen.
    pub start: Ph5Time,
    /// Maximum stop seen.
    pub stop: Ph5Time,
}

/// Catalog accumulator bound to one ingestion session.
#[derive(Debug, Default)]
pub struct Catalog {
    /// Pending coverage keyed by serial.
    pending: BTreeMap<DasSerial, PendingEntry>,
}

impl Catalog {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records coverage for `serial`, widening any pending range.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Conflict`] when `serial` is already pending in
    /// a different shard or path.
    pub fn record(
        &mut self,
        serial: &DasSerial,
        shard: ShardName,
        path: &NodePath,
        start: Ph5Time,
        stop: Ph5Time,
    ) -> Result<(), CatalogError> {
        if let Some(entry) = self.pending.get_mut(serial) {
            if entry.shard != shard || &entry.path != path {
                return Err(CatalogError::Conflict {
                    serial: serial.clone(),
                    existing: format!("{}:{}", entry.shard, entry.path),
                    requested: format!("{shard}:{path}"),
                });
            }
            entry.start = entry.start.min(start);
            entry.stop = entry.stop.max(stop);
            return Ok(());
        }
        self.pending.insert(serial.clone(), PendingEntry {
            shard,
            path: path.clone(),
            start: start.min(stop),
            stop: stop.max(start),
        });
        Ok(())
    }

    /// Returns the pending entry for `serial`, if any.
    #[must_use]
    pub fn pending(&self, serial: &DasSerial) -> Option<&PendingEntry> {
        self.pending.get(serial)
    }

    /// Iterates pending entries in serial order.
    pub fn pending_entries(&self) -> impl Iterator<Item = (&DasSerial, &PendingEntry)> {
        self.pending.iter()
    }

    /// Returns `true` when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Writes one entry per pending serial and clears the accumulator.
    ///
    /// An empty accumulator writes nothing and does not touch the master.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] when the table cannot be written; the
    /// accumulator is kept so the flush can be retried.
    pub fn flush<C: Container>(
        &mut self,
        master: &mut C,
        clock: &dyn Clock,
    ) -> Result<Vec<CatalogEntry>, CatalogError> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let now = clock.now();
        let entries: Vec<CatalogEntry> = self
            .pending
            .iter()
            .map(|(serial, pending)| CatalogEntry {
                serial: serial.clone(),
                shard: pending.shard,
                path: pending.path.clone(),
                start: pending.start,
                stop: pending.stop,
                recorded_at: now,
            })
            .collect();
        append_entries(master, &entries)?;
        for entry in &entries {
            tracing::info!(
                serial = %entry.serial,
                shard = %entry.shard,
                start = %entry.start,
                stop = %entry.stop,
                "catalog entry written"
            );
        }
        self.pending.clear();
        Ok(entries)
    }
}

/// Appends entries to the catalog table, creating it when absent.
fn append_entries<C: Container>(master: &mut C, entries: &[CatalogEntry]) -> Result<(), CatalogError> {
    let path = catalog_path();
    if !master.has_node(&path)? {
        master.create_table(&path, &CatalogEntry::columns())?;
    }
    let rows: Vec<_> = entries.iter().map(CatalogEntry::to_row).collect();
    master.append_rows(&path, &rows)?;
    Ok(())
}

/// Returns the catalog table path.
#[must_use]
pub fn catalog_path() -> NodePath {
    NodePath::new(CATALOG_TABLE)
}

// ============================================================================
// SECTION: Reads
// ============================================================================

/// Reads every catalog entry in stored order. A missing table reads empty.
///
/// # Errors
///
/// Returns [`CatalogError`] when the table cannot be read or a row is corrupt.
pub fn read_all<C: Container>(master: &C) -> Result<Vec<CatalogEntry>, CatalogError> {
    let path = catalog_path();
    let table = match master.read_table(&path) {
        Ok(table) => table,
        Err(err) if err.is_not_found() => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    table
        .rows
        .iter()
        .enumerate()
        .map(|(row, values)| {
            CatalogEntry::from_row(values).map_err(|err| CatalogError::Corrupt {
                row,
                message: err.to_string(),
            })
        })
        .collect()
}

/// Destroys the catalog table and recreates it with exactly `entries`.
///
/// # Errors
///
/// Returns [`RepairError`] when the backup or any store step fails.
pub fn replace_all<C: Container>(
    master: &mut C,
    entries: &[CatalogEntry],
    ctx: RepairContext<'_>,
) -> Result<Rewrite, RepairError> {
    let path = catalog_path();
    let exists = master.has_node(&path).map_err(|source| RepairError::Store {
        table: path.to_string(),
        source,
    })?;
    if !exists {
        master.create_table(&path, &CatalogEntry::columns()).map_err(|source| {
            RepairError::Store {
                table: path.to_string(),
                source,
            }
        })?;
    }
    rewrite_table(master, &path, "Index_t", ctx, |_, _| {
        Ok(Replacement {
            columns: CatalogEntry::columns(),
            rows: entries.iter().map(CatalogEntry::to_row).collect(),
        })
    })
}

// ============================================================================
// SECTION: Merged View
// ============================================================================

/// Merged coverage of every entry for one serial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSpan {
    /// Shard of the first entry recorded.
    pub shard: ShardName,
    /// Instrument group path of the first entry recorded.
    pub path: NodePath,
    /// Minimum start over all entries.
    pub start: Ph5Time,
    /// Maximum stop over all entries.
    pub stop: Ph5Time,
    /// Number of entries merged.
    pub entries: usize,
}

/// Catalog entries merged per serial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogView {
    /// Merged spans keyed by serial.
    spans: BTreeMap<DasSerial, CatalogSpan>,
    /// Serials whose entries disagree on location, with every location seen.
    conflicts: BTreeMap<DasSerial, Vec<(ShardName, NodePath)>>,
}

impl CatalogView {
    /// Merges entries per serial.
    #[must_use]
    pub fn build(entries: &[CatalogEntry]) -> Self {
        let mut view = Self::default();
        for entry in entries {
            match view.spans.get_mut(&entry.serial) {
                Some(span) => {
                    if span.shard != entry.shard || span.path != entry.path {
                        let seen = view
                            .conflicts
                            .entry(entry.serial.clone())
                            .or_insert_with(|| vec![(span.shard, span.path.clone())]);
                        if !seen.contains(&(entry.shard, entry.path.clone())) {
                            seen.push((entry.shard, entry.path.clone()));
                        }
                    }
                    span.start = span.start.min(entry.start);
                    span.stop = span.stop.max(entry.stop);
                    span.entries += 1;
                }
                None => {
                    view.spans.insert(entry.serial.clone(), CatalogSpan {
                        shard: entry.shard,
                        path: entry.path.clone(),
                        start: entry.start,
                        stop: entry.stop,
                        entries: 1,
                    });
                }
            }
        }
        view
    }

    /// Returns the merged span for `serial`.
    #[must_use]
    pub fn span(&self, serial: &DasSerial) -> Option<&CatalogSpan> {
        self.spans.get(serial)
    }

    /// Returns the shard for `serial`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Conflict`] when entries for `serial` point at
    /// more than one location.
    pub fn shard_for(&self, serial: &DasSerial) -> Result<Option<ShardName>, CatalogError> {
        if let Some(locations) = self.conflicts.get(serial) {
            let rendered: Vec<String> =
                locations.iter().map(|(shard, path)| format!("{shard}:{path}")).collect();
            return Err(CatalogError::Conflict {
                serial: serial.clone(),
                existing: rendered.first().cloned().unwrap_or_default(),
                requested: rendered.get(1 ..).map_or_else(String::new, |rest| rest.join(", ")),
            });
        }
        Ok(self.spans.get(serial).map(|span| span.shard))
    }

    /// Iterates merged spans in serial order.
    pub fn spans(&self) -> impl Iterator<Item = (&DasSerial, &CatalogSpan)> {
        self.spans.iter()
    }

    /// Iterates serials whose entries disagree on location.
    pub fn conflicts(&self) -> impl Iterator<Item = (&DasSerial, &[(ShardName, NodePath)])> {
        self.conflicts.iter().map(|(serial, seen)| (serial, seen.as_slice()))
    }

    /// Returns the highest shard number referenced.
    #[must_use]
    pub fn newest_shard(&self) -> Option<ShardName> {
        let conflicting = self.conflicts.values().flatten().map(|(shard, _)| *shard);
        self.spans.values().map(|span| span.shard).chain(conflicting).max()
    }

    /// Returns the number of serials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns `true` when the view holds no serial.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}
