// crates/ph5-core/src/runtime/repair.rs
// ============================================================================
// Module: Table Repairs
// Description: Sample-rate-multiplier and trace-order repairs.
// Purpose: Correct corrupt trace and deployment tables behind backups.
// Dependencies: crate::{core, interfaces, runtime}, serde, tracing
// ============================================================================

//! ## Overview
//! Both repairs run through [`rewrite_table`]: the table is backed up,
//! removed, recreated and repopulated from the backup text.
//!
//! - The multiplier repair patches the backup text itself: every
//!   `sample_rate_multiplier_i = 0` becomes `= 1` and every row block lacking
//!   the field gains it with value 1. No other line changes, so every other
//!   field is restored exactly as saved.
//! - The order repair stably sorts the backed-up rows by
//!   `(channel, epoch, micro_seconds)`.
//!
//! Tables that need no change are left untouched: no backup, no removal.
//! A failed backup or an interrupted rewrite stops the run; other per-table
//! failures are collected and the run continues.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::DasSerial;
use crate::core::identifiers::NodePath;
use crate::core::identifiers::SORTS_GROUP;
use crate::core::identifiers::ShardName;
use crate::core::identifiers::deployment_table_name;
use crate::core::identifiers::parse_deployment_table_name;
use crate::core::records::COL_CHANNEL;
use crate::core::records::COL_MULTIPLIER;
use crate::core::records::GROUP_TRACE_TIME;
use crate::core::table::Column;
use crate::core::table::TableData;
use crate::interfaces::Container;
use crate::interfaces::ContainerStore;
use crate::runtime::catalog::read_all;
use crate::runtime::experiment::Experiment;
use crate::runtime::registry::deployment_table_path;
use crate::runtime::registry::is_ordered;
use crate::runtime::registry::read_traces;
use crate::runtime::rewrite::RepairContext;
use crate::runtime::rewrite::RepairError;
use crate::runtime::rewrite::Replacement;
use crate::runtime::rewrite::Rewrite;
use crate::runtime::rewrite::rewrite_table;
use crate::runtime::rewrite::rows_from_kef;

// ============================================================================
// SECTION: Targets and Report
// ============================================================================

/// Tables the multiplier repair visits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SrmTarget {
    /// One instrument's trace table.
    Das(DasSerial),
    /// Every cataloged instrument's trace table.
    AllDas,
    /// One deployment table.
    Array(u32),
    /// Every deployment table.
    AllArrays,
    /// Every trace and deployment table.
    All,
}

impl SrmTarget {
    /// Returns `true` when trace tables are visited.
    const fn covers_traces(&self) -> bool {
        matches!(self, Self::Das(_) | Self::AllDas | Self::All)
    }

    /// Returns `true` when deployment tables are visited.
    const fn covers_arrays(&self) -> bool {
        matches!(self, Self::Array(_) | Self::AllArrays | Self::All)
    }
}

/// Instruments the order repair visits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderTarget {
    /// One instrument.
    Das(DasSerial),
    /// Every cataloged instrument.
    All,
}

/// One table the repair could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairFailure {
    /// Table concerned.
    pub table: String,
    /// Failure detail.
    pub message: String,
}

/// Outcome of one repair run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Tables rewritten, each behind a backup.
    pub rewrites: Vec<Rewrite>,
    /// Tables inspected and found healthy.
    pub untouched: Vec<NodePath>,
    /// Tables skipped after a non-fatal failure.
    pub failures: Vec<RepairFailure>,
}

impl RepairReport {
    /// Records one table's result, returning fatal errors to the caller.
    fn absorb(
        &mut self,
        table: &NodePath,
        result: Result<Option<Rewrite>, RepairError>,
    ) -> Result<(), RepairError> {
        match result {
            Ok(Some(rewrite)) => self.rewrites.push(rewrite),
            Ok(None) => self.untouched.push(table.clone()),
            Err(
                err @ (RepairError::Backup {
                    ..
                }
                | RepairError::Interrupted {
                    ..
                }),
            ) => return Err(err),
            Err(err) => {
                tracing::warn!(table = %table, error = %err, "repair skipped table");
                self.failures.push(RepairFailure {
                    table: table.to_string(),
                    message: err.to_string(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Multiplier Repair
// ============================================================================

/// Returns the value of a line that sets the multiplier.
fn multiplier_value(line: &str) -> Option<&str> {
    let (key, value) = line.trim().split_once('=')?;
    (key.trim() == COL_MULTIPLIER).then(|| value.trim())
}

/// Patches multiplier lines in the row blocks of `path`.
///
/// Returns the patched text and the number of row blocks changed. Lines of
/// other tables, comments and every other field pass through unchanged.
#[must_use]
pub fn patch_multiplier_text(text: &str, path: &NodePath) -> (String, usize) {
    let fixed = format!("\t{COL_MULTIPLIER} = 1");
    let mut out: Vec<String> = Vec::new();
    let mut patched = 0;
    // Some(has_multiplier) while inside a block of `path`.
    let mut block: Option<bool> = None;
    for line in text.lines() {
        let trimmed = line.trim();
        let is_value = !trimmed.is_empty() && !trimmed.starts_with('#') && !trimmed.starts_with('/');
        if !is_value {
            if block == Some(false) {
                out.push(fixed.clone());
                patched += 1;
            }
            block = (trimmed.starts_with('/') && NodePath::new(trimmed) == *path).then_some(false);
            out.push(line.to_string());
            continue;
        }
        match (block, multiplier_value(line)) {
            (Some(_), Some(value)) => {
                block = Some(true);
                if value == "0" {
                    out.push(fixed.clone());
                    patched += 1;
                } else {
                    out.push(line.to_string());
                }
            }
            _ => out.push(line.to_string()),
        }
    }
    if block == Some(false) {
        out.push(fixed);
        patched += 1;
    }
    let mut joined = out.join("\n");
    joined.push('\n');
    (joined, patched)
}

/// Counts rows whose multiplier is absent or zero.
fn corrupt_multipliers(table: &TableData) -> usize {
    table
        .rows
        .iter()
        .filter(|row| matches!(row.opt_int(COL_MULTIPLIER), Ok(None | Some(0))))
        .count()
}

/// Repairs multipliers in one table. Returns `None` when no row needed it.
///
/// # Errors
///
/// Returns [`RepairError`] when the table cannot be read, backed up or
/// rewritten.
pub fn fix_multiplier_table<C: Container>(
    container: &mut C,
    path: &NodePath,
    label: &str,
    ctx: RepairContext<'_>,
) -> Result<Option<Rewrite>, RepairError> {
    let table = container.read_table(path).map_err(|source| RepairError::Store {
        table: path.to_string(),
        source,
    })?;
    let corrupt = corrupt_multipliers(&table);
    if corrupt == 0 {
        tracing::debug!(table = %path, "multipliers healthy");
        return Ok(None);
    }
    let rewrite = rewrite_table(container, path, label, ctx, |table, text| {
        let (patched, count) = patch_multiplier_text(text, path);
        let mut columns = table.columns.clone();
        if table.column(COL_MULTIPLIER).is_none() {
            columns.push(Column::new(COL_MULTIPLIER));
        }
        tracing::info!(table = %path, rows = count, "patched multipliers to 1");
        Ok(Replacement {
            rows: rows_from_kef(&patched, path, &columns)?,
            columns,
        })
    })?;
    Ok(Some(rewrite))
}

/// Runs the multiplier repair over `target`.
///
/// # Errors
///
/// Returns [`RepairError::NotFound`] for an explicit target that does not
/// exist, [`RepairError::Setup`] when the catalog or group listing cannot be
/// read, and backup or interrupted-rewrite errors as they occur.
pub fn fix_sample_rate_multiplier<S: ContainerStore>(
    experiment: &mut Experiment<S>,
    target: &SrmTarget,
    ctx: RepairContext<'_>,
) -> Result<RepairReport, RepairError> {
    let mut report = RepairReport::default();
    if target.covers_traces() {
        let serial = match target {
            SrmTarget::Das(serial) => Some(serial),
            _ => None,
        };
        for (shard, serial) in trace_targets(experiment, serial)? {
            let path = serial.trace_table_path();
            let result = with_shard(experiment, shard, |handle| {
                fix_multiplier_table(handle, &path, &serial.trace_table_label(), ctx)
            });
            report.absorb(&path, result)?;
        }
    }
    if target.covers_arrays() {
        let array = match target {
            SrmTarget::Array(array) => Some(*array),
            _ => None,
        };
        for array in array_targets(experiment.master(), array)? {
            let path = deployment_table_path(array);
            let label = deployment_table_name(array);
            let result = fix_multiplier_table(experiment.master_mut(), &path, &label, ctx);
            report.absorb(&path, result)?;
        }
    }
    log_report("multiplier repair", &report);
    Ok(report)
}

// ============================================================================
// SECTION: Order Repair
// ============================================================================

/// Re-sorts one instrument's trace table. Returns `None` when it was
/// already ordered.
///
/// # Errors
///
/// Returns [`RepairError`] when the table cannot be read, backed up or
/// rewritten.
pub fn fix_order_table<C: Container>(
    container: &mut C,
    serial: &DasSerial,
    ctx: RepairContext<'_>,
) -> Result<Option<Rewrite>, RepairError> {
    let path = serial.trace_table_path();
    let segments =
        read_traces(container, serial).map_err(|err| RepairError::Setup(err.to_string()))?;
    if is_ordered(&segments) {
        tracing::debug!(serial = %serial, "trace rows already ordered");
        return Ok(None);
    }
    let rewrite = rewrite_table(container, &path, &serial.trace_table_label(), ctx, |table, text| {
        let mut rows = rows_from_kef(text, &path, &table.columns)?;
        rows.sort_by_key(|row| (row.int(COL_CHANNEL).ok(), row.time(GROUP_TRACE_TIME).ok()));
        Ok(Replacement {
            columns: table.columns.clone(),
            rows,
        })
    })?;
    tracing::info!(serial = %serial, rows = rewrite.rows_after, "reordered trace rows");
    Ok(Some(rewrite))
}

/// Runs the order repair over `target`.
///
/// # Errors
///
/// Returns [`RepairError::NotFound`] when an explicit serial is not
/// cataloged, [`RepairError::Setup`] when the catalog cannot be read, and
/// backup or interrupted-rewrite errors as they occur.
pub fn fix_trace_order<S: ContainerStore>(
    experiment: &mut Experiment<S>,
    target: &OrderTarget,
    ctx: RepairContext<'_>,
) -> Result<RepairReport, RepairError> {
    let serial = match target {
        OrderTarget::Das(serial) => Some(serial),
        OrderTarget::All => None,
    };
    let mut report = RepairReport::default();
    for (shard, serial) in trace_targets(experiment, serial)? {
        let result = with_shard(experiment, shard, |handle| fix_order_table(handle, &serial, ctx));
        report.absorb(&serial.trace_table_path(), result)?;
    }
    log_report("order repair", &report);
    Ok(report)
}

// ============================================================================
// SECTION: Target Resolution
// ============================================================================

/// Resolves cataloged `(shard, serial)` pairs, optionally for one serial.
fn trace_targets<S: ContainerStore>(
    experiment: &Experiment<S>,
    serial: Option<&DasSerial>,
) -> Result<BTreeSet<(ShardName, DasSerial)>, RepairError> {
    let entries =
        read_all(experiment.master()).map_err(|err| RepairError::Setup(err.to_string()))?;
    let targets: BTreeSet<(ShardName, DasSerial)> = entries
        .into_iter()
        .filter(|entry| serial.is_none_or(|serial| &entry.serial == serial))
        .map(|entry| (entry.shard, entry.serial))
        .collect();
    match serial {
        Some(serial) if targets.is_empty() => Err(RepairError::NotFound(serial.to_string())),
        _ => Ok(targets),
    }
}

/// Lists deployment tables, optionally requiring one.
fn array_targets<C: Container>(master: &C, array: Option<u32>) -> Result<Vec<u32>, RepairError> {
    let sorts = NodePath::new(SORTS_GROUP);
    let names = match master.list_children(&sorts) {
        Ok(names) => names,
        Err(err) if err.is_not_found() => Vec::new(),
        Err(err) => return Err(RepairError::Setup(err.to_string())),
    };
    let present: BTreeSet<u32> =
        names.iter().filter_map(|name| parse_deployment_table_name(name)).collect();
    match array {
        Some(array) if present.contains(&array) => Ok(vec![array]),
        Some(array) => Err(RepairError::NotFound(deployment_table_name(array))),
        None => Ok(present.into_iter().collect()),
    }
}

/// Runs `repair` against one shard handle from the experiment's registry.
fn with_shard<S, F>(
    experiment: &mut Experiment<S>,
    shard: ShardName,
    repair: F,
) -> Result<Option<Rewrite>, RepairError>
where
    S: ContainerStore,
    F: FnOnce(&mut S::Handle) -> Result<Option<Rewrite>, RepairError>,
{
    let (store, _, handles) = experiment.parts_mut();
    let handle = handles.open(store, shard).map_err(|source| RepairError::Store {
        table: shard.file_name(),
        source,
    })?;
    repair(handle)
}

/// Logs the run summary.
fn log_report(repair: &str, report: &RepairReport) {
    if report.failures.is_empty() {
        tracing::info!(
            repair,
            rewritten = report.rewrites.len(),
            untouched = report.untouched.len(),
            "repair finished"
        );
    } else {
        tracing::warn!(
            repair,
            rewritten = report.rewrites.len(),
            untouched = report.untouched.len(),
            failed = report.failures.len(),
            "repair finished with failures"
        );
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
