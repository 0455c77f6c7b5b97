// crates/ph5-core/src/runtime/registry.rs
// ============================================================================
// Module: Deployment and Trace Registries
// Description: Access to deployment tables and per-shard trace tables.
// Purpose: Read, append and range-scan the tables the catalog is checked against.
// Dependencies: crate::{core, interfaces}, thiserror, tracing
// ============================================================================

//! ## Overview
//! [`DeploymentRegistry`] is an explicit, loaded view of every
//! `/Experiment_g/Sorts_g/Array_t_NNN` table in the master file, keyed by
//! sub-array number. It keeps the raw rows next to the decoded deployments
//! so that pruning can rewrite a table without altering retained rows.
//!
//! The trace functions operate on one shard handle. Trace tables are kept
//! ordered by `(channel, start)` so [`traces_in_window`] can binary search.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::identifiers::DATA_ARRAY_PREFIX;
use crate::core::identifiers::DasSerial;
use crate::core::identifiers::NodePath;
use crate::core::identifiers::RECEIVERS_GROUP;
use crate::core::identifiers::SORTS_GROUP;
use crate::core::identifiers::data_array_name;
use crate::core::identifiers::deployment_table_name;
use crate::core::identifiers::parse_deployment_table_name;
use crate::core::records::Deployment;
use crate::core::records::TraceSegment;
use crate::core::table::TableData;
use crate::core::table::TableRecord;
use crate::core::time::Ph5Time;
use crate::interfaces::Container;
use crate::interfaces::NodeKind;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry errors, each naming the table concerned.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Store failure.
    #[error("registry store error on {table}: {source}")]
    Store {
        /// Table or group concerned.
        table: String,
        /// Store failure.
        source: StoreError,
    },
    /// A row could not be decoded.
    #[error("registry row {row} of {table} is corrupt: {message}")]
    Corrupt {
        /// Table concerned.
        table: String,
        /// Zero-based row index.
        row: usize,
        /// Decode failure.
        message: String,
    },
}

/// Builds a store-error mapper naming `table`.
fn store_err(table: &NodePath) -> impl Fn(StoreError) -> RegistryError + '_ {
    move |source| RegistryError::Store {
        table: table.to_string(),
        source,
    }
}

// ============================================================================
// SECTION: Deployment Registry
// ============================================================================

/// Returns the path of the deployment table for `array`.
#[must_use]
pub fn deployment_table_path(array: u32) -> NodePath {
    NodePath::from_parent(SORTS_GROUP, &deployment_table_name(array))
}

/// Loaded deployment tables keyed by sub-array number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentRegistry {
    /// Raw table contents.
    tables: BTreeMap<u32, TableData>,
    /// Decoded deployments in (array, row) order.
    deployments: Vec<Deployment>,
}

impl DeploymentRegistry {
    /// Loads every deployment table from the master file.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when a table cannot be read or a row does
    /// not decode.
    pub fn load<C: Container>(master: &C) -> Result<Self, RegistryError> {
        let sorts = NodePath::new(SORTS_GROUP);
        let names = match master.list_children(&sorts) {
            Ok(names) => names,
            Err(err) if err.is_not_found() => return Ok(Self::default()),
            Err(err) => return Err(store_err(&sorts)(err)),
        };
        let mut registry = Self::default();
        for array in names.iter().filter_map(|name| parse_deployment_table_name(name)) {
            let path = deployment_table_path(array);
            let table = master.read_table(&path).map_err(store_err(&path))?;
            for (index, row) in table.rows.iter().enumerate() {
                let deployment = Deployment::from_row(array, index, row).map_err(|err| {
                    RegistryError::Corrupt {
                        table: path.to_string(),
                        row: index,
                        message: err.to_string(),
                    }
                })?;
                registry.deployments.push(deployment);
            }
            registry.tables.insert(array, table);
        }
        tracing::debug!(
            tables = registry.tables.len(),
            deployments = registry.deployments.len(),
            "loaded deployment registry"
        );
        Ok(registry)
    }

    /// Returns every deployment, including degenerate windows.
    #[must_use]
    pub fn deployments(&self) -> &[Deployment] {
        &self.deployments
    }

    /// Returns the raw contents of one table.
    #[must_use]
    pub fn table(&self, array: u32) -> Option<&TableData> {
        self.tables.get(&array)
    }

    /// Appends deployments to the table for `array`, creating it if absent,
    /// and records them in this registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] when the table cannot be written.
    pub fn append<C: Container>(
        &mut self,
        master: &mut C,
        array: u32,
        deployments: &[Deployment],
    ) -> Result<(), RegistryError> {
        let path = deployment_table_path(array);
        if !self.tables.contains_key(&array) && !master.has_node(&path).map_err(store_err(&path))? {
            master.create_table(&path, &Deployment::columns()).map_err(store_err(&path))?;
        }
        let rows: Vec<_> = deployments.iter().map(Deployment::to_row).collect();
        master.append_rows(&path, &rows).map_err(store_err(&path))?;
        let table = master.read_table(&path).map_err(store_err(&path))?;
        let offset = table.rows.len().saturating_sub(rows.len());
        for (index, deployment) in deployments.iter().enumerate() {
            let mut stored = deployment.clone();
            stored.array = array;
            stored.row = offset + index;
            self.deployments.push(stored);
        }
        self.deployments.sort_by_key(|deployment| (deployment.array, deployment.row));
        self.tables.insert(array, table);
        Ok(())
    }
}

/// Returns the deployments whose window is not degenerate.
pub fn valid(deployments: &[Deployment]) -> impl Iterator<Item = &Deployment> {
    deployments.iter().filter(|deployment| !deployment.is_degenerate())
}

// ============================================================================
// SECTION: Trace Registry
// ============================================================================

/// New trace handed to the registry by an ingestion producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrace<'a> {
    /// Recording channel.
    pub channel: i64,
    /// First sample time.
    pub start: Ph5Time,
    /// Nominal sample rate.
    pub sample_rate: i64,
    /// Sample rate multiplier.
    pub multiplier: i64,
    /// Raw samples.
    pub samples: &'a [i32],
    /// Original raw file name.
    pub raw_file: &'a str,
}

/// Lists instruments with a group in a shard, in serial order.
///
/// # Errors
///
/// Returns [`RegistryError::Store`] when the receivers group cannot be read.
pub fn list_instruments<C: Container>(shard: &C) -> Result<Vec<DasSerial>, RegistryError> {
    let receivers = NodePath::new(RECEIVERS_GROUP);
    let names = match shard.list_children(&receivers) {
        Ok(names) => names,
        Err(err) if err.is_not_found() => return Ok(Vec::new()),
        Err(err) => return Err(store_err(&receivers)(err)),
    };
    let mut serials: Vec<DasSerial> = names
        .iter()
        .filter_map(|name| DasSerial::from_group_name(name))
        .filter(|serial| {
            matches!(shard.node_kind(&serial.group_path()), Ok(Some(NodeKind::Group)))
        })
        .collect();
    serials.sort();
    Ok(serials)
}

/// Reads an instrument's trace segments in stored order. A missing trace
/// table reads empty.
///
/// # Errors
///
/// Returns [`RegistryError`] when the table cannot be read or decoded.
pub fn read_traces<C: Container>(
    shard: &C,
    serial: &DasSerial,
) -> Result<Vec<TraceSegment>, RegistryError> {
    let path = serial.trace_table_path();
    let table = match shard.read_table(&path) {
        Ok(table) => table,
        Err(err) if err.is_not_found() => return Ok(Vec::new()),
        Err(err) => return Err(store_err(&path)(err)),
    };
    table
        .rows
        .iter()
        .enumerate()
        .map(|(row, values)| {
            TraceSegment::from_row(values).map_err(|err| RegistryError::Corrupt {
                table: path.to_string(),
                row,
                message: err.to_string(),
            })
        })
        .collect()
}

/// Appends one trace: writes its sample array, then its trace row.
///
/// # Errors
///
/// Returns [`RegistryError::Store`] when either write fails.
pub fn append_trace<C: Container>(
    shard: &mut C,
    serial: &DasSerial,
    trace: &NewTrace<'_>,
) -> Result<TraceSegment, RegistryError> {
    let group = serial.group_path();
    let table_path = serial.trace_table_path();
    if !shard.has_node(&table_path).map_err(store_err(&table_path))? {
        shard.create_table(&table_path, &TraceSegment::columns()).map_err(store_err(&table_path))?;
    }
    let existing = shard.list_children(&group).map_err(store_err(&group))?;
    let ordinal = existing.iter().filter(|name| name.starts_with(DATA_ARRAY_PREFIX)).count() + 1;
    let array_name = data_array_name(u32::try_from(ordinal).unwrap_or(u32::MAX));
    let array_path = group.child(&array_name);
    shard.create_array(&array_path, trace.samples).map_err(store_err(&array_path))?;
    let segment = TraceSegment {
        channel: trace.channel,
        start: trace.start,
        sample_rate: trace.sample_rate,
        multiplier: Some(trace.multiplier),
        sample_count: i64::try_from(trace.samples.len()).unwrap_or(i64::MAX),
        array_name,
        raw_file: trace.raw_file.to_string(),
    };
    shard.append_rows(&table_path, &[segment.to_row()]).map_err(store_err(&table_path))?;
    Ok(segment)
}

/// Returns `true` when segments are ordered by `(channel, start)`.
#[must_use]
pub fn is_ordered(segments: &[TraceSegment]) -> bool {
    segments.windows(2).all(|pair| pair[0].order_key() <= pair[1].order_key())
}

/// Returns segments of `channel` starting inside `[start, stop]`.
///
/// Requires `segments` ordered by `(channel, start)`; callers with unordered
/// data get an unspecified subset.
#[must_use]
pub fn traces_in_window(
    segments: &[TraceSegment],
    channel: i64,
    start: Ph5Time,
    stop: Ph5Time,
) -> &[TraceSegment] {
    let low = (channel, start.epoch, start.micro_seconds);
    let high = (channel, stop.epoch, stop.micro_seconds);
    let lower = segments.partition_point(|segment| segment.order_key() < low);
    let upper = segments.partition_point(|segment| segment.order_key() <= high);
    segments.get(lower .. upper.max(lower)).unwrap_or_default()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
