// crates/ph5-core/src/runtime/ingest.rs
// ============================================================================
// Module: Ingestion Session
// Description: Writes normalized trace batches into shards and the catalog.
// Purpose: Tie shard placement, trace writes, catalog flush and links together.
// Dependencies: crate::{core, interfaces, runtime}, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! An [`IngestSession`] covers one ingestion run against a writable
//! experiment. For each [`TraceBatch`] it places the instrument, appends one
//! trace row plus one compressed sample array per trace and widens the
//! instrument's pending catalog range. [`IngestSession::finish`] must run at
//! the end of every session: it flushes the catalog and reconciles links.
//! Coverage is recorded per trace, so a session that fails midway still
//! flushes the traces that were written.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::DasSerial;
use crate::core::identifiers::ShardName;
use crate::core::records::CatalogEntry;
use crate::core::time::Clock;
use crate::core::time::Ph5Time;
use crate::interfaces::ContainerStore;
use crate::interfaces::StoreError;
use crate::runtime::catalog::Catalog;
use crate::runtime::catalog::CatalogError;
use crate::runtime::catalog::CatalogView;
use crate::runtime::catalog::read_all;
use crate::runtime::experiment::Experiment;
use crate::runtime::links::LinkReport;
use crate::runtime::links::reconcile;
use crate::runtime::registry::NewTrace;
use crate::runtime::registry::RegistryError;
use crate::runtime::registry::append_trace;
use crate::runtime::registry::read_traces;
use crate::runtime::shard::Placement;
use crate::runtime::shard::PlacementPolicy;
use crate::runtime::shard::ShardError;
use crate::runtime::shard::ShardManager;

// ============================================================================
// SECTION: Inputs
// ============================================================================

/// Bytes accounted per raw sample when estimating placement.
pub const BYTES_PER_SAMPLE: u64 = 4;

/// Returns the default multiplier for decoded records.
const fn default_multiplier() -> i64 {
    1
}

/// One normalized trace produced by a format decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestTrace {
    /// Recording channel.
    pub channel: i64,
    /// First sample time.
    pub start: Ph5Time,
    /// Nominal sample rate.
    pub sample_rate: i64,
    /// Sample rate multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: i64,
    /// Raw samples.
    pub samples: Vec<i32>,
    /// Original raw file name.
    #[serde(default)]
    pub raw_file: String,
}

/// A normalized trace tagged with its instrument serial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Instrument serial.
    pub serial: DasSerial,
    /// Trace contents.
    #[serde(flatten)]
    pub trace: IngestTrace,
}

/// New traces for one instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceBatch {
    /// Instrument serial.
    pub serial: DasSerial,
    /// Traces in arrival order.
    pub traces: Vec<IngestTrace>,
}

impl TraceBatch {
    /// Groups consecutive records of the same serial into batches.
    #[must_use]
    pub fn from_records(records: Vec<TraceRecord>) -> Vec<Self> {
        let mut batches: Vec<Self> = Vec::new();
        for record in records {
            match batches.last_mut() {
                Some(batch) if batch.serial == record.serial => batch.traces.push(record.trace),
                _ => batches.push(Self {
                    serial: record.serial,
                    traces: vec![record.trace],
                }),
            }
        }
        batches
    }

    /// Returns the placement estimate for this batch.
    #[must_use]
    pub fn estimated_bytes(&self) -> u64 {
        self.traces.iter().map(|trace| trace.samples.len() as u64 * BYTES_PER_SAMPLE).sum()
    }
}

// ============================================================================
// SECTION: Errors and Report
// ============================================================================

/// Ingestion errors. All are fatal to the run.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Placement failed.
    #[error(transparent)]
    Shard(#[from] ShardError),
    /// Catalog read or flush failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Trace write failed.
    #[error("trace write for {serial} failed: {source}")]
    Registry {
        /// Instrument serial.
        serial: DasSerial,
        /// Registry failure.
        source: RegistryError,
    },
    /// Chosen shard handle vanished from the registry.
    #[error("shard {shard} not open for {serial}: {source}")]
    Store {
        /// Instrument serial.
        serial: DasSerial,
        /// Shard concerned.
        shard: String,
        /// Store failure.
        source: StoreError,
    },
}

/// Summary of one ingestion session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Batches ingested.
    pub batches: usize,
    /// Traces written.
    pub traces: usize,
    /// Shards written to.
    pub shards: BTreeSet<ShardName>,
    /// Serials whose new rows broke `(channel, start)` order.
    pub out_of_order: BTreeSet<DasSerial>,
    /// Catalog entries flushed by `finish`.
    pub catalog_entries: Vec<CatalogEntry>,
    /// Link reconciliation outcome from `finish`.
    pub links: LinkReport,
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// One ingestion run against a writable experiment.
pub struct IngestSession<'e, S: ContainerStore> {
    /// Experiment being written.
    experiment: &'e mut Experiment<S>,
    /// Placement policy.
    manager: ShardManager,
    /// Clock for catalog stamps.
    clock: &'e dyn Clock,
    /// Catalog as flushed before the session.
    known: CatalogView,
    /// Pending coverage.
    catalog: Catalog,
    /// Running report.
    report: IngestReport,
}

impl<'e, S: ContainerStore> IngestSession<'e, S> {
    /// Starts a session, reading the flushed catalog once.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Catalog`] when the catalog cannot be read.
    pub fn new(
        experiment: &'e mut Experiment<S>,
        policy: PlacementPolicy,
        clock: &'e dyn Clock,
    ) -> Result<Self, IngestError> {
        let entries = read_all(experiment.master())?;
        Ok(Self {
            experiment,
            manager: ShardManager::new(policy),
            clock,
            known: CatalogView::build(&entries),
            catalog: Catalog::new(),
            report: IngestReport::default(),
        })
    }

    /// Ingests one batch and returns where it was placed. An empty batch is
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] when placement or a write fails; traces
    /// written before the failure stay recorded for `finish`.
    pub fn ingest(&mut self, batch: &TraceBatch) -> Result<Option<Placement>, IngestError> {
        if batch.traces.is_empty() {
            return Ok(None);
        }
        let (store, _, handles) = self.experiment.parts_mut();
        let placement = self.manager.choose_shard(
            store,
            handles,
            &batch.serial,
            batch.estimated_bytes(),
            &self.known,
            &self.catalog,
        )?;
        let shard = handles.open(store, placement.shard).map_err(|source| IngestError::Store {
            serial: batch.serial.clone(),
            shard: placement.shard.file_name(),
            source,
        })?;
        let registry_error = |source| IngestError::Registry {
            serial: batch.serial.clone(),
            source,
        };
        let mut last_key = read_traces(shard, &batch.serial)
            .map_err(registry_error)?
            .last()
            .map(|segment| segment.order_key());
        let path = batch.serial.group_path();
        for trace in &batch.traces {
            let segment = append_trace(shard, &batch.serial, &NewTrace {
                channel: trace.channel,
                start: trace.start,
                sample_rate: trace.sample_rate,
                multiplier: trace.multiplier,
                samples: &trace.samples,
                raw_file: &trace.raw_file,
            })
            .map_err(registry_error)?;
            let key = segment.order_key();
            if last_key.is_some_and(|last| key < last) {
                self.report.out_of_order.insert(batch.serial.clone());
            }
            last_key = Some(key);
            self.catalog.record(
                &batch.serial,
                placement.shard,
                &path,
                segment.start,
                segment.stop(),
            )?;
            self.report.traces += 1;
        }
        if self.report.out_of_order.contains(&batch.serial) {
            tracing::warn!(serial = %batch.serial, "trace rows appended out of order");
        }
        self.report.batches += 1;
        self.report.shards.insert(placement.shard);
        tracing::info!(
            serial = %batch.serial,
            shard = %placement.shard,
            traces = batch.traces.len(),
            "ingested batch"
        );
        Ok(Some(placement))
    }

    /// Flushes the catalog and reconciles links, ending the session.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Catalog`] when the flush or re-read fails.
    pub fn finish(mut self) -> Result<IngestReport, IngestError> {
        if self.catalog.is_empty() {
            tracing::info!("nothing ingested, catalog untouched");
            return Ok(self.report);
        }
        let master = self.experiment.master_mut();
        self.report.catalog_entries = self.catalog.flush(master, self.clock)?;
        let entries = read_all(master)?;
        self.report.links = reconcile(master, &entries);
        Ok(self.report)
    }
}
