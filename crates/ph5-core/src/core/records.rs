// crates/ph5-core/src/core/records.rs
// ============================================================================
// Module: PH5 Records
// Description: Catalog, deployment, and trace segment record types.
// Purpose: Map the on-disk PH5 column names onto typed records.
// Dependencies: crate::core::{identifiers, table, time}, serde
// ============================================================================

//! ## Overview
//! Column names in this module are the persisted contract shared with
//! existing PH5 archives and must match byte-for-byte. Records decode
//! tolerantly: optional columns may be absent, and a missing sample rate
//! multiplier is kept as `None` so that repairs can find it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::DasSerial;
use crate::core::identifiers::NodePath;
use crate::core::identifiers::ShardName;
use crate::core::table::Column;
use crate::core::table::FieldValue;
use crate::core::table::Row;
use crate::core::table::RowError;
use crate::core::table::TableRecord;
use crate::core::table::time_columns;
use crate::core::time::MICROS_PER_SECOND;
use crate::core::time::Ph5Time;

// ============================================================================
// SECTION: Column Names
// ============================================================================

/// Shard file name column of the catalog.
pub const COL_EXTERNAL_FILE: &str = "external_file_name_s";
/// Internal path column of the catalog.
pub const COL_HDF5_PATH: &str = "hdf5_path_s";
/// Serial number column of the catalog.
pub const COL_SERIAL: &str = "serial_number_s";
/// Catalog write-time group.
pub const GROUP_TIME_STAMP: &str = "time_stamp";
/// Catalog first-sample group.
pub const GROUP_START_TIME: &str = "start_time";
/// Catalog last-sample group.
pub const GROUP_END_TIME: &str = "end_time";

/// Station id column of a deployment table.
pub const COL_STATION_ID: &str = "id_s";
/// Instrument serial column of a deployment table.
pub const COL_DAS_SERIAL: &str = "das/serial_number_s";
/// Channel column shared by deployment and trace tables.
pub const COL_CHANNEL: &str = "channel_number_i";
/// Deployment start group.
pub const GROUP_DEPLOY_TIME: &str = "deploy_time";
/// Deployment end group.
pub const GROUP_PICKUP_TIME: &str = "pickup_time";
/// Sample rate column shared by deployment and trace tables.
pub const COL_SAMPLE_RATE: &str = "sample_rate_i";
/// Sample rate multiplier column shared by deployment and trace tables.
pub const COL_MULTIPLIER: &str = "sample_rate_multiplier_i";
/// Station longitude/easting column.
pub const COL_LOCATION_X: &str = "location/X/value_d";
/// Station latitude/northing column.
pub const COL_LOCATION_Y: &str = "location/Y/value_d";
/// Station elevation column.
pub const COL_LOCATION_Z: &str = "location/Z/value_d";
/// Free-form description column.
pub const COL_DESCRIPTION: &str = "description_s";

/// Trace start group.
pub const GROUP_TRACE_TIME: &str = "time";
/// Sample count column of a trace table.
pub const COL_SAMPLE_COUNT: &str = "sample_count_i";
/// Original raw file column of a trace table.
pub const COL_RAW_FILE: &str = "raw_file_name_s";
/// Sample array name column of a trace table.
pub const COL_DATA_ARRAY: &str = "array_name_data_a";

/// Builds a column list where time groups expand to their four columns.
fn expand(names: &[&str], time_groups: &[&str]) -> Vec<Column> {
    let mut out = Vec::new();
    for name in names {
        if time_groups.contains(name) {
            out.extend(time_columns(name).into_iter().map(Column::new));
        } else {
            out.push(Column::new(*name));
        }
    }
    out
}

// ============================================================================
// SECTION: Catalog Entry
// ============================================================================

/// One catalog row: where an instrument's data lives and what it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Instrument serial.
    pub serial: DasSerial,
    /// Shard holding the instrument's data.
    pub shard: ShardName,
    /// Internal path of the instrument group inside the shard.
    pub path: NodePath,
    /// First sample time covered by the session.
    pub start: Ph5Time,
    /// Last sample time covered by the session.
    pub stop: Ph5Time,
    /// Time the entry was written.
    pub recorded_at: Ph5Time,
}

impl TableRecord for CatalogEntry {
    fn columns() -> Vec<Column> {
        expand(
            &[
                COL_EXTERNAL_FILE,
                COL_HDF5_PATH,
                COL_SERIAL,
                GROUP_TIME_STAMP,
                GROUP_START_TIME,
                GROUP_END_TIME,
            ],
            &[GROUP_TIME_STAMP, GROUP_START_TIME, GROUP_END_TIME],
        )
    }

    fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.set_text(COL_EXTERNAL_FILE, self.shard.catalog_name());
        row.set_text(COL_HDF5_PATH, self.path.as_str());
        row.set_text(COL_SERIAL, self.serial.as_str());
        row.set_time(GROUP_TIME_STAMP, self.recorded_at);
        row.set_time(GROUP_START_TIME, self.start);
        row.set_time(GROUP_END_TIME, self.stop);
        row
    }

    fn from_row(row: &Row) -> Result<Self, RowError> {
        let file = row.text(COL_EXTERNAL_FILE)?;
        let shard = ShardName::parse(file)
            .ok_or_else(|| RowError::Invalid(format!("shard file name: {file}")))?;
        Ok(Self {
            serial: DasSerial::new(row.text(COL_SERIAL)?),
            shard,
            path: NodePath::new(row.text(COL_HDF5_PATH)?),
            start: row.time(GROUP_START_TIME)?,
            stop: row.time(GROUP_END_TIME)?,
            recorded_at: row.time(GROUP_TIME_STAMP)?,
        })
    }
}

// ============================================================================
// SECTION: Deployment
// ============================================================================

/// Station coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Longitude or easting.
    pub x: f64,
    /// Latitude or northing.
    pub y: f64,
    /// Elevation.
    pub z: f64,
}

/// One station deployment from an `Array_t_NNN` table.
///
/// `array` and `row` locate the source row; they are not columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Sub-array number of the owning table.
    pub array: u32,
    /// Zero-based row position inside the owning table.
    pub row: usize,
    /// Station id.
    pub station: String,
    /// Instrument serial.
    pub serial: DasSerial,
    /// Recording channel.
    pub channel: i64,
    /// Deployment start.
    pub deploy: Ph5Time,
    /// Deployment end.
    pub pickup: Ph5Time,
    /// Nominal sample rate.
    pub sample_rate: i64,
    /// Sample rate multiplier; `None` when the column is absent.
    pub multiplier: Option<i64>,
    /// Station coordinates.
    pub location: Location,
}

impl Deployment {
    /// Returns the deployment table columns in declaration order.
    #[must_use]
    pub fn columns() -> Vec<Column> {
        expand(
            &[
                COL_STATION_ID,
                COL_DAS_SERIAL,
                COL_CHANNEL,
                GROUP_DEPLOY_TIME,
                GROUP_PICKUP_TIME,
                COL_SAMPLE_RATE,
                COL_MULTIPLIER,
                COL_LOCATION_X,
                COL_LOCATION_Y,
                COL_LOCATION_Z,
                COL_DESCRIPTION,
            ],
            &[GROUP_DEPLOY_TIME, GROUP_PICKUP_TIME],
        )
    }

    /// Returns `true` for an empty or inverted deployment window.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.deploy >= self.pickup
    }

    /// Returns `true` when a recording spanning `[start, stop)` overlaps
    /// `[deploy, pickup]`.
    #[must_use]
    pub fn overlaps(&self, start: Ph5Time, stop: Ph5Time) -> bool {
        start <= self.pickup && stop > self.deploy
    }

    /// Encodes the deployment as a row.
    #[must_use]
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.set_text(COL_STATION_ID, self.station.as_str());
        row.set_text(COL_DAS_SERIAL, self.serial.as_str());
        row.set_int(COL_CHANNEL, self.channel);
        row.set_time(GROUP_DEPLOY_TIME, self.deploy);
        row.set_time(GROUP_PICKUP_TIME, self.pickup);
        row.set_int(COL_SAMPLE_RATE, self.sample_rate);
        if let Some(multiplier) = self.multiplier {
            row.set_int(COL_MULTIPLIER, multiplier);
        }
        row.set(COL_LOCATION_X, FieldValue::Float(self.location.x));
        row.set(COL_LOCATION_Y, FieldValue::Float(self.location.y));
        row.set(COL_LOCATION_Z, FieldValue::Float(self.location.z));
        row
    }

    /// Decodes a deployment read from row `row` of table `array`.
    ///
    /// # Errors
    ///
    /// Returns [`RowError`] when a required column is missing or malformed.
    pub fn from_row(array: u32, index: usize, row: &Row) -> Result<Self, RowError> {
        Ok(Self {
            array,
            row: index,
            station: row.text(COL_STATION_ID).map(str::to_string).unwrap_or_default(),
            serial: DasSerial::new(row.text(COL_DAS_SERIAL)?),
            channel: row.int(COL_CHANNEL)?,
            deploy: row.time(GROUP_DEPLOY_TIME)?,
            pickup: row.time(GROUP_PICKUP_TIME)?,
            sample_rate: row.opt_int(COL_SAMPLE_RATE)?.unwrap_or(0),
            multiplier: row.opt_int(COL_MULTIPLIER)?,
            location: Location {
                x: row.opt_float(COL_LOCATION_X)?.unwrap_or(0.0),
                y: row.opt_float(COL_LOCATION_Y)?.unwrap_or(0.0),
                z: row.opt_float(COL_LOCATION_Z)?.unwrap_or(0.0),
            },
        })
    }
}

// ============================================================================
// SECTION: Trace Segment
// ============================================================================

/// One recorded trace inside a shard's `Das_t` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSegment {
    /// Recording channel.
    pub channel: i64,
    /// First sample time.
    pub start: Ph5Time,
    /// Nominal sample rate.
    pub sample_rate: i64,
    /// Sample rate multiplier; `None` when the column is absent.
    pub multiplier: Option<i64>,
    /// Number of samples in the raw array.
    pub sample_count: i64,
    /// Name of the raw sample array in the same instrument group.
    pub array_name: String,
    /// Original raw file name.
    pub raw_file: String,
}

impl TraceSegment {
    /// Returns the effective multiplier, treating absent or zero as one.
    #[must_use]
    pub fn effective_multiplier(&self) -> i64 {
        match self.multiplier {
            Some(value) if value > 0 => value,
            _ => 1,
        }
    }

    /// Returns the time just past the last sample.
    ///
    /// The duration is `sample_count * multiplier / sample_rate` seconds; a
    /// non-positive rate yields a zero-length segment.
    #[must_use]
    pub fn stop(&self) -> Ph5Time {
        if self.sample_rate <= 0 {
            return self.start;
        }
        let scaled = i128::from(self.sample_count)
            * i128::from(self.effective_multiplier())
            * i128::from(MICROS_PER_SECOND);
        let micros = scaled / i128::from(self.sample_rate);
        self.start.add_micros(i64::try_from(micros).unwrap_or(i64::MAX))
    }

    /// Sort key used for range scans: `(channel, epoch, micro_seconds)`.
    #[must_use]
    pub const fn order_key(&self) -> (i64, i64, i32) {
        (self.channel, self.start.epoch, self.start.micro_seconds)
    }
}

impl TableRecord for TraceSegment {
    fn columns() -> Vec<Column> {
        expand(
            &[
                COL_CHANNEL,
                GROUP_TRACE_TIME,
                COL_SAMPLE_RATE,
                COL_MULTIPLIER,
                COL_SAMPLE_COUNT,
                COL_RAW_FILE,
                COL_DATA_ARRAY,
            ],
            &[GROUP_TRACE_TIME],
        )
    }

    fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.set_int(COL_CHANNEL, self.channel);
        row.set_time(GROUP_TRACE_TIME, self.start);
        row.set_int(COL_SAMPLE_RATE, self.sample_rate);
        if let Some(multiplier) = self.multiplier {
            row.set_int(COL_MULTIPLIER, multiplier);
        }
        row.set_int(COL_SAMPLE_COUNT, self.sample_count);
        row.set_text(COL_RAW_FILE, self.raw_file.as_str());
        row.set_text(COL_DATA_ARRAY, self.array_name.as_str());
        row
    }

    fn from_row(row: &Row) -> Result<Self, RowError> {
        Ok(Self {
            channel: row.int(COL_CHANNEL)?,
            start: row.time(GROUP_TRACE_TIME)?,
            sample_rate: row.opt_int(COL_SAMPLE_RATE)?.unwrap_or(0),
            multiplier: row.opt_int(COL_MULTIPLIER)?,
            sample_count: row.opt_int(COL_SAMPLE_COUNT)?.unwrap_or(0),
            array_name: row.text(COL_DATA_ARRAY)?.to_string(),
            raw_file: row.text(COL_RAW_FILE).map(str::to_string).unwrap_or_default(),
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
