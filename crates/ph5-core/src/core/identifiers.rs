// crates/ph5-core/src/core/identifiers.rs
// ============================================================================
// Module: PH5 Identifiers
// Description: Instrument serials, shard file names, and internal node paths.
// Purpose: Provide strongly typed names with the on-disk string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers in this module mirror the naming conventions of existing PH5
//! archives. Shard names follow `miniPH5_NNNNN.ph5` and are stored in the
//! catalog with a leading `./`; node paths are absolute `/`-separated paths
//! inside one container file.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Hierarchy Constants
// ============================================================================

/// Root experiment group.
pub const EXPERIMENT_GROUP: &str = "/Experiment_g";
/// Group holding per-instrument groups and the catalog.
pub const RECEIVERS_GROUP: &str = "/Experiment_g/Receivers_g";
/// Group holding deployment tables.
pub const SORTS_GROUP: &str = "/Experiment_g/Sorts_g";
/// Catalog table in the master file.
pub const CATALOG_TABLE: &str = "/Experiment_g/Receivers_g/Index_t";
/// Prefix of per-instrument group names.
pub const INSTRUMENT_GROUP_PREFIX: &str = "Das_g_";
/// Prefix of deployment table names.
pub const DEPLOYMENT_TABLE_PREFIX: &str = "Array_t_";
/// Name of the trace table inside an instrument group.
pub const TRACE_TABLE_NAME: &str = "Das_t";
/// Prefix of raw sample array names.
pub const DATA_ARRAY_PREFIX: &str = "Data_a_";

/// Shard file name prefix.
const SHARD_PREFIX: &str = "miniPH5_";
/// Shard file name suffix.
const SHARD_SUFFIX: &str = ".ph5";
/// Largest shard number representable in five digits.
pub const MAX_SHARD_NUMBER: u32 = 99_999;

// ============================================================================
// SECTION: Instrument Serial
// ============================================================================

/// Data acquisition system (instrument) serial number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DasSerial(String);

impl DasSerial {
    /// Creates a serial from its string form. Surrounding whitespace is
    /// dropped because fixed-width string columns pad values.
    #[must_use]
    pub fn new(serial: impl Into<String>) -> Self {
        let serial = serial.into();
        let trimmed = serial.trim();
        if trimmed.len() == serial.len() { Self(serial) } else { Self(trimmed.to_string()) }
    }

    /// Returns the serial as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the name of this instrument's group (`Das_g_<serial>`).
    #[must_use]
    pub fn group_name(&self) -> String {
        format!("{INSTRUMENT_GROUP_PREFIX}{}", self.0)
    }

    /// Returns the absolute path of this instrument's group.
    #[must_use]
    pub fn group_path(&self) -> NodePath {
        NodePath::from_parent(RECEIVERS_GROUP, &self.group_name())
    }

    /// Returns the absolute path of this instrument's trace table.
    #[must_use]
    pub fn trace_table_path(&self) -> NodePath {
        self.group_path().child(TRACE_TABLE_NAME)
    }

    /// Returns the backup label used for this instrument's trace table.
    #[must_use]
    pub fn trace_table_label(&self) -> String {
        format!("Das_t_{}", self.0)
    }

    /// Parses a serial from an instrument group name.
    #[must_use]
    pub fn from_group_name(name: &str) -> Option<Self> {
        name.strip_prefix(INSTRUMENT_GROUP_PREFIX)
            .filter(|serial| !serial.is_empty())
            .map(Self::new)
    }
}

impl fmt::Display for DasSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DasSerial {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DasSerial {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Shard Name
// ============================================================================

/// Shard file name of the form `miniPH5_NNNNN.ph5`.
///
/// # Invariants
/// - `number` is at most [`MAX_SHARD_NUMBER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShardName {
    /// Monotonic shard number.
    number: u32,
}

impl ShardName {
    /// Creates a shard name from its number.
    ///
    /// Returns `None` when the number does not fit in five digits.
    #[must_use]
    pub const fn new(number: u32) -> Option<Self> {
        if number > MAX_SHARD_NUMBER {
            return None;
        }
        Some(Self {
            number,
        })
    }

    /// Returns the shard number.
    #[must_use]
    pub const fn number(self) -> u32 {
        self.number
    }

    /// Returns the next shard name, if it fits in five digits.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        Self::new(self.number + 1)
    }

    /// Returns the bare file name (`miniPH5_00007.ph5`).
    #[must_use]
    pub fn file_name(self) -> String {
        format!("{SHARD_PREFIX}{:05}{SHARD_SUFFIX}", self.number)
    }

    /// Returns the catalog form of the file name (`./miniPH5_00007.ph5`).
    #[must_use]
    pub fn catalog_name(self) -> String {
        format!("./{}", self.file_name())
    }

    /// Parses a shard name from a bare or `./`-prefixed file name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let bare = value.strip_prefix("./").unwrap_or(value);
        let digits = bare.strip_prefix(SHARD_PREFIX)?.strip_suffix(SHARD_SUFFIX)?;
        if digits.len() != 5 || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        digits.parse::<u32>().ok().and_then(Self::new)
    }
}

impl fmt::Display for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

impl TryFrom<String> for ShardName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid shard file name: {value}"))
    }
}

impl From<ShardName> for String {
    fn from(value: ShardName) -> Self {
        value.file_name()
    }
}

// ============================================================================
// SECTION: Node Path
// ============================================================================

/// Absolute path of a node inside one container file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(String);

impl NodePath {
    /// Creates a node path, normalizing it to a single leading `/` and no
    /// trailing `/`.
    #[must_use]
    pub fn new(path: impl AsRef<str>) -> Self {
        let segments: Vec<&str> =
            path.as_ref().split('/').filter(|segment| !segment.trim().is_empty()).collect();
        Self(format!("/{}", segments.join("/")))
    }

    /// Creates a path from a parent path and a child name.
    #[must_use]
    pub fn from_parent(parent: &str, name: &str) -> Self {
        Self::new(format!("{parent}/{name}"))
    }

    /// Returns the root path.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Returns the path segments without the empty root segment.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Returns the final path segment, or `None` for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// Returns the parent path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let index = self.0.rfind('/')?;
        if index == 0 { Some(Self::root()) } else { Some(Self(self.0[.. index].to_string())) }
    }

    /// Returns a child path.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        Self::from_parent(&self.0, name)
    }

    /// Returns every ancestor path from the first segment down to the parent.
    #[must_use]
    pub fn ancestors(&self) -> Vec<Self> {
        let segments: Vec<&str> = self.segments().collect();
        let mut ancestors = Vec::with_capacity(segments.len().saturating_sub(1));
        for depth in 1 .. segments.len() {
            ancestors.push(Self::new(segments[.. depth].join("/")));
        }
        ancestors
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for NodePath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Deployment Table Names
// ============================================================================

/// Returns the deployment table name for a sub-array number (`Array_t_001`).
#[must_use]
pub fn deployment_table_name(array: u32) -> String {
    format!("{DEPLOYMENT_TABLE_PREFIX}{array:03}")
}

/// Parses a sub-array number from a deployment table name.
#[must_use]
pub fn parse_deployment_table_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(DEPLOYMENT_TABLE_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Returns the data array name for a trace ordinal (`Data_a_0001`).
#[must_use]
pub fn data_array_name(ordinal: u32) -> String {
    format!("{DATA_ARRAY_PREFIX}{ordinal:04}")
}

// ============================================================================
// SECTION: Tests
// ============================================================================
