// crates/ph5-core/src/interfaces/mod.rs
// ============================================================================
// Module: PH5 Container Interfaces
// Description: Backend-agnostic container store and open-file contracts.
// Purpose: Define the storage substrate the catalog and repair layers use.
// Dependencies: crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! A [`ContainerStore`] manages the container files of one experiment
//! directory (the master file plus every shard). A [`Container`] is one open
//! file: a hierarchy of groups, fixed-schema tables, compressed sample arrays
//! and soft links to nodes in other files. Implementations must reject
//! writes through a [`AccessMode::ReadOnly`] handle and must report absent
//! nodes as [`StoreError::NotFound`] so callers can tolerate them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::NodePath;
use crate::core::table::Column;
use crate::core::table::Row;
use crate::core::table::TableData;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Container store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("container io error: {0}")]
    Io(String),
    /// File or node does not exist.
    #[error("container node not found: {0}")]
    NotFound(String),
    /// File or node already exists.
    #[error("container node already exists: {0}")]
    AlreadyExists(String),
    /// Request is invalid for the node or schema.
    #[error("container invalid request: {0}")]
    Invalid(String),
    /// Stored data is corrupted or fails integrity checks.
    #[error("container corruption: {0}")]
    Corrupt(String),
    /// Write attempted through a read-only handle.
    #[error("container opened read-only: {0}")]
    ReadOnly(String),
    /// Backend reported an error.
    #[error("container store error: {0}")]
    Store(String),
}

impl StoreError {
    /// Returns `true` for [`StoreError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// ============================================================================
// SECTION: Handles
// ============================================================================

/// Access mode a container file is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

impl AccessMode {
    /// Returns `true` when writes are permitted.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Kind of a node in a container hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Group holding other nodes.
    Group,
    /// Fixed-schema table.
    Table,
    /// Compressed sample array.
    Array,
    /// Soft link into another file.
    Link,
}

impl NodeKind {
    /// Returns the stable label used by stores.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Table => "table",
            Self::Array => "array",
            Self::Link => "link",
        }
    }

    /// Parses a stable label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "group" => Some(Self::Group),
            "table" => Some(Self::Table),
            "array" => Some(Self::Array),
            "link" => Some(Self::Link),
            _ => None,
        }
    }
}

/// Destination of a soft link: a node inside another container file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkTarget {
    /// Target file name.
    pub file: String,
    /// Target node path inside that file.
    pub path: NodePath,
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.path)
    }
}

// ============================================================================
// SECTION: Container
// ============================================================================

/// One open container file.
pub trait Container {
    /// Returns the file name this handle was opened on.
    fn file_name(&self) -> &str;

    /// Returns the mode this handle was opened in.
    fn mode(&self) -> AccessMode;

    /// Creates a group and any missing parents. Existing groups are kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when a non-group node occupies the path.
    fn create_group(&mut self, path: &NodePath) -> Result<(), StoreError>;

    /// Returns the kind of the node at `path`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend cannot be read.
    fn node_kind(&self, path: &NodePath) -> Result<Option<NodeKind>, StoreError>;

    /// Returns `true` when a node exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend cannot be read.
    fn has_node(&self, path: &NodePath) -> Result<bool, StoreError> {
        Ok(self.node_kind(path)?.is_some())
    }

    /// Lists child names of a group in name order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the group is absent.
    fn list_children(&self, group: &NodePath) -> Result<Vec<String>, StoreError>;

    /// Creates an empty table, creating missing parent groups.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when a node occupies the path.
    fn create_table(&mut self, path: &NodePath, columns: &[Column]) -> Result<(), StoreError>;

    /// Reads a table's columns and rows in stored order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the table is absent.
    fn read_table(&self, path: &NodePath) -> Result<TableData, StoreError>;

    /// Appends rows after validating them against the table columns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when a row uses an undeclared column
    /// or a value of the wrong kind; nothing is appended in that case.
    fn append_rows(&mut self, path: &NodePath, rows: &[Row]) -> Result<(), StoreError>;

    /// Removes every row of a table, keeping its columns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the table is absent.
    fn truncate_table(&mut self, path: &NodePath) -> Result<(), StoreError>;

    /// Removes a node and everything below it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when nothing exists at `path`.
    fn remove_node(&mut self, path: &NodePath) -> Result<(), StoreError>;

    /// Creates a compressed sample array, creating missing parent groups.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when a node occupies the path.
    fn create_array(&mut self, path: &NodePath, samples: &[i32]) -> Result<(), StoreError>;

    /// Reads a sample array.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the array is absent.
    fn read_array(&self, path: &NodePath) -> Result<Vec<i32>, StoreError>;

    /// Creates a soft link named `name` under `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when a node occupies the path.
    fn create_link(
        &mut self,
        parent: &NodePath,
        name: &str,
        target: &LinkTarget,
    ) -> Result<(), StoreError>;

    /// Reads a soft link's target.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no link exists at `path`.
    fn read_link(&self, path: &NodePath) -> Result<LinkTarget, StoreError>;

    /// Lists links directly under `parent` as `(name, target)` in name order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend cannot be read.
    fn list_links(&self, parent: &NodePath) -> Result<Vec<(String, LinkTarget)>, StoreError>;

    /// Returns the current size of the file in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the size cannot be determined.
    fn size_bytes(&self) -> Result<u64, StoreError>;
}

// ============================================================================
// SECTION: Container Store
// ============================================================================

/// Container files of one experiment directory.
pub trait ContainerStore {
    /// Open-file handle type.
    type Handle: Container;

    /// Opens an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the file is absent.
    fn open(&self, file: &str, mode: AccessMode) -> Result<Self::Handle, StoreError>;

    /// Creates a new, empty file and opens it read-write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when the file exists.
    fn create(&self, file: &str) -> Result<Self::Handle, StoreError>;

    /// Returns `true` when the file exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the directory cannot be read.
    fn exists(&self, file: &str) -> Result<bool, StoreError>;

    /// Lists file names in name order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the directory cannot be read.
    fn list_files(&self) -> Result<Vec<String>, StoreError>;

    /// Returns a file's size in bytes without opening it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the file is absent.
    fn file_size(&self, file: &str) -> Result<u64, StoreError>;
}
