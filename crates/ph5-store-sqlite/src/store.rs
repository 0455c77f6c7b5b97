// crates/ph5-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Container Store
// Description: Durable ContainerStore with one SQLite database per file.
// Purpose: Persist groups, tables, sample arrays and soft links on disk.
// Dependencies: ph5-core, rusqlite, serde, serde_json, thiserror, tracing, zstd
// ============================================================================

//! ## Overview
//! This module implements a durable [`ContainerStore`] over a directory of
//! `SQLite` databases. Each container file (the experiment master or a
//! `miniPH5_xxxxx.ph5` shard) is one database with a `nodes` table holding
//! the hierarchy and a `rows` table holding table rows as JSON in stored
//! order. Sample arrays are zstd-compressed little-endian `i32` blobs.
//! Handles opened [`AccessMode::ReadOnly`] use a read-only connection and
//! reject every write before it reaches the engine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use ph5_core::AccessMode;
use ph5_core::Column;
use ph5_core::Container;
use ph5_core::ContainerStore;
use ph5_core::LinkTarget;
use ph5_core::NodeKind;
use ph5_core::NodePath;
use ph5_core::Row;
use ph5_core::StoreError;
use ph5_core::TableData;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for container files.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default zstd level for sample arrays.
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
/// Highest zstd level accepted.
const MAX_COMPRESSION_LEVEL: i32 = 21;
/// Maximum length of a container file name.
pub const MAX_FILE_NAME_LENGTH: usize = 255;
/// Bytes per stored sample.
const SAMPLE_BYTES: usize = 4;
/// `SQLite` sidecar suffixes that are never container files.
const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (single file on disk between batches).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` container store.
///
/// # Invariants
/// - `root` is the experiment directory, never a regular file.
/// - `compression_level` lies in `1..=21`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteStoreConfig {
    /// Experiment directory holding the container files.
    pub root: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// zstd level for sample arrays.
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

impl SqliteStoreConfig {
    /// Returns a config with defaults for everything but the directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default zstd level.
const fn default_compression_level() -> i32 {
    DEFAULT_COMPRESSION_LEVEL
}

/// Validates the store configuration.
fn validate_config(config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    if config.root.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store root must not be empty".to_string()));
    }
    if config.root.is_file() {
        return Err(SqliteStoreError::Invalid(
            "store root must be a directory, not a file".to_string(),
        ));
    }
    if !(1 ..= MAX_COMPRESSION_LEVEL).contains(&config.compression_level) {
        return Err(SqliteStoreError::Invalid(format!(
            "compression_level out of range: {} (1..={MAX_COMPRESSION_LEVEL})",
            config.compression_level
        )));
    }
    Ok(())
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding sample or row payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored data failed to decode.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid request or configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// File or node does not exist.
    #[error("sqlite store not found: {0}")]
    NotFound(String),
    /// File or node already exists.
    #[error("sqlite store already exists: {0}")]
    AlreadyExists(String),
    /// Write through a read-only handle.
    #[error("sqlite store read-only: {0}")]
    ReadOnly(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => {
                Self::Corrupt(format!("schema version mismatch: {message}"))
            }
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
            SqliteStoreError::AlreadyExists(message) => Self::AlreadyExists(message),
            SqliteStoreError::ReadOnly(message) => Self::ReadOnly(message),
        }
    }
}

/// Maps an engine error.
#[allow(clippy::needless_pass_by_value, reason = "Used as a map_err callback.")]
fn db(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Directory of `SQLite` container files for one experiment.
#[derive(Debug, Clone)]
pub struct SqliteContainerStore {
    /// Store configuration.
    config: SqliteStoreConfig,
}

impl SqliteContainerStore {
    /// Opens the store, creating the experiment directory when missing.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the config is invalid or the
    /// directory cannot be created.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_config(&config)?;
        fs::create_dir_all(&config.root)
            .map_err(|err| SqliteStoreError::Io(format!("{}: {err}", config.root.display())))?;
        Ok(Self {
            config,
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Resolves a container file name inside the experiment directory.
    fn file_path(&self, file: &str) -> Result<PathBuf, SqliteStoreError> {
        validate_file_name(file)?;
        Ok(self.config.root.join(file))
    }

    /// Opens a connection on `path` and wraps it in a handle.
    fn handle(
        &self,
        file: &str,
        path: PathBuf,
        mode: AccessMode,
        create: bool,
    ) -> Result<SqliteContainer, SqliteStoreError> {
        let mut connection = open_connection(&path, &self.config, mode, create)?;
        if mode.is_writable() {
            initialize_schema(&mut connection)?;
        } else {
            verify_schema(&connection)?;
        }
        Ok(SqliteContainer {
            file: file.to_string(),
            path,
            mode,
            connection,
            compression_level: self.config.compression_level,
        })
    }
}

impl ContainerStore for SqliteContainerStore {
    type Handle = SqliteContainer;

    fn open(&self, file: &str, mode: AccessMode) -> Result<Self::Handle, StoreError> {
        let path = self.file_path(file)?;
        if !path.is_file() {
            return Err(StoreError::NotFound(file.to_string()));
        }
        let handle = self.handle(file, path, mode, false)?;
        tracing::debug!(file = %file, writable = mode.is_writable(), "opened sqlite container");
        Ok(handle)
    }

    fn create(&self, file: &str) -> Result<Self::Handle, StoreError> {
        let path = self.file_path(file)?;
        if path.exists() {
            return Err(StoreError::AlreadyExists(file.to_string()));
        }
        let handle = self.handle(file, path, AccessMode::ReadWrite, true)?;
        insert_node(&handle.connection, &NodePath::root(), &NewNode::group())?;
        tracing::debug!(file = %file, "created sqlite container");
        Ok(handle)
    }

    fn exists(&self, file: &str) -> Result<bool, StoreError> {
        Ok(self.file_path(file)?.is_file())
    }

    fn list_files(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.config.root)
            .map_err(|err| StoreError::Io(format!("{}: {err}", self.config.root.display())))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| StoreError::Io(err.to_string()))?;
            if !entry.path().is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if SIDECAR_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
                continue;
            }
            files.push(name);
        }
        files.sort();
        Ok(files)
    }

    fn file_size(&self, file: &str) -> Result<u64, StoreError> {
        let path = self.file_path(file)?;
        if !path.is_file() {
            return Err(StoreError::NotFound(file.to_string()));
        }
        Ok(disk_size(&path)?)
    }
}

// ============================================================================
// SECTION: Connections
// ============================================================================

/// Rejects file names that could escape the experiment directory.
fn validate_file_name(file: &str) -> Result<(), SqliteStoreError> {
    if file.is_empty() || file == "." || file == ".." {
        return Err(SqliteStoreError::Invalid(format!("invalid container file name: '{file}'")));
    }
    if file.contains(['/', '\\', '\0']) {
        return Err(SqliteStoreError::Invalid(format!(
            "container file name contains a path separator: {file}"
        )));
    }
    if file.len() > MAX_FILE_NAME_LENGTH {
        return Err(SqliteStoreError::Invalid(
            "container file name exceeds length limit".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection in the handle's access mode.
fn open_connection(
    path: &Path,
    config: &SqliteStoreConfig,
    mode: AccessMode,
    create: bool,
) -> Result<Connection, SqliteStoreError> {
    let mut flags = if mode.is_writable() {
        OpenFlags::SQLITE_OPEN_READ_WRITE
    } else {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    };
    if create {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    flags |= OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(path, flags).map_err(db)?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(db)?;
    if mode.is_writable() {
        apply_pragmas(&connection, config)?;
    }
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db)?;
    Ok(())
}

/// Creates the container schema, or checks the version of an existing one.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(db)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS nodes (
                    path TEXT PRIMARY KEY,
                    parent TEXT,
                    name TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    columns_json TEXT,
                    link_file TEXT,
                    link_path TEXT,
                    array_blob BLOB,
                    array_len INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes (parent, name);
                CREATE TABLE IF NOT EXISTS rows (
                    path TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    row_json TEXT NOT NULL,
                    PRIMARY KEY (path, seq)
                );",
            )
            .map_err(db)?;
        }
        Some(SCHEMA_VERSION) => {}
        Some(other) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "expected {SCHEMA_VERSION}, found {other}"
            )));
        }
    }
    tx.commit().map_err(db)?;
    Ok(())
}

/// Checks the schema version through a read-only connection.
fn verify_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    let version: Option<i64> = connection
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db)?;
    match version {
        Some(SCHEMA_VERSION) => Ok(()),
        Some(other) => Err(SqliteStoreError::VersionMismatch(format!(
            "expected {SCHEMA_VERSION}, found {other}"
        ))),
        None => Err(SqliteStoreError::Corrupt("store_meta has no version row".to_string())),
    }
}

/// Size of a database on disk, including an un-checkpointed WAL.
fn disk_size(path: &Path) -> Result<u64, SqliteStoreError> {
    let main = fs::metadata(path)
        .map_err(|err| SqliteStoreError::Io(format!("{}: {err}", path.display())))?
        .len();
    let mut wal: OsString = path.as_os_str().to_owned();
    wal.push("-wal");
    let wal = fs::metadata(PathBuf::from(wal)).map(|meta| meta.len()).unwrap_or(0);
    Ok(main + wal)
}

// ============================================================================
// SECTION: Node Helpers
// ============================================================================

/// Column values of a node about to be inserted.
struct NewNode<'a> {
    /// Node kind.
    kind: NodeKind,
    /// Declared table columns as JSON.
    columns: Option<String>,
    /// Link target.
    link: Option<&'a LinkTarget>,
    /// Compressed samples and their count.
    array: Option<(Vec<u8>, i64)>,
}

impl NewNode<'_> {
    /// A plain group.
    const fn group() -> Self {
        Self {
            kind: NodeKind::Group,
            columns: None,
            link: None,
            array: None,
        }
    }
}

/// Returns the kind of the node at `path`.
fn node_kind(connection: &Connection, path: &NodePath) -> Result<Option<NodeKind>, SqliteStoreError> {
    let label: Option<String> = connection
        .query_row("SELECT kind FROM nodes WHERE path = ?1", params![path.as_str()], |row| {
            row.get(0)
        })
        .optional()
        .map_err(db)?;
    label
        .map(|label| {
            NodeKind::parse(&label)
                .ok_or_else(|| SqliteStoreError::Corrupt(format!("{path}: unknown kind {label}")))
        })
        .transpose()
}

/// Requires a node of `expected` kind at `path`.
fn require_kind(
    connection: &Connection,
    path: &NodePath,
    expected: NodeKind,
) -> Result<(), SqliteStoreError> {
    match node_kind(connection, path)? {
        Some(kind) if kind == expected => Ok(()),
        Some(_) => Err(SqliteStoreError::Invalid(format!("{path} is not a {}", expected.as_str()))),
        None => Err(SqliteStoreError::NotFound(path.to_string())),
    }
}

/// Inserts one node row without touching its parents.
fn insert_node(
    connection: &Connection,
    path: &NodePath,
    node: &NewNode<'_>,
) -> Result<(), SqliteStoreError> {
    let parent = path.parent();
    let (array_blob, array_len) = match &node.array {
        Some((blob, len)) => (Some(blob.as_slice()), Some(*len)),
        None => (None, None),
    };
    connection
        .execute(
            "INSERT INTO nodes (path, parent, name, kind, columns_json, link_file, link_path, \
             array_blob, array_len) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                path.as_str(),
                parent.as_ref().map(NodePath::as_str),
                path.name().unwrap_or_default(),
                node.kind.as_str(),
                node.columns,
                node.link.map(|target| target.file.as_str()),
                node.link.map(|target| target.path.as_str()),
                array_blob,
                array_len,
            ],
        )
        .map_err(db)?;
    Ok(())
}

/// Creates `path` and its ancestors as groups.
fn ensure_groups(connection: &Connection, path: &NodePath) -> Result<(), SqliteStoreError> {
    let mut chain = path.ancestors();
    chain.push(path.clone());
    for group in chain {
        match node_kind(connection, &group)? {
            Some(NodeKind::Group) => {}
            Some(_) => return Err(SqliteStoreError::Invalid(format!("{group} is not a group"))),
            None => insert_node(connection, &group, &NewNode::group())?,
        }
    }
    Ok(())
}

/// Inserts a leaf node after creating its parent groups.
fn insert_leaf(
    connection: &Connection,
    path: &NodePath,
    node: &NewNode<'_>,
) -> Result<(), SqliteStoreError> {
    if path.is_root() {
        return Err(SqliteStoreError::Invalid("cannot replace root".to_string()));
    }
    if node_kind(connection, path)?.is_some() {
        return Err(SqliteStoreError::AlreadyExists(path.to_string()));
    }
    if let Some(parent) = path.parent() {
        ensure_groups(connection, &parent)?;
    }
    insert_node(connection, path, node)
}

/// Packs samples as zstd-compressed little-endian words.
fn compress_samples(samples: &[i32], level: i32) -> Result<(Vec<u8>, i64), SqliteStoreError> {
    let bytes: Vec<u8> = samples.iter().flat_map(|sample| sample.to_le_bytes()).collect();
    let blob = zstd::bulk::compress(&bytes, level)
        .map_err(|err| SqliteStoreError::Io(format!("zstd compress: {err}")))?;
    let count = i64::try_from(samples.len())
        .map_err(|_| SqliteStoreError::Invalid("sample array too large".to_string()))?;
    Ok((blob, count))
}

/// Unpacks a compressed sample blob holding `count` samples.
fn decompress_samples(
    path: &NodePath,
    blob: &[u8],
    count: i64,
) -> Result<Vec<i32>, SqliteStoreError> {
    let count = usize::try_from(count)
        .map_err(|_| SqliteStoreError::Corrupt(format!("{path}: negative sample count")))?;
    let bytes = zstd::bulk::decompress(blob, count * SAMPLE_BYTES)
        .map_err(|err| SqliteStoreError::Corrupt(format!("{path}: zstd decompress: {err}")))?;
    if bytes.len() != count * SAMPLE_BYTES {
        return Err(SqliteStoreError::Corrupt(format!(
            "{path}: expected {count} samples, found {} bytes",
            bytes.len()
        )));
    }
    bytes
        .chunks_exact(SAMPLE_BYTES)
        .map(|chunk| {
            <[u8; SAMPLE_BYTES]>::try_from(chunk)
                .map(i32::from_le_bytes)
                .map_err(|_| SqliteStoreError::Corrupt(format!("{path}: short sample")))
        })
        .collect()
}

// ============================================================================
// SECTION: Handle
// ============================================================================

/// Open handle on one `SQLite` container file.
#[derive(Debug)]
pub struct SqliteContainer {
    /// File this handle was opened on.
    file: String,
    /// Database path on disk.
    path: PathBuf,
    /// Access mode.
    mode: AccessMode,
    /// Connection, read-only when `mode` is.
    connection: Connection,
    /// zstd level for new arrays.
    compression_level: i32,
}

impl SqliteContainer {
    /// Fails unless the handle was opened read-write.
    fn writable(&self) -> Result<(), SqliteStoreError> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(SqliteStoreError::ReadOnly(self.file.clone()))
        }
    }

    /// Runs `f` inside one write transaction.
    fn write<T>(
        &mut self,
        f: impl FnOnce(&Connection) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        self.writable()?;
        let tx = self.connection.transaction().map_err(db)?;
        let value = f(&tx)?;
        tx.commit().map_err(db)?;
        Ok(value)
    }

    /// Reads the declared columns of a table.
    fn columns(&self, path: &NodePath) -> Result<Vec<Column>, SqliteStoreError> {
        require_kind(&self.connection, path, NodeKind::Table)?;
        let json: Option<String> = self
            .connection
            .query_row(
                "SELECT columns_json FROM nodes WHERE path = ?1",
                params![path.as_str()],
                |row| row.get(0),
            )
            .map_err(db)?;
        let json = json.ok_or_else(|| SqliteStoreError::Corrupt(format!("{path}: no columns")))?;
        serde_json::from_str(&json)
            .map_err(|err| SqliteStoreError::Corrupt(format!("{path}: columns: {err}")))
    }
}

impl Container for SqliteContainer {
    fn file_name(&self) -> &str {
        &self.file
    }

    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn create_group(&mut self, path: &NodePath) -> Result<(), StoreError> {
        Ok(self.write(|tx| ensure_groups(tx, path))?)
    }

    fn node_kind(&self, path: &NodePath) -> Result<Option<NodeKind>, StoreError> {
        Ok(node_kind(&self.connection, path)?)
    }

    fn list_children(&self, group: &NodePath) -> Result<Vec<String>, StoreError> {
        require_kind(&self.connection, group, NodeKind::Group)?;
        let mut statement = self
            .connection
            .prepare("SELECT name FROM nodes WHERE parent = ?1 ORDER BY name")
            .map_err(db)?;
        let names = statement
            .query_map(params![group.as_str()], |row| row.get::<_, String>(0))
            .map_err(db)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db)?;
        Ok(names)
    }

    fn create_table(&mut self, path: &NodePath, columns: &[Column]) -> Result<(), StoreError> {
        let json = serde_json::to_string(columns)
            .map_err(|err| SqliteStoreError::Invalid(format!("{path}: columns: {err}")))?;
        let node = NewNode {
            kind: NodeKind::Table,
            columns: Some(json),
            link: None,
            array: None,
        };
        Ok(self.write(|tx| insert_leaf(tx, path, &node))?)
    }

    fn read_table(&self, path: &NodePath) -> Result<TableData, StoreError> {
        let columns = self.columns(path)?;
        let mut statement = self
            .connection
            .prepare("SELECT row_json FROM rows WHERE path = ?1 ORDER BY seq")
            .map_err(db)?;
        let encoded = statement
            .query_map(params![path.as_str()], |row| row.get::<_, String>(0))
            .map_err(db)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db)?;
        let mut table = TableData::new(columns);
        for json in encoded {
            let row: Row = serde_json::from_str(&json)
                .map_err(|err| SqliteStoreError::Corrupt(format!("{path}: row: {err}")))?;
            table.rows.push(row);
        }
        Ok(table)
    }

    fn append_rows(&mut self, path: &NodePath, rows: &[Row]) -> Result<(), StoreError> {
        self.writable()?;
        let columns = self.columns(path)?;
        let mut encoded = Vec::with_capacity(rows.len());
        for row in rows {
            TableData::check_row(&columns, row)
                .map_err(|err| StoreError::Invalid(format!("{path}: {err}")))?;
            encoded.push(
                serde_json::to_string(row)
                    .map_err(|err| StoreError::Invalid(format!("{path}: row: {err}")))?,
            );
        }
        Ok(self.write(|tx| {
            let next: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(seq), -1) + 1 FROM rows WHERE path = ?1",
                    params![path.as_str()],
                    |row| row.get(0),
                )
                .map_err(db)?;
            let mut statement = tx
                .prepare("INSERT INTO rows (path, seq, row_json) VALUES (?1, ?2, ?3)")
                .map_err(db)?;
            for (seq, json) in (next ..).zip(&encoded) {
                statement.execute(params![path.as_str(), seq, json]).map_err(db)?;
            }
            Ok(())
        })?)
    }

    fn truncate_table(&mut self, path: &NodePath) -> Result<(), StoreError> {
        Ok(self.write(|tx| {
            require_kind(tx, path, NodeKind::Table)?;
            tx.execute("DELETE FROM rows WHERE path = ?1", params![path.as_str()]).map_err(db)?;
            Ok(())
        })?)
    }

    fn remove_node(&mut self, path: &NodePath) -> Result<(), StoreError> {
        Ok(self.write(|tx| {
            if path.is_root() {
                return Err(SqliteStoreError::Invalid("cannot remove root".to_string()));
            }
            if node_kind(tx, path)?.is_none() {
                return Err(SqliteStoreError::NotFound(path.to_string()));
            }
            // Prefix match by substr: `_` is a LIKE wildcard and common in node names.
            let within = "path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/'";
            tx.execute(&format!("DELETE FROM rows WHERE {within}"), params![path.as_str()])
                .map_err(db)?;
            tx.execute(&format!("DELETE FROM nodes WHERE {within}"), params![path.as_str()])
                .map_err(db)?;
            Ok(())
        })?)
    }

    fn create_array(&mut self, path: &NodePath, samples: &[i32]) -> Result<(), StoreError> {
        self.writable()?;
        let node = NewNode {
            kind: NodeKind::Array,
            columns: None,
            link: None,
            array: Some(compress_samples(samples, self.compression_level)?),
        };
        Ok(self.write(|tx| insert_leaf(tx, path, &node))?)
    }

    fn read_array(&self, path: &NodePath) -> Result<Vec<i32>, StoreError> {
        require_kind(&self.connection, path, NodeKind::Array)?;
        let (blob, count): (Option<Vec<u8>>, Option<i64>) = self
            .connection
            .query_row(
                "SELECT array_blob, array_len FROM nodes WHERE path = ?1",
                params![path.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(db)?;
        let (Some(blob), Some(count)) = (blob, count) else {
            return Err(StoreError::Corrupt(format!("{path}: array has no payload")));
        };
        Ok(decompress_samples(path, &blob, count)?)
    }

    fn create_link(
        &mut self,
        parent: &NodePath,
        name: &str,
        target: &LinkTarget,
    ) -> Result<(), StoreError> {
        let path = parent.child(name);
        let node = NewNode {
            kind: NodeKind::Link,
            columns: None,
            link: Some(target),
            array: None,
        };
        Ok(self.write(|tx| insert_leaf(tx, &path, &node))?)
    }

    fn read_link(&self, path: &NodePath) -> Result<LinkTarget, StoreError> {
        let found: Option<(Option<String>, Option<String>)> = self
            .connection
            .query_row(
                "SELECT link_file, link_path FROM nodes WHERE path = ?1 AND kind = ?2",
                params![path.as_str(), NodeKind::Link.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db)?;
        match found {
            Some((Some(file), Some(target))) => Ok(LinkTarget {
                file,
                path: NodePath::new(target),
            }),
            Some(_) => Err(StoreError::Corrupt(format!("{path}: link has no target"))),
            None => Err(StoreError::NotFound(path.to_string())),
        }
    }

    fn list_links(&self, parent: &NodePath) -> Result<Vec<(String, LinkTarget)>, StoreError> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT name, link_file, link_path FROM nodes WHERE parent = ?1 AND kind = ?2 \
                 ORDER BY name",
            )
            .map_err(db)?;
        let rows = statement
            .query_map(params![parent.as_str(), NodeKind::Link.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(db)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db)?;
        rows.into_iter()
            .map(|(name, file, target)| match (file, target) {
                (Some(file), Some(target)) => Ok((name, LinkTarget {
                    file,
                    path: NodePath::new(target),
                })),
                _ => Err(StoreError::Corrupt(format!("{}: link has no target", parent.child(&name)))),
            })
            .collect()
    }

    fn size_bytes(&self) -> Result<u64, StoreError> {
        Ok(disk_size(&self.path)?)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
