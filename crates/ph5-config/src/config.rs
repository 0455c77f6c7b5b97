// crates/ph5-config/src/config.rs
// ============================================================================
// Module: PH5 Configuration
// Description: `ph5.toml` model, file resolution and validation.
// Purpose: Give every tool the same experiment, placement and store settings.
// Dependencies: ph5-core, ph5-store-sqlite, serde, thiserror, toml
// ============================================================================

//! ## Overview
//! The config file is resolved from an explicit path, then the
//! [`CONFIG_ENV_VAR`] environment variable, then `./ph5.toml`. An explicit or
//! environment path must exist; a missing default file yields built-in
//! defaults. Every section has defaults, unknown keys are rejected and the
//! loaded config is validated before use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use ph5_core::PlacementPolicy;
use ph5_core::ShardName;
use ph5_core::core::identifiers::MAX_SHARD_NUMBER;
use ph5_core::runtime::experiment::master_file_name;
use ph5_core::runtime::shard::DEFAULT_MAX_SHARD_BYTES;
use ph5_store_sqlite::SqliteStoreConfig;
use ph5_store_sqlite::SqliteStoreMode;
use ph5_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "PH5_CONFIG";
/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_NAME: &str = "ph5.toml";
/// Maximum config file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;
/// Maximum total config path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum length of one config path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default zstd level.
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
/// Highest zstd level accepted.
const MAX_COMPRESSION_LEVEL: i32 = 21;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Config loading and validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// Config file is not valid TOML for the model.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Config values are out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// `[experiment]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Experiment directory.
    pub path: PathBuf,
    /// Master file nickname; the CLI requires one from somewhere.
    pub nickname: Option<String>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            nickname: None,
        }
    }
}

/// `[placement]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlacementConfig {
    /// Soft maximum shard size in bytes.
    pub max_shard_bytes: u64,
    /// Fixed shard count for round-robin placement.
    pub shard_count: Option<u32>,
    /// Number of the first shard.
    pub first_shard: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            max_shard_bytes: DEFAULT_MAX_SHARD_BYTES,
            shard_count: None,
            first_shard: 1,
        }
    }
}

impl PlacementConfig {
    /// Returns the placement policy these settings describe.
    #[must_use]
    pub const fn policy(&self) -> PlacementPolicy {
        PlacementPolicy {
            max_shard_bytes: self.max_shard_bytes,
            shard_count: self.shard_count,
            first_shard: self.first_shard,
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// `SQLite` journal mode.
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    pub sync_mode: SqliteSyncMode,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// zstd level for sample arrays.
    pub compression_level: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// `[backup]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupConfig {
    /// Backup directory; defaults to the experiment directory.
    pub dir: Option<PathBuf>,
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Progress messages.
    #[default]
    Info,
    /// Per-item detail.
    Debug,
    /// Everything.
    Trace,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Returns the level `steps` notches more verbose, saturating at trace.
    #[must_use]
    pub const fn raised(self, steps: u8) -> Self {
        let mut level = self;
        let mut remaining = steps;
        while remaining > 0 {
            level = match level {
                Self::Error => Self::Warn,
                Self::Warn => Self::Info,
                Self::Info => Self::Debug,
                Self::Debug | Self::Trace => Self::Trace,
            };
            remaining -= 1;
        }
        level
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default log level.
    pub level: LogLevel,
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Full `ph5.toml` contents.
///
/// # Invariants
/// - A value returned by [`Ph5Config::load`] or [`Ph5Config::from_toml_str`]
///   has passed [`Ph5Config::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Ph5Config {
    /// Experiment location.
    pub experiment: ExperimentConfig,
    /// Shard placement.
    pub placement: PlacementConfig,
    /// Container store tuning.
    pub store: StoreConfig,
    /// Backup location.
    pub backup: BackupConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

impl Ph5Config {
    /// Loads the config from `path`, the environment or the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the resolved file is missing (explicit or
    /// environment path), too large, not UTF-8, malformed or invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_config_path(path, env::var_os(CONFIG_ENV_VAR))?;
        match resolved {
            ConfigSource::File(path) => Self::from_file(&path),
            ConfigSource::Defaults => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Loads and validates one config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file fails any load guard or
    /// validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        validate_config_path(path)?;
        let metadata = fs::metadata(path)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let bytes =
            fs::read(path).map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates config text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every section's ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("experiment.path must not be empty".to_string()));
        }
        if let Some(nickname) = &self.experiment.nickname {
            master_file_name(nickname)
                .map_err(|err| ConfigError::Invalid(format!("experiment.nickname: {err}")))?;
        }
        let placement = &self.placement;
        if placement.max_shard_bytes == 0 {
            return Err(ConfigError::Invalid(
                "placement.max_shard_bytes must be greater than zero".to_string(),
            ));
        }
        if placement.first_shard == 0 || ShardName::new(placement.first_shard).is_none() {
            return Err(ConfigError::Invalid(format!(
                "placement.first_shard out of range: {} (1..={MAX_SHARD_NUMBER})",
                placement.first_shard
            )));
        }
        if let Some(count) = placement.shard_count {
            let last = placement.first_shard.checked_add(count.saturating_sub(1));
            if count == 0 {
                return Err(ConfigError::Invalid(
                    "placement.shard_count must be greater than zero".to_string(),
                ));
            }
            if last.and_then(ShardName::new).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "placement.shard_count {count} overruns shard {MAX_SHARD_NUMBER}"
                )));
            }
        }
        if !(1 ..= MAX_COMPRESSION_LEVEL).contains(&self.store.compression_level) {
            return Err(ConfigError::Invalid(format!(
                "store.compression_level out of range: {} (1..={MAX_COMPRESSION_LEVEL})",
                self.store.compression_level
            )));
        }
        if self.backup.dir.as_ref().is_some_and(|dir| dir.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid("backup.dir must not be empty".to_string()));
        }
        Ok(())
    }

    /// Returns the store settings for the experiment directory.
    #[must_use]
    pub fn sqlite_config(&self) -> SqliteStoreConfig {
        SqliteStoreConfig {
            root: self.experiment.path.clone(),
            busy_timeout_ms: self.store.busy_timeout_ms,
            journal_mode: self.store.journal_mode,
            sync_mode: self.store.sync_mode,
            compression_level: self.store.compression_level,
        }
    }

    /// Returns the backup directory, defaulting to the experiment directory.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.backup.dir.clone().unwrap_or_else(|| self.experiment.path.clone())
    }
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Where the config comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigSource {
    /// A file that must be read.
    File(PathBuf),
    /// No file; built-in defaults.
    Defaults,
}

/// Resolves the config file from the explicit path, then `env_value`, then
/// the default file name in the working directory.
fn resolve_config_path(
    explicit: Option<&Path>,
    env_value: Option<OsString>,
) -> Result<ConfigSource, ConfigError> {
    if let Some(path) = explicit {
        return Ok(ConfigSource::File(path.to_path_buf()));
    }
    if let Some(value) = env_value {
        let value = value.into_string().map_err(|_| {
            ConfigError::Invalid(format!("{CONFIG_ENV_VAR} must be valid utf-8"))
        })?;
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{CONFIG_ENV_VAR} must not be empty")));
        }
        return Ok(ConfigSource::File(PathBuf::from(value)));
    }
    let fallback = PathBuf::from(DEFAULT_CONFIG_NAME);
    if fallback.is_file() {
        Ok(ConfigSource::File(fallback))
    } else {
        Ok(ConfigSource::Defaults)
    }
}

/// Enforces path length limits before touching the filesystem.
fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    if path.components().any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH)
    {
        return Err(ConfigError::Invalid("config path component too long".to_string()));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
