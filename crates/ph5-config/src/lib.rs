// crates/ph5-config/src/lib.rs
// ============================================================================
// Module: PH5 Config Library
// Description: Configuration model for the PH5 archive tools.
// Purpose: Load and validate `ph5.toml`.
// Dependencies: ph5-core, ph5-store-sqlite, serde, thiserror, toml
// ============================================================================

//! ## Overview
//! Typed `ph5.toml` model shared by the CLI. Loading is fail-closed: size,
//! path and encoding limits are enforced before parsing and every section
//! is validated after.

pub mod config;

pub use config::BackupConfig;
pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::DEFAULT_CONFIG_NAME;
pub use config::ExperimentConfig;
pub use config::LogLevel;
pub use config::LoggingConfig;
pub use config::MAX_CONFIG_FILE_SIZE;
pub use config::Ph5Config;
pub use config::PlacementConfig;
pub use config::StoreConfig;
