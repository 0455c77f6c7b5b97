// crates/ph5-store-sqlite/src/lib.rs
// ============================================================================
// Module: PH5 SQLite Store Library
// Description: SQLite-backed container files for PH5 experiments.
// Purpose: Expose the durable container store used by the CLI.
// Dependencies: ph5-core, rusqlite, serde, serde_json, thiserror, zstd
// ============================================================================

//! ## Overview
//! Durable [`ph5_core::ContainerStore`] implementation. Every container file
//! of an experiment directory (master and shards) is one `SQLite` database
//! holding the node hierarchy, table rows as JSON and zstd-compressed sample
//! arrays.

pub mod store;

pub use store::MAX_FILE_NAME_LENGTH;
pub use store::SqliteContainer;
pub use store::SqliteContainerStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
