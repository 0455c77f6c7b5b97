// crates/ph5-core/src/core/mod.rs
// ============================================================================
// Module: PH5 Core Types
// Description: Identifiers, time values, the row model, records and kef.
// Purpose: Provide the typed vocabulary shared by the catalog and repairs.
// Dependencies: serde, thiserror, time
// ============================================================================

//! ## Overview
//! Core types name every node of an experiment (serials, shards, paths),
//! model table rows with suffix-typed columns, decode the four record kinds
//! the storage layer reasons about, and carry the kef text codec used for
//! backups and bulk import.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod identifiers;
pub mod kef;
pub mod records;
pub mod table;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use identifiers::CATALOG_TABLE;
pub use identifiers::DasSerial;
pub use identifiers::NodePath;
pub use identifiers::RECEIVERS_GROUP;
pub use identifiers::SORTS_GROUP;
pub use identifiers::ShardName;
pub use kef::KefError;
pub use kef::KefTable;
pub use records::CatalogEntry;
pub use records::Deployment;
pub use records::Location;
pub use records::TraceSegment;
pub use table::Column;
pub use table::ColumnKind;
pub use table::FieldValue;
pub use table::Row;
pub use table::RowError;
pub use table::TableData;
pub use table::TableRecord;
pub use time::Clock;
pub use time::FixedClock;
pub use time::Ph5Time;
pub use time::SystemClock;
