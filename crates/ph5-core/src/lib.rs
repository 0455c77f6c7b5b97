// crates/ph5-core/src/lib.rs
// ============================================================================
// Module: PH5 Core Library
// Description: Public API surface for the PH5 sharded storage layer.
// Purpose: Expose core types, container interfaces and runtime jobs.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! PH5 core keeps a seismic experiment split across a master file and any
//! number of shard files consistent. It places instruments into shards,
//! maintains the catalog mapping serials to shard locations, reconciles the
//! master's cross-file links, audits deployments against the catalog and
//! shard contents, and repairs corrupt tables behind kef backups. Storage
//! is reached only through the [`Container`] and [`ContainerStore`] traits.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::AccessMode;
pub use interfaces::Container;
pub use interfaces::ContainerStore;
pub use interfaces::LinkTarget;
pub use interfaces::NodeKind;
pub use interfaces::StoreError;
pub use runtime::AuditError;
pub use runtime::AuditInput;
pub use runtime::AuditOutcome;
pub use runtime::AuditRepair;
pub use runtime::BackupError;
pub use runtime::BackupStore;
pub use runtime::Catalog;
pub use runtime::CatalogError;
pub use runtime::CatalogView;
pub use runtime::DeploymentRegistry;
pub use runtime::Experiment;
pub use runtime::ExperimentError;
pub use runtime::Finding;
pub use runtime::InMemoryContainer;
pub use runtime::InMemoryContainerStore;
pub use runtime::IngestError;
pub use runtime::IngestReport;
pub use runtime::IngestSession;
pub use runtime::LinkReport;
pub use runtime::OrderTarget;
pub use runtime::Placement;
pub use runtime::PlacementPolicy;
pub use runtime::RegistryError;
pub use runtime::RepairContext;
pub use runtime::RepairError;
pub use runtime::RepairReport;
pub use runtime::ShardContents;
pub use runtime::ShardError;
pub use runtime::ShardHandles;
pub use runtime::ShardManager;
pub use runtime::SrmTarget;
pub use runtime::TraceBatch;
pub use runtime::TraceRecord;
