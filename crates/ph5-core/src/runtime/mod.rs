// crates/ph5-core/src/runtime/mod.rs
// ============================================================================
// Module: PH5 Runtime
// Description: Catalog, placement, ingestion, links, audit and repairs.
// Purpose: Run the batch jobs of the sharded storage layer over a container store.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules implement the jobs run against one experiment: ingestion
//! (placement, trace writes, catalog flush), link reconciliation, the audit
//! pipeline and the table repairs. Every destructive step goes through
//! [`rewrite::rewrite_table`] so a backup always precedes a removal.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod audit;
pub mod backup;
pub mod catalog;
pub mod experiment;
pub mod handles;
pub mod ingest;
pub mod links;
pub mod memory;
pub mod registry;
pub mod repair;
pub mod rewrite;
pub mod shard;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditError;
pub use audit::AuditInput;
pub use audit::AuditOutcome;
pub use audit::AuditRepair;
pub use audit::Finding;
pub use audit::ShardContents;
pub use backup::BackupError;
pub use backup::BackupStore;
pub use catalog::Catalog;
pub use catalog::CatalogError;
pub use catalog::CatalogView;
pub use experiment::Experiment;
pub use experiment::ExperimentError;
pub use handles::ShardHandles;
pub use ingest::IngestError;
pub use ingest::IngestReport;
pub use ingest::IngestSession;
pub use ingest::TraceBatch;
pub use ingest::TraceRecord;
pub use links::LinkReport;
pub use memory::InMemoryContainer;
pub use memory::InMemoryContainerStore;
pub use registry::DeploymentRegistry;
pub use registry::RegistryError;
pub use repair::OrderTarget;
pub use repair::RepairReport;
pub use repair::SrmTarget;
pub use rewrite::RepairContext;
pub use rewrite::RepairError;
pub use shard::Placement;
pub use shard::PlacementPolicy;
pub use shard::ShardError;
pub use shard::ShardManager;
