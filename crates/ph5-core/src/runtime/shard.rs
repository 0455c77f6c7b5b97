// crates/ph5-core/src/runtime/shard.rs
// ============================================================================
// Module: Shard Manager
// Description: Chooses the shard file that receives an instrument's data.
// Purpose: Deterministic placement with reuse-before-bin-pack semantics.
// Dependencies: crate::{core, interfaces}, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! Placement is a pure function of the serial, the catalog (flushed entries
//! plus the session's pending entries) and the current shard sizes:
//!
//! 1. A serial already in the catalog goes to its recorded shard,
//!    regardless of that shard's size.
//! 2. With no shard yet, the first shard (`first_shard`) is used.
//! 3. With a fixed shard count `N`, new serials advance to the next shard
//!    until `N` exist, then go to the physically smallest shard (ties go to
//!    the lowest number).
//! 4. Otherwise the newest shard is used unless its size plus the estimate
//!    exceeds `max_shard_bytes`, in which case the next shard is created.
//!
//! Existing assignments never migrate. A failure to open or create the
//! chosen shard is returned as an error and must end the ingestion run.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::DasSerial;
use crate::core::identifiers::MAX_SHARD_NUMBER;
use crate::core::identifiers::NodePath;
use crate::core::identifiers::RECEIVERS_GROUP;
use crate::core::identifiers::ShardName;
use crate::interfaces::Container;
use crate::interfaces::ContainerStore;
use crate::interfaces::StoreError;
use crate::runtime::catalog::Catalog;
use crate::runtime::catalog::CatalogError;
use crate::runtime::catalog::CatalogView;
use crate::runtime::handles::ShardHandles;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Default maximum shard size (100 GiB).
pub const DEFAULT_MAX_SHARD_BYTES: u64 = 100 * 1024 * 1024 * 1024;

/// Shard placement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementPolicy {
    /// Soft maximum size of one shard.
    pub max_shard_bytes: u64,
    /// Fixed number of shards for round-robin placement.
    pub shard_count: Option<u32>,
    /// Number of the first shard.
    pub first_shard: u32,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self {
            max_shard_bytes: DEFAULT_MAX_SHARD_BYTES,
            shard_count: None,
            first_shard: 1,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Shard placement errors. All are fatal to an ingestion run.
#[derive(Debug, Error)]
pub enum ShardError {
    /// The chosen shard could not be opened or created.
    #[error("shard {shard} unavailable: {source}")]
    Store {
        /// Shard concerned.
        shard: String,
        /// Store failure.
        source: StoreError,
    },
    /// Catalog state prevents placement.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// The policy is unusable.
    #[error("invalid placement policy: {0}")]
    InvalidPolicy(String),
    /// No further shard number is available.
    #[error("shard numbers exhausted after {0}")]
    Exhausted(String),
}

// ============================================================================
// SECTION: Placement
// ============================================================================

/// Why a shard was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementReason {
    /// Serial already recorded in the flushed catalog.
    Recorded,
    /// Serial already recorded earlier in this session.
    Pending,
    /// No shard existed yet.
    First,
    /// Newest shard still has room.
    Current,
    /// Newest shard would exceed the size limit.
    Overflow,
    /// Round-robin advanced to the next shard.
    RoundRobinNext,
    /// Round-robin wrapped to the smallest shard.
    RoundRobinSmallest,
}

impl PlacementReason {
    /// Returns the stable label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recorded => "recorded",
            Self::Pending => "pending",
            Self::First => "first",
            Self::Current => "current",
            Self::Overflow => "overflow",
            Self::RoundRobinNext => "round_robin_next",
            Self::RoundRobinSmallest => "round_robin_smallest",
        }
    }
}

/// Placement decision for one serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Chosen shard.
    pub shard: ShardName,
    /// Decision reason.
    pub reason: PlacementReason,
    /// `true` when the shard file does not exist yet.
    pub create: bool,
}

/// Computes a placement without touching any store.
///
/// `sizes` lists every existing shard file with its current size.
///
/// # Errors
///
/// Returns [`ShardError`] for conflicting catalog entries, an invalid policy
/// or exhausted shard numbers.
pub fn plan(
    policy: &PlacementPolicy,
    serial: &DasSerial,
    estimated_bytes: u64,
    known: &CatalogView,
    pending: &Catalog,
    sizes: &BTreeMap<ShardName, u64>,
) -> Result<Placement, ShardError> {
    let placement = |shard: ShardName, reason| Placement {
        shard,
        reason,
        create: !sizes.contains_key(&shard),
    };
    if let Some(entry) = pending.pending(serial) {
        return Ok(placement(entry.shard, PlacementReason::Pending));
    }
    if let Some(shard) = known.shard_for(serial)? {
        return Ok(placement(shard, PlacementReason::Recorded));
    }
    let first = ShardName::new(policy.first_shard).ok_or_else(|| {
        ShardError::InvalidPolicy(format!(
            "first shard {} exceeds {MAX_SHARD_NUMBER}",
            policy.first_shard
        ))
    })?;
    let newest_pending = pending.pending_entries().map(|(_, entry)| entry.shard).max();
    let Some(newest) = known.newest_shard().max(newest_pending) else {
        return Ok(placement(first, PlacementReason::First));
    };
    let next = || newest.next().ok_or_else(|| ShardError::Exhausted(newest.file_name()));
    if let Some(count) = policy.shard_count {
        if count == 0 {
            return Err(ShardError::InvalidPolicy("shard count must be positive".to_string()));
        }
        let used = newest.number().saturating_sub(first.number().saturating_sub(1));
        if used < count {
            return Ok(placement(next()?, PlacementReason::RoundRobinNext));
        }
        let smallest = sizes
            .iter()
            .min_by(|left, right| left.1.cmp(right.1).then(left.0.cmp(right.0)))
            .map_or(newest, |(shard, _)| *shard);
        return Ok(placement(smallest, PlacementReason::RoundRobinSmallest));
    }
    let current = sizes.get(&newest).copied().unwrap_or(0);
    if current.saturating_add(estimated_bytes) > policy.max_shard_bytes {
        return Ok(placement(next()?, PlacementReason::Overflow));
    }
    Ok(placement(newest, PlacementReason::Current))
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Shard manager applying a placement policy against a store.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardManager {
    /// Placement policy.
    policy: PlacementPolicy,
}

impl ShardManager {
    /// Creates a manager for `policy`.
    #[must_use]
    pub const fn new(policy: PlacementPolicy) -> Self {
        Self {
            policy,
        }
    }

    /// Returns the placement policy.
    #[must_use]
    pub const fn policy(&self) -> &PlacementPolicy {
        &self.policy
    }

    /// Returns every existing shard with its current size.
    ///
    /// Sizes of open shards come from their handle so that writes made in
    /// this batch are counted.
    ///
    /// # Errors
    ///
    /// Returns [`ShardError::Store`] when the store cannot be listed.
    pub fn shard_sizes<S: ContainerStore>(
        store: &S,
        handles: &ShardHandles<S::Handle>,
    ) -> Result<BTreeMap<ShardName, u64>, ShardError> {
        let files = store.list_files().map_err(|source| ShardError::Store {
            shard: "<listing>".to_string(),
            source,
        })?;
        let mut sizes = BTreeMap::new();
        for shard in files.iter().filter_map(|file| ShardName::parse(file)) {
            let size = handles.size_of(store, shard).map_err(|source| ShardError::Store {
                shard: shard.file_name(),
                source,
            })?;
            sizes.insert(shard, size);
        }
        Ok(sizes)
    }

    /// Chooses, opens (or creates) and returns the shard for `serial`.
    ///
    /// # Errors
    ///
    /// Returns [`ShardError`] when no placement can be made or the chosen
    /// shard cannot be opened or created.
    pub fn choose_shard<S: ContainerStore>(
        &self,
        store: &S,
        handles: &mut ShardHandles<S::Handle>,
        serial: &DasSerial,
        estimated_bytes: u64,
        known: &CatalogView,
        pending: &Catalog,
    ) -> Result<Placement, ShardError> {
        let sizes = Self::shard_sizes(store, handles)?;
        let placement = plan(&self.policy, serial, estimated_bytes, known, pending, &sizes)?;
        let unavailable = |source| ShardError::Store {
            shard: placement.shard.file_name(),
            source,
        };
        if placement.create {
            let handle = handles.create(store, placement.shard).map_err(unavailable)?;
            handle.create_group(&NodePath::new(RECEIVERS_GROUP)).map_err(unavailable)?;
        } else {
            handles.open(store, placement.shard).map_err(unavailable)?;
        }
        tracing::debug!(
            serial = %serial,
            shard = %placement.shard,
            reason = placement.reason.as_str(),
            estimated_bytes,
            "placed instrument"
        );
        Ok(placement)
    }
}
