// crates/ph5-core/src/runtime/handles.rs
// ============================================================================
// Module: Shard Handle Registry
// Description: Explicit registry of open shard handles for one batch.
// Purpose: Keep a single handle per shard file for every write and read.
// Dependencies: crate::core, crate::interfaces, tracing
// ============================================================================

//! ## Overview
//! A batch (ingestion, audit, repair) opens each shard at most once, in the
//! batch's access mode, and routes every later read and write for that shard
//! through the same handle. Components that need lookup-by-shard receive the
//! registry explicitly. [`ShardHandles::close_all`] ends the batch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::core::identifiers::ShardName;
use crate::interfaces::AccessMode;
use crate::interfaces::Container;
use crate::interfaces::ContainerStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Open shard handles keyed by shard name.
#[derive(Debug)]
pub struct ShardHandles<H> {
    /// Access mode every handle is opened in.
    mode: AccessMode,
    /// Open handles.
    open: BTreeMap<ShardName, H>,
}

impl<H: Container> ShardHandles<H> {
    /// Creates an empty registry for a batch in `mode`.
    #[must_use]
    pub const fn new(mode: AccessMode) -> Self {
        Self {
            mode,
            open: BTreeMap::new(),
        }
    }

    /// Returns the batch access mode.
    #[must_use]
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Returns the open handle for `shard`, opening it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the shard cannot be opened.
    pub fn open<S>(&mut self, store: &S, shard: ShardName) -> Result<&mut H, StoreError>
    where
        S: ContainerStore<Handle = H>,
    {
        match self.open.entry(shard) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let handle = store.open(&shard.file_name(), self.mode)?;
                tracing::debug!(shard = %shard, writable = self.mode.is_writable(), "opened shard");
                Ok(entry.insert(handle))
            }
        }
    }

    /// Creates a new shard file and registers its handle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadOnly`] for a read-only batch, or the store's
    /// error when the file cannot be created.
    pub fn create<S>(&mut self, store: &S, shard: ShardName) -> Result<&mut H, StoreError>
    where
        S: ContainerStore<Handle = H>,
    {
        if !self.mode.is_writable() {
            return Err(StoreError::ReadOnly(shard.file_name()));
        }
        let handle = store.create(&shard.file_name())?;
        tracing::info!(shard = %shard, "created shard");
        Ok(self.open.entry(shard).or_insert(handle))
    }

    /// Returns the current size of `shard`, preferring the open handle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the size cannot be read.
    pub fn size_of<S>(&self, store: &S, shard: ShardName) -> Result<u64, StoreError>
    where
        S: ContainerStore<Handle = H>,
    {
        match self.open.get(&shard) {
            Some(handle) => handle.size_bytes(),
            None => store.file_size(&shard.file_name()),
        }
    }

    /// Closes every handle, ending the batch.
    pub fn close_all(&mut self) {
        let count = self.open.len();
        self.open.clear();
        if count > 0 {
            tracing::debug!(count, "closed shard handles");
        }
    }
}
