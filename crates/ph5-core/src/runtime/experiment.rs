// crates/ph5-core/src/runtime/experiment.rs
// ============================================================================
// Module: Experiment
// Description: One experiment: its store, master handle and shard handles.
// Purpose: Own the handles of one batch and initialize the master hierarchy.
// Dependencies: crate::{core, interfaces}, thiserror, tracing
// ============================================================================

//! ## Overview
//! An [`Experiment`] is opened for exactly one batch in one access mode. It
//! holds the single master handle and the [`ShardHandles`] registry; every
//! component of the batch borrows them from here. Opening an experiment whose
//! master file is missing is a fatal setup error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::identifiers::NodePath;
use crate::core::identifiers::RECEIVERS_GROUP;
use crate::core::identifiers::SORTS_GROUP;
use crate::interfaces::AccessMode;
use crate::interfaces::Container;
use crate::interfaces::ContainerStore;
use crate::interfaces::StoreError;
use crate::runtime::handles::ShardHandles;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Experiment setup errors. All are fatal.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// Master file does not exist.
    #[error("experiment master file not found: {0}")]
    NotFound(String),
    /// Master file already exists.
    #[error("experiment master file already exists: {0}")]
    AlreadyExists(String),
    /// Nickname is unusable.
    #[error("invalid experiment nickname: {0}")]
    InvalidNickname(String),
    /// Master file could not be opened or initialized.
    #[error("experiment store error on {file}: {source}")]
    Store {
        /// Master file name.
        file: String,
        /// Store failure.
        source: StoreError,
    },
}

/// Returns the master file name for a nickname, adding `.ph5` if absent.
///
/// # Errors
///
/// Returns [`ExperimentError::InvalidNickname`] for an empty name or one
/// containing a path separator.
pub fn master_file_name(nickname: &str) -> Result<String, ExperimentError> {
    let nickname = nickname.trim();
    if nickname.is_empty() || nickname.contains(['/', '\\']) {
        return Err(ExperimentError::InvalidNickname(nickname.to_string()));
    }
    if nickname.ends_with(".ph5") {
        Ok(nickname.to_string())
    } else {
        Ok(format!("{nickname}.ph5"))
    }
}

// ============================================================================
// SECTION: Experiment
// ============================================================================

/// One experiment opened for one batch.
pub struct Experiment<S: ContainerStore> {
    /// Container store of the experiment directory.
    store: S,
    /// Master file name.
    master_file: String,
    /// Master file handle.
    master: S::Handle,
    /// Shard handles opened during the batch.
    shards: ShardHandles<S::Handle>,
}

impl<S: ContainerStore> Experiment<S> {
    /// Creates a new experiment master file with its base hierarchy.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError`] when the master exists or cannot be written.
    pub fn create(store: S, nickname: &str) -> Result<Self, ExperimentError> {
        let master_file = master_file_name(nickname)?;
        if store.exists(&master_file).map_err(|source| ExperimentError::Store {
            file: master_file.clone(),
            source,
        })? {
            return Err(ExperimentError::AlreadyExists(master_file));
        }
        let store_error = |source| ExperimentError::Store {
            file: master_file.clone(),
            source,
        };
        let mut master = store.create(&master_file).map_err(store_error)?;
        master.create_group(&NodePath::new(RECEIVERS_GROUP)).map_err(store_error)?;
        master.create_group(&NodePath::new(SORTS_GROUP)).map_err(store_error)?;
        tracing::info!(master = %master_file, "created experiment");
        Ok(Self {
            store,
            master_file,
            master,
            shards: ShardHandles::new(AccessMode::ReadWrite),
        })
    }

    /// Opens an existing experiment for a batch in `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::NotFound`] when the master file is missing,
    /// or [`ExperimentError::Store`] when it cannot be opened.
    pub fn open(store: S, nickname: &str, mode: AccessMode) -> Result<Self, ExperimentError> {
        let master_file = master_file_name(nickname)?;
        let master = store.open(&master_file, mode).map_err(|source| {
            if source.is_not_found() {
                ExperimentError::NotFound(master_file.clone())
            } else {
                ExperimentError::Store {
                    file: master_file.clone(),
                    source,
                }
            }
        })?;
        tracing::debug!(master = %master_file, writable = mode.is_writable(), "opened experiment");
        Ok(Self {
            store,
            master_file,
            master,
            shards: ShardHandles::new(mode),
        })
    }

    /// Returns the container store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the master file name.
    #[must_use]
    pub fn master_file(&self) -> &str {
        &self.master_file
    }

    /// Returns the batch access mode.
    #[must_use]
    pub fn mode(&self) -> AccessMode {
        self.master.mode()
    }

    /// Returns the master handle.
    pub const fn master(&self) -> &S::Handle {
        &self.master
    }

    /// Returns the master handle for writing.
    pub const fn master_mut(&mut self) -> &mut S::Handle {
        &mut self.master
    }

    /// Returns the shard handle registry.
    pub const fn shards(&self) -> &ShardHandles<S::Handle> {
        &self.shards
    }

    /// Splits the experiment into its store, master handle and shard handles
    /// so that one component can use all three at once.
    pub const fn parts_mut(&mut self) -> (&S, &mut S::Handle, &mut ShardHandles<S::Handle>) {
        (&self.store, &mut self.master, &mut self.shards)
    }

    /// Ends the batch, closing every shard handle.
    pub fn close(mut self) {
        self.shards.close_all();
        tracing::debug!(master = %self.master_file, "closed experiment");
    }
}
