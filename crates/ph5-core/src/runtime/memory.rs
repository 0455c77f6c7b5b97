// crates/ph5-core/src/runtime/memory.rs
// ============================================================================
// Module: In-Memory Container Store
// Description: Simple in-memory container files for tests and dry runs.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides an in-memory implementation of [`ContainerStore`].
//! Every handle shares the same file map, so writes are visible to all
//! handles immediately. File sizes are computed deterministically from
//! stored content: 8 bytes per numeric cell, the byte length of text cells
//! and 4 bytes per array sample.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::identifiers::NodePath;
use crate::core::table::Column;
use crate::core::table::FieldValue;
use crate::core::table::Row;
use crate::core::table::TableData;
use crate::interfaces::AccessMode;
use crate::interfaces::Container;
use crate::interfaces::ContainerStore;
use crate::interfaces::LinkTarget;
use crate::interfaces::NodeKind;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: File Model
// ============================================================================

/// One node in an in-memory file.
#[derive(Debug, Clone)]
enum MemoryNode {
    /// Group marker.
    Group,
    /// Table contents.
    Table(TableData),
    /// Sample array.
    Array(Vec<i32>),
    /// Soft link.
    Link(LinkTarget),
}

impl MemoryNode {
    /// Returns the node kind.
    const fn kind(&self) -> NodeKind {
        match self {
            Self::Group => NodeKind::Group,
            Self::Table(_) => NodeKind::Table,
            Self::Array(_) => NodeKind::Array,
            Self::Link(_) => NodeKind::Link,
        }
    }

    /// Returns the accounted size of the node.
    fn size(&self) -> u64 {
        match self {
            Self::Group | Self::Link(_) => 0,
            Self::Table(table) => table.rows.iter().map(row_size).sum(),
            Self::Array(samples) => 4 * samples.len() as u64,
        }
    }
}

/// Accounted size of one row.
fn row_size(row: &Row) -> u64 {
    row.iter()
        .map(|(_, value)| match value {
            FieldValue::Int(_) | FieldValue::Float(_) => 8,
            FieldValue::Text(text) => text.len() as u64,
        })
        .sum()
}

/// Node map of one file keyed by normalized path.
type MemoryFile = BTreeMap<NodePath, MemoryNode>;

/// Shared file map.
type FileMap = Arc<Mutex<BTreeMap<String, MemoryFile>>>;

/// Locks the shared file map.
fn lock(files: &FileMap) -> Result<MutexGuard<'_, BTreeMap<String, MemoryFile>>, StoreError> {
    files.lock().map_err(|_| StoreError::Store("in-memory store lock poisoned".to_string()))
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// In-memory container store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryContainerStore {
    /// File map protected by a mutex.
    files: FileMap,
}

impl InMemoryContainerStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a file, as if it had been deleted from disk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the file is absent.
    pub fn delete_file(&self, file: &str) -> Result<(), StoreError> {
        let mut files = lock(&self.files)?;
        files.remove(file).map(|_| ()).ok_or_else(|| StoreError::NotFound(file.to_string()))
    }
}

impl ContainerStore for InMemoryContainerStore {
    type Handle = InMemoryContainer;

    fn open(&self, file: &str, mode: AccessMode) -> Result<Self::Handle, StoreError> {
        let files = lock(&self.files)?;
        if !files.contains_key(file) {
            return Err(StoreError::NotFound(file.to_string()));
        }
        Ok(InMemoryContainer {
            files: Arc::clone(&self.files),
            file: file.to_string(),
            mode,
        })
    }

    fn create(&self, file: &str) -> Result<Self::Handle, StoreError> {
        let mut files = lock(&self.files)?;
        if files.contains_key(file) {
            return Err(StoreError::AlreadyExists(file.to_string()));
        }
        let mut nodes = MemoryFile::new();
        nodes.insert(NodePath::root(), MemoryNode::Group);
        files.insert(file.to_string(), nodes);
        Ok(InMemoryContainer {
            files: Arc::clone(&self.files),
            file: file.to_string(),
            mode: AccessMode::ReadWrite,
        })
    }

    fn exists(&self, file: &str) -> Result<bool, StoreError> {
        Ok(lock(&self.files)?.contains_key(file))
    }

    fn list_files(&self) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.files)?.keys().cloned().collect())
    }

    fn file_size(&self, file: &str) -> Result<u64, StoreError> {
        let files = lock(&self.files)?;
        let nodes = files.get(file).ok_or_else(|| StoreError::NotFound(file.to_string()))?;
        Ok(nodes.values().map(MemoryNode::size).sum())
    }
}

// ============================================================================
// SECTION: Handle
// ============================================================================

/// Open handle on one in-memory file.
#[derive(Debug, Clone)]
pub struct InMemoryContainer {
    /// Shared file map.
    files: FileMap,
    /// File this handle was opened on.
    file: String,
    /// Access mode.
    mode: AccessMode,
}

impl InMemoryContainer {
    /// Runs `f` against this handle's node map.
    fn with_nodes<T>(
        &self,
        f: impl FnOnce(&MemoryFile) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let files = lock(&self.files)?;
        let nodes = files.get(&self.file).ok_or_else(|| StoreError::NotFound(self.file.clone()))?;
        f(nodes)
    }

    /// Runs `f` against this handle's node map for writing.
    fn with_nodes_mut<T>(
        &self,
        f: impl FnOnce(&mut MemoryFile) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if !self.mode.is_writable() {
            return Err(StoreError::ReadOnly(self.file.clone()));
        }
        let mut files = lock(&self.files)?;
        let nodes =
            files.get_mut(&self.file).ok_or_else(|| StoreError::NotFound(self.file.clone()))?;
        f(nodes)
    }
}

/// Creates `path` and its ancestors as groups.
fn ensure_groups(nodes: &mut MemoryFile, path: &NodePath) -> Result<(), StoreError> {
    let mut chain = path.ancestors();
    chain.push(path.clone());
    for group in chain {
        match nodes.get(&group) {
            Some(MemoryNode::Group) => {}
            Some(_) => return Err(StoreError::Invalid(format!("{group} is not a group"))),
            None => {
                nodes.insert(group, MemoryNode::Group);
            }
        }
    }
    Ok(())
}

/// Inserts a leaf node after creating its parent groups.
fn insert_leaf(nodes: &mut MemoryFile, path: &NodePath, node: MemoryNode) -> Result<(), StoreError> {
    if path.is_root() {
        return Err(StoreError::Invalid("cannot replace root".to_string()));
    }
    if nodes.contains_key(path) {
        return Err(StoreError::AlreadyExists(path.to_string()));
    }
    if let Some(parent) = path.parent() {
        ensure_groups(nodes, &parent)?;
    }
    nodes.insert(path.clone(), node);
    Ok(())
}

/// Returns `true` when `path` is `parent` itself or lies below it.
fn is_within(path: &NodePath, parent: &NodePath) -> bool {
    if parent.is_root() {
        return true;
    }
    path == parent
        || path.as_str().strip_prefix(parent.as_str()).is_some_and(|rest| rest.starts_with('/'))
}

impl Container for InMemoryContainer {
    fn file_name(&self) -> &str {
        &self.file
    }

    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn create_group(&mut self, path: &NodePath) -> Result<(), StoreError> {
        self.with_nodes_mut(|nodes| ensure_groups(nodes, path))
    }

    fn node_kind(&self, path: &NodePath) -> Result<Option<NodeKind>, StoreError> {
        self.with_nodes(|nodes| Ok(nodes.get(path).map(MemoryNode::kind)))
    }

    fn list_children(&self, group: &NodePath) -> Result<Vec<String>, StoreError> {
        self.with_nodes(|nodes| {
            match nodes.get(group) {
                Some(MemoryNode::Group) => {}
                Some(_) => return Err(StoreError::Invalid(format!("{group} is not a group"))),
                None => return Err(StoreError::NotFound(group.to_string())),
            }
            Ok(nodes
                .keys()
                .filter(|path| path.parent().as_ref() == Some(group))
                .filter_map(|path| path.name().map(str::to_string))
                .collect())
        })
    }

    fn create_table(&mut self, path: &NodePath, columns: &[Column]) -> Result<(), StoreError> {
        let table = MemoryNode::Table(TableData::new(columns.to_vec()));
        self.with_nodes_mut(|nodes| insert_leaf(nodes, path, table))
    }

    fn read_table(&self, path: &NodePath) -> Result<TableData, StoreError> {
        self.with_nodes(|nodes| match nodes.get(path) {
            Some(MemoryNode::Table(table)) => Ok(table.clone()),
            Some(_) => Err(StoreError::Invalid(format!("{path} is not a table"))),
            None => Err(StoreError::NotFound(path.to_string())),
        })
    }

    fn append_rows(&mut self, path: &NodePath, rows: &[Row]) -> Result<(), StoreError> {
        self.with_nodes_mut(|nodes| match nodes.get_mut(path) {
            Some(MemoryNode::Table(table)) => {
                for row in rows {
                    TableData::check_row(&table.columns, row)
                        .map_err(|err| StoreError::Invalid(format!("{path}: {err}")))?;
                }
                table.rows.extend_from_slice(rows);
                Ok(())
            }
            Some(_) => Err(StoreError::Invalid(format!("{path} is not a table"))),
            None => Err(StoreError::NotFound(path.to_string())),
        })
    }

    fn truncate_table(&mut self, path: &NodePath) -> Result<(), StoreError> {
        self.with_nodes_mut(|nodes| match nodes.get_mut(path) {
            Some(MemoryNode::Table(table)) => {
                table.rows.clear();
                Ok(())
            }
            Some(_) => Err(StoreError::Invalid(format!("{path} is not a table"))),
            None => Err(StoreError::NotFound(path.to_string())),
        })
    }

    fn remove_node(&mut self, path: &NodePath) -> Result<(), StoreError> {
        self.with_nodes_mut(|nodes| {
            if path.is_root() {
                return Err(StoreError::Invalid("cannot remove root".to_string()));
            }
            if !nodes.contains_key(path) {
                return Err(StoreError::NotFound(path.to_string()));
            }
            nodes.retain(|candidate, _| !is_within(candidate, path));
            Ok(())
        })
    }

    fn create_array(&mut self, path: &NodePath, samples: &[i32]) -> Result<(), StoreError> {
        let array = MemoryNode::Array(samples.to_vec());
        self.with_nodes_mut(|nodes| insert_leaf(nodes, path, array))
    }

    fn read_array(&self, path: &NodePath) -> Result<Vec<i32>, StoreError> {
        self.with_nodes(|nodes| match nodes.get(path) {
            Some(MemoryNode::Array(samples)) => Ok(samples.clone()),
            Some(_) => Err(StoreError::Invalid(format!("{path} is not an array"))),
            None => Err(StoreError::NotFound(path.to_string())),
        })
    }

    fn create_link(
        &mut self,
        parent: &NodePath,
        name: &str,
        target: &LinkTarget,
    ) -> Result<(), StoreError> {
        let path = parent.child(name);
        let link = MemoryNode::Link(target.clone());
        self.with_nodes_mut(|nodes| insert_leaf(nodes, &path, link))
    }

    fn read_link(&self, path: &NodePath) -> Result<LinkTarget, StoreError> {
        self.with_nodes(|nodes| match nodes.get(path) {
            Some(MemoryNode::Link(target)) => Ok(target.clone()),
            _ => Err(StoreError::NotFound(path.to_string())),
        })
    }

    fn list_links(&self, parent: &NodePath) -> Result<Vec<(String, LinkTarget)>, StoreError> {
        self.with_nodes(|nodes| {
            Ok(nodes
                .iter()
                .filter(|(path, _)| path.parent().as_ref() == Some(parent))
                .filter_map(|(path, node)| match node {
                    MemoryNode::Link(target) => {
                        path.name().map(|name| (name.to_string(), target.clone()))
                    }
                    _ => None,
                })
                .collect())
        })
    }

    fn size_bytes(&self) -> Result<u64, StoreError> {
        self.with_nodes(|nodes| Ok(nodes.values().map(MemoryNode::size).sum()))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
