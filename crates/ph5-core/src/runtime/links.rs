// crates/ph5-core/src/runtime/links.rs
// ============================================================================
// Module: Link Reconciler
// Description: Derives master-file soft links from the catalog and applies them.
// Purpose: Keep `/Experiment_g/Receivers_g/Das_g_*` links matching the catalog.
// Dependencies: crate::{core, interfaces}, serde, tracing
// ============================================================================

//! ## Overview
//! Each catalog entry yields one expected link: its parent is the first two
//! segments of the entry's internal path, its name is the third segment and
//! its target is the same path inside the entry's shard. Reconciliation
//! removes whatever node sits at the link's place (absent is fine) and
//! recreates the link, then removes live links no entry derives. Every item
//! is isolated: failures are collected in the report and never abort the
//! batch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::DasSerial;
use crate::core::identifiers::NodePath;
use crate::core::identifiers::RECEIVERS_GROUP;
use crate::core::records::CatalogEntry;
use crate::interfaces::Container;
use crate::interfaces::LinkTarget;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A link the catalog says should exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedLink {
    /// Instrument serial the link belongs to.
    pub serial: DasSerial,
    /// Group holding the link.
    pub parent: NodePath,
    /// Link name.
    pub name: String,
    /// Link target.
    pub target: LinkTarget,
}

impl ExpectedLink {
    /// Returns the link's own path.
    #[must_use]
    pub fn path(&self) -> NodePath {
        self.parent.child(&self.name)
    }
}

/// A live link no catalog entry derives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleLink {
    /// Link path.
    pub path: NodePath,
    /// Target it points at.
    pub target: LinkTarget,
}

/// One failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFailure {
    /// Link path or catalog path concerned.
    pub path: String,
    /// Serial concerned, when known.
    pub serial: Option<DasSerial>,
    /// Failure detail.
    pub message: String,
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReport {
    /// Links (re)created.
    pub created: Vec<NodePath>,
    /// Stale links removed.
    pub removed: Vec<NodePath>,
    /// Per-item failures.
    pub failures: Vec<LinkFailure>,
}

// ============================================================================
// SECTION: Derivation
// ============================================================================

/// Derives the expected link set from catalog entries.
///
/// Entries repeating a link name with the same target collapse into one
/// link; an entry whose path is too short, or that points an existing link
/// name elsewhere, becomes a failure.
#[must_use]
pub fn expected_links(entries: &[CatalogEntry]) -> (Vec<ExpectedLink>, Vec<LinkFailure>) {
    let mut links: BTreeMap<NodePath, ExpectedLink> = BTreeMap::new();
    let mut failures = Vec::new();
    for entry in entries {
        let segments: Vec<&str> = entry.path.segments().collect();
        let [first, second, name, ..] = segments.as_slice() else {
            failures.push(LinkFailure {
                path: entry.path.to_string(),
                serial: Some(entry.serial.clone()),
                message: "internal path has fewer than three segments".to_string(),
            });
            continue;
        };
        let parent = NodePath::new(format!("{first}/{second}"));
        let link_path = NodePath::new(format!("{first}/{second}/{name}"));
        let link = ExpectedLink {
            serial: entry.serial.clone(),
            parent,
            name: (*name).to_string(),
            target: LinkTarget {
                file: entry.shard.file_name(),
                path: entry.path.clone(),
            },
        };
        match links.get(&link_path) {
            Some(existing) if existing.target != link.target => failures.push(LinkFailure {
                path: link_path.to_string(),
                serial: Some(entry.serial.clone()),
                message: format!("already linked to {}, not {}", existing.target, link.target),
            }),
            Some(_) => {}
            None => {
                links.insert(link_path, link);
            }
        }
    }
    (links.into_values().collect(), failures)
}

/// Returns live links that no expected link matches by path and target.
#[must_use]
pub fn find_stale(live: &[(NodePath, LinkTarget)], expected: &[ExpectedLink]) -> Vec<StaleLink> {
    let wanted: BTreeSet<(NodePath, &LinkTarget)> =
        expected.iter().map(|link| (link.path(), &link.target)).collect();
    live.iter()
        .filter(|(path, target)| !wanted.contains(&(path.clone(), target)))
        .map(|(path, target)| StaleLink {
            path: path.clone(),
            target: target.clone(),
        })
        .collect()
}

/// Lists live links under every group that can hold catalog links.
///
/// # Errors
///
/// Returns [`StoreError`] when a group cannot be listed.
pub fn live_links<C: Container>(
    master: &C,
    expected: &[ExpectedLink],
) -> Result<Vec<(NodePath, LinkTarget)>, StoreError> {
    let mut parents: BTreeSet<NodePath> = expected.iter().map(|link| link.parent.clone()).collect();
    parents.insert(NodePath::new(RECEIVERS_GROUP));
    let mut live = Vec::new();
    for parent in parents {
        if !master.has_node(&parent)? {
            continue;
        }
        for (name, target) in master.list_links(&parent)? {
            live.push((parent.child(&name), target));
        }
    }
    Ok(live)
}

/// Reports stale links without mutating the master.
///
/// # Errors
///
/// Returns [`StoreError`] when links cannot be listed.
pub fn stale_links<C: Container>(
    master: &C,
    entries: &[CatalogEntry],
) -> Result<Vec<StaleLink>, StoreError> {
    let (expected, _) = expected_links(entries);
    let live = live_links(master, &expected)?;
    Ok(find_stale(&live, &expected))
}

// ============================================================================
// SECTION: Reconciliation
// ============================================================================

/// Makes the master's links match the catalog, isolating each item.
pub fn reconcile<C: Container>(master: &mut C, entries: &[CatalogEntry]) -> LinkReport {
    let (expected, failures) = expected_links(entries);
    let mut report = LinkReport {
        failures,
        ..LinkReport::default()
    };
    for link in &expected {
        let path = link.path();
        let result = master
            .remove_node(&path)
            .or_else(|err| if err.is_not_found() { Ok(()) } else { Err(err) })
            .and_then(|()| master.create_group(&link.parent))
            .and_then(|()| master.create_link(&link.parent, &link.name, &link.target));
        match result {
            Ok(()) => report.created.push(path),
            Err(err) => {
                tracing::warn!(serial = %link.serial, link = %path, error = %err, "link failed");
                report.failures.push(LinkFailure {
                    path: path.to_string(),
                    serial: Some(link.serial.clone()),
                    message: err.to_string(),
                });
            }
        }
    }
    match live_links(master, &expected) {
        Ok(live) => {
            for stale in find_stale(&live, &expected) {
                match master.remove_node(&stale.path) {
                    Ok(()) => {
                        tracing::info!(link = %stale.path, target = %stale.target, "removed stale link");
                        report.removed.push(stale.path);
                    }
                    Err(err) => {
                        tracing::warn!(link = %stale.path, error = %err, "stale link removal failed");
                        report.failures.push(LinkFailure {
                            path: stale.path.to_string(),
                            serial: None,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "listing links failed");
            report.failures.push(LinkFailure {
                path: RECEIVERS_GROUP.to_string(),
                serial: None,
                message: err.to_string(),
            });
        }
    }
    if report.failures.is_empty() {
        tracing::info!(created = report.created.len(), removed = report.removed.len(), "links reconciled");
    } else {
        tracing::warn!(
            created = report.created.len(),
            removed = report.removed.len(),
            failed = report.failures.len(),
            "links reconciled with failures"
        );
    }
    report
}
