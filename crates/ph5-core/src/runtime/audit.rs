// crates/ph5-core/src/runtime/audit.rs
// ============================================================================
// Module: Consistency Auditor
// Description: Cross-checks deployments, catalog and shard contents.
// Purpose: Report every divergence and produce a pruned, consistent view.
// Dependencies: crate::{core, interfaces, runtime}, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! The auditor is a pure pipeline over an [`AuditInput`]:
//!
//! - **A, deployment scrub**: drop deployments whose window is empty or
//!   inverted; flag deployments sharing `(serial, channel, deploy_time)` for
//!   manual review without dropping either.
//! - **B, catalog cross-check**: drop deployments of serials the catalog
//!   lacks, and catalog entries of serials no deployment names.
//! - **C, shard presence**: drop serials whose shard is missing or holds no
//!   group for them; drop instrument groups no catalog entry references.
//! - **D, trace load**: collect each remaining serial's trace segments and
//!   note empty sets, window gaps, mixed rates, bad multipliers, ordering
//!   problems and stale links.
//!
//! Findings that caused pruning are `divergences`; re-auditing the pruned
//! view yields none. `observations` are reported but prune nothing and
//! `manual_review` lists ambiguities no rule may resolve. [`load_audit_input`]
//! builds the input from an experiment with per-shard failures isolated, and
//! [`AuditRepair::apply`] writes a pruned view back behind backups.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::DasSerial;
use crate::core::identifiers::NodePath;
use crate::core::identifiers::ShardName;
use crate::core::identifiers::deployment_table_name;
use crate::core::records::CatalogEntry;
use crate::core::records::Deployment;
use crate::core::records::TraceSegment;
use crate::core::time::Ph5Time;
use crate::interfaces::Container;
use crate::interfaces::ContainerStore;
use crate::interfaces::LinkTarget;
use crate::interfaces::StoreError;
use crate::runtime::catalog::CatalogError;
use crate::runtime::catalog::CatalogView;
use crate::runtime::catalog::read_all;
use crate::runtime::catalog::replace_all;
use crate::runtime::experiment::Experiment;
use crate::runtime::links::LinkReport;
use crate::runtime::links::expected_links;
use crate::runtime::links::find_stale;
use crate::runtime::links::live_links;
use crate::runtime::links::reconcile;
use crate::runtime::registry::DeploymentRegistry;
use crate::runtime::registry::RegistryError;
use crate::runtime::registry::deployment_table_path;
use crate::runtime::registry::is_ordered;
use crate::runtime::registry::list_instruments;
use crate::runtime::registry::read_traces;
use crate::runtime::registry::traces_in_window;
use crate::runtime::registry::valid;
use crate::runtime::rewrite::RepairContext;
use crate::runtime::rewrite::RepairError;
use crate::runtime::rewrite::Replacement;
use crate::runtime::rewrite::Rewrite;
use crate::runtime::rewrite::rewrite_table;
use crate::runtime::rewrite::rows_from_kef;

// ============================================================================
// SECTION: Input
// ============================================================================

/// What one shard looked like when the audit input was loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ShardContents {
    /// Shard could not be opened or read.
    Unreachable {
        /// Failure detail.
        reason: String,
    },
    /// Instrument groups found, with their trace segments in stored order.
    Loaded {
        /// Segments keyed by serial.
        instruments: BTreeMap<DasSerial, Vec<TraceSegment>>,
    },
}

/// Everything the auditor cross-checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditInput {
    /// Every deployment, in `(array, row)` order.
    pub deployments: Vec<Deployment>,
    /// Every catalog entry, in stored order.
    pub catalog: Vec<CatalogEntry>,
    /// Shard inventory.
    pub shards: BTreeMap<ShardName, ShardContents>,
    /// Live links in the master file.
    pub links: Vec<(NodePath, LinkTarget)>,
}

// ============================================================================
// SECTION: Findings
// ============================================================================

/// Per-serial counts inside one degenerate-deployment group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialCount {
    /// Instrument serial.
    pub serial: DasSerial,
    /// Deployments removed in this group.
    pub removed: usize,
    /// Deployments of this serial overall.
    pub total: usize,
}

/// One audit finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// Deployments with `deploy_time >= pickup_time`, grouped.
    DegenerateDeployments {
        /// Sub-array number.
        array: u32,
        /// Channel.
        channel: i64,
        /// Shared deploy time.
        deploy: Ph5Time,
        /// Per-serial counts.
        serials: Vec<SerialCount>,
    },
    /// Deployments of a serial the catalog does not list.
    DeploymentWithoutCatalog {
        /// Instrument serial.
        serial: DasSerial,
        /// Deployments removed.
        rows: usize,
    },
    /// Catalog entries of a serial no deployment names.
    CatalogWithoutDeployment {
        /// Instrument serial.
        serial: DasSerial,
        /// Entries removed.
        entries: usize,
    },
    /// Catalog points at a shard that cannot be opened.
    MissingShard {
        /// Instrument serial.
        serial: DasSerial,
        /// Shard concerned.
        shard: ShardName,
        /// Failure detail.
        reason: String,
    },
    /// Catalog points at a shard that holds no group for the serial.
    CatalogWithoutData {
        /// Instrument serial.
        serial: DasSerial,
        /// Shard concerned.
        shard: ShardName,
    },
    /// Instrument group no catalog entry references.
    OrphanInstrument {
        /// Shard concerned.
        shard: ShardName,
        /// Instrument serial.
        serial: DasSerial,
    },
    /// Serial with no trace segments.
    EmptyTraces {
        /// Instrument serial.
        serial: DasSerial,
    },
    /// Deployment window that no trace of its channel overlaps.
    NoTracesInWindow {
        /// Instrument serial.
        serial: DasSerial,
        /// Channel.
        channel: i64,
        /// Window start.
        deploy: Ph5Time,
        /// Window end.
        pickup: Ph5Time,
    },
    /// More than one `(rate, multiplier)` inside one deployment window.
    MixedSampleRates {
        /// Instrument serial.
        serial: DasSerial,
        /// Channel.
        channel: i64,
        /// Distinct `(rate, multiplier)` pairs.
        rates: Vec<(i64, i64)>,
    },
    /// Trace rows with an absent or zero multiplier.
    BadTraceMultiplier {
        /// Instrument serial.
        serial: DasSerial,
        /// Rows affected.
        rows: usize,
    },
    /// Deployment with an absent or zero multiplier.
    BadDeploymentMultiplier {
        /// Sub-array number.
        array: u32,
        /// Instrument serial.
        serial: DasSerial,
        /// Channel.
        channel: i64,
    },
    /// Trace rows not ordered by `(channel, start)`.
    OutOfOrder {
        /// Instrument serial.
        serial: DasSerial,
    },
    /// Live link no catalog entry derives.
    StaleLink {
        /// Link path.
        path: NodePath,
        /// Link target.
        target: LinkTarget,
    },
    /// Deployments sharing `(serial, channel, deploy_time)`.
    DuplicateDeployments {
        /// Instrument serial.
        serial: DasSerial,
        /// Channel.
        channel: i64,
        /// Shared deploy time.
        deploy: Ph5Time,
        /// `(array, row)` of every duplicate.
        rows: Vec<(u32, usize)>,
    },
    /// Catalog entries of one serial pointing at different locations.
    ConflictingCatalog {
        /// Instrument serial.
        serial: DasSerial,
        /// Every `shard:path` seen.
        locations: Vec<String>,
    },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegenerateDeployments {
                array,
                channel,
                deploy,
                serials,
            } => {
                let removed: usize = serials.iter().map(|count| count.removed).sum();
                write!(
                    f,
                    "{}: {removed} deployment(s) on channel {channel} at {deploy} have \
                     deploy_time >= pickup_time",
                    deployment_table_name(*array)
                )?;
                for count in serials {
                    write!(f, "; {} removed {}/{}", count.serial, count.removed, count.total)?;
                }
                Ok(())
            }
            Self::DeploymentWithoutCatalog {
                serial,
                rows,
            } => write!(f, "{serial}: {rows} deployment(s) but no catalog entry"),
            Self::CatalogWithoutDeployment {
                serial,
                entries,
            } => write!(f, "{serial}: {entries} catalog entr(ies) but no deployment"),
            Self::MissingShard {
                serial,
                shard,
                reason,
            } => write!(f, "{serial}: shard {shard} missing ({reason})"),
            Self::CatalogWithoutData {
                serial,
                shard,
            } => write!(f, "{serial}: catalog names {shard} but it holds no data"),
            Self::OrphanInstrument {
                shard,
                serial,
            } => write!(f, "{serial}: data in {shard} is not in the catalog"),
            Self::EmptyTraces {
                serial,
            } => write!(f, "{serial}: no trace segments"),
            Self::NoTracesInWindow {
                serial,
                channel,
                deploy,
                pickup,
            } => write!(f, "{serial}: channel {channel} has no trace in [{deploy}, {pickup}]"),
            Self::MixedSampleRates {
                serial,
                channel,
                rates,
            } => {
                let rendered: Vec<String> =
                    rates.iter().map(|(rate, multiplier)| format!("{rate}/{multiplier}")).collect();
                write!(f, "{serial}: channel {channel} mixes sample rates {}", rendered.join(", "))
            }
            Self::BadTraceMultiplier {
                serial,
                rows,
            } => write!(f, "{serial}: {rows} trace row(s) with multiplier absent or 0"),
            Self::BadDeploymentMultiplier {
                array,
                serial,
                channel,
            } => write!(
                f,
                "{serial}: {} channel {channel} has multiplier absent or 0",
                deployment_table_name(*array)
            ),
            Self::OutOfOrder {
                serial,
            } => write!(f, "{serial}: trace rows are not ordered by channel and time"),
            Self::StaleLink {
                path,
                target,
            } => write!(f, "stale link {path} -> {target}"),
            Self::DuplicateDeployments {
                serial,
                channel,
                deploy,
                rows,
            } => {
                let rendered: Vec<String> = rows
                    .iter()
                    .map(|(array, row)| format!("{}#{row}", deployment_table_name(*array)))
                    .collect();
                write!(
                    f,
                    "{serial}: channel {channel} deployed at {deploy} in {} rows ({}), fix manually",
                    rows.len(),
                    rendered.join(", ")
                )
            }
            Self::ConflictingCatalog {
                serial,
                locations,
            } => write!(f, "{serial}: catalog points at {}, fix manually", locations.join(" and ")),
        }
    }
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Result of one audit pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditOutcome {
    /// Pruned view; auditing it again yields no divergence.
    pub pruned: AuditInput,
    /// Trace segments of every retained serial.
    pub traces: BTreeMap<DasSerial, Vec<TraceSegment>>,
    /// Findings that caused pruning.
    pub divergences: Vec<Finding>,
    /// Findings reported without pruning.
    pub observations: Vec<Finding>,
    /// Ambiguities needing a human decision.
    pub manual_review: Vec<Finding>,
    /// `(array, row)` of every deployment removed.
    pub removed_deployments: BTreeSet<(u32, usize)>,
    /// `true` when catalog entries were removed.
    pub catalog_changed: bool,
}

impl AuditOutcome {
    /// Returns `true` when nothing at all was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.divergences.is_empty() && self.observations.is_empty() && self.manual_review.is_empty()
    }
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Runs all four stages over `input`.
#[must_use]
pub fn audit(input: AuditInput) -> AuditOutcome {
    let AuditInput {
        deployments,
        catalog,
        mut shards,
        links,
    } = input;
    let mut outcome = AuditOutcome::default();

    let deployments = scrub_deployments(deployments, &mut outcome);
    let (mut deployments, mut catalog) = cross_check_catalog(deployments, catalog, &mut outcome);
    check_shard_presence(&mut deployments, &mut catalog, &mut shards, &mut outcome);
    load_traces(&deployments, &catalog, &shards, &links, &mut outcome);

    for finding in &outcome.divergences {
        tracing::warn!(finding = %finding, "audit divergence");
    }
    for finding in &outcome.observations {
        tracing::info!(finding = %finding, "audit observation");
    }
    for finding in &outcome.manual_review {
        tracing::warn!(finding = %finding, "audit needs manual fix");
    }
    outcome.pruned = AuditInput {
        deployments,
        catalog,
        shards,
        links,
    };
    outcome
}

/// Stage A: drops degenerate windows and flags duplicates.
fn scrub_deployments(deployments: Vec<Deployment>, outcome: &mut AuditOutcome) -> Vec<Deployment> {
    let mut totals: BTreeMap<DasSerial, usize> = BTreeMap::new();
    for deployment in &deployments {
        *totals.entry(deployment.serial.clone()).or_default() += 1;
    }
    let mut degenerate: BTreeMap<(u32, i64, Ph5Time), BTreeMap<DasSerial, usize>> = BTreeMap::new();
    for deployment in deployments.iter().filter(|deployment| deployment.is_degenerate()) {
        *degenerate
            .entry((deployment.array, deployment.channel, deployment.deploy))
            .or_default()
            .entry(deployment.serial.clone())
            .or_default() += 1;
        outcome.removed_deployments.insert((deployment.array, deployment.row));
    }
    let kept: Vec<Deployment> = valid(&deployments).cloned().collect();
    for ((array, channel, deploy), serials) in degenerate {
        outcome.divergences.push(Finding::DegenerateDeployments {
            array,
            channel,
            deploy,
            serials: serials
                .into_iter()
                .map(|(serial, removed)| SerialCount {
                    total: totals.get(&serial).copied().unwrap_or(removed),
                    serial,
                    removed,
                })
                .collect(),
        });
    }

    let mut shared: BTreeMap<(DasSerial, i64, Ph5Time), Vec<(u32, usize)>> = BTreeMap::new();
    for deployment in &kept {
        shared
            .entry((deployment.serial.clone(), deployment.channel, deployment.deploy))
            .or_default()
            .push((deployment.array, deployment.row));
    }
    for ((serial, channel, deploy), rows) in shared {
        if rows.len() > 1 {
            outcome.manual_review.push(Finding::DuplicateDeployments {
                serial,
                channel,
                deploy,
                rows,
            });
        }
    }
    kept
}

/// Stage B: makes deployment and catalog serial sets agree.
fn cross_check_catalog(
    mut deployments: Vec<Deployment>,
    mut catalog: Vec<CatalogEntry>,
    outcome: &mut AuditOutcome,
) -> (Vec<Deployment>, Vec<CatalogEntry>) {
    let catalog_serials: BTreeSet<DasSerial> =
        catalog.iter().map(|entry| entry.serial.clone()).collect();
    let deployed: BTreeSet<DasSerial> =
        deployments.iter().map(|deployment| deployment.serial.clone()).collect();

    for serial in deployed.difference(&catalog_serials) {
        let rows = remove_deployments(&mut deployments, serial, outcome);
        outcome.divergences.push(Finding::DeploymentWithoutCatalog {
            serial: serial.clone(),
            rows,
        });
    }
    for serial in catalog_serials.difference(&deployed) {
        let before = catalog.len();
        catalog.retain(|entry| &entry.serial != serial);
        outcome.catalog_changed = true;
        outcome.divergences.push(Finding::CatalogWithoutDeployment {
            serial: serial.clone(),
            entries: before - catalog.len(),
        });
    }

    for (serial, locations) in CatalogView::build(&catalog).conflicts() {
        outcome.manual_review.push(Finding::ConflictingCatalog {
            serial: serial.clone(),
            locations: locations.iter().map(|(shard, path)| format!("{shard}:{path}")).collect(),
        });
    }
    (deployments, catalog)
}

/// Stage C: drops serials whose shard is unusable and unreferenced groups.
fn check_shard_presence(
    deployments: &mut Vec<Deployment>,
    catalog: &mut Vec<CatalogEntry>,
    shards: &mut BTreeMap<ShardName, ShardContents>,
    outcome: &mut AuditOutcome,
) {
    let mut locations: BTreeMap<DasSerial, BTreeSet<ShardName>> = BTreeMap::new();
    for entry in catalog.iter() {
        locations.entry(entry.serial.clone()).or_default().insert(entry.shard);
    }
    let mut dropped = BTreeSet::new();
    for (serial, serial_shards) in &locations {
        for shard in serial_shards {
            let finding = match shards.get(shard) {
                None => Some(Finding::MissingShard {
                    serial: serial.clone(),
                    shard: *shard,
                    reason: "shard file not found".to_string(),
                }),
                Some(ShardContents::Unreachable {
                    reason,
                }) => Some(Finding::MissingShard {
                    serial: serial.clone(),
                    shard: *shard,
                    reason: reason.clone(),
                }),
                Some(ShardContents::Loaded {
                    instruments,
                }) if !instruments.contains_key(serial) => Some(Finding::CatalogWithoutData {
                    serial: serial.clone(),
                    shard: *shard,
                }),
                Some(ShardContents::Loaded {
                    ..
                }) => None,
            };
            if let Some(finding) = finding {
                outcome.divergences.push(finding);
                dropped.insert(serial.clone());
            }
        }
    }
    if !dropped.is_empty() {
        catalog.retain(|entry| !dropped.contains(&entry.serial));
        outcome.catalog_changed = true;
        for serial in &dropped {
            remove_deployments(deployments, serial, outcome);
        }
    }

    let referenced: BTreeSet<(ShardName, DasSerial)> =
        catalog.iter().map(|entry| (entry.shard, entry.serial.clone())).collect();
    for (shard, contents) in shards.iter_mut() {
        let ShardContents::Loaded {
            instruments,
        } = contents
        else {
            continue;
        };
        let orphans: Vec<DasSerial> = instruments
            .keys()
            .filter(|serial| !referenced.contains(&(*shard, (*serial).clone())))
            .cloned()
            .collect();
        for serial in orphans {
            instruments.remove(&serial);
            outcome.divergences.push(Finding::OrphanInstrument {
                shard: *shard,
                serial,
            });
        }
    }
}

/// Removes every deployment of `serial`, recording the removed rows.
fn remove_deployments(
    deployments: &mut Vec<Deployment>,
    serial: &DasSerial,
    outcome: &mut AuditOutcome,
) -> usize {
    let before = deployments.len();
    deployments.retain(|deployment| {
        if &deployment.serial == serial {
            outcome.removed_deployments.insert((deployment.array, deployment.row));
            false
        } else {
            true
        }
    });
    before - deployments.len()
}

/// Stage D: collects trace segments and records observations.
fn load_traces(
    deployments: &[Deployment],
    catalog: &[CatalogEntry],
    shards: &BTreeMap<ShardName, ShardContents>,
    links: &[(NodePath, LinkTarget)],
    outcome: &mut AuditOutcome,
) {
    let mut locations: BTreeMap<DasSerial, BTreeSet<ShardName>> = BTreeMap::new();
    for entry in catalog {
        locations.entry(entry.serial.clone()).or_default().insert(entry.shard);
    }
    for (serial, serial_shards) in locations {
        let mut segments = Vec::new();
        for shard in serial_shards {
            if let Some(ShardContents::Loaded {
                instruments,
            }) = shards.get(&shard)
            {
                segments.extend(instruments.get(&serial).into_iter().flatten().cloned());
            }
        }
        if segments.is_empty() {
            outcome.observations.push(Finding::EmptyTraces {
                serial: serial.clone(),
            });
        }
        let bad = segments
            .iter()
            .filter(|segment| matches!(segment.multiplier, None | Some(0)))
            .count();
        if bad > 0 {
            outcome.observations.push(Finding::BadTraceMultiplier {
                serial: serial.clone(),
                rows: bad,
            });
        }
        if !is_ordered(&segments) {
            outcome.observations.push(Finding::OutOfOrder {
                serial: serial.clone(),
            });
        }
        outcome.traces.insert(serial, segments);
    }

    for deployment in deployments {
        if matches!(deployment.multiplier, None | Some(0)) {
            outcome.observations.push(Finding::BadDeploymentMultiplier {
                array: deployment.array,
                serial: deployment.serial.clone(),
                channel: deployment.channel,
            });
        }
        let Some(segments) = outcome.traces.get(&deployment.serial) else {
            continue;
        };
        if segments.is_empty() {
            continue;
        }
        let mut ordered = segments.clone();
        ordered.sort_by_key(TraceSegment::order_key);
        // Segments starting inside the window, plus earlier ones running into it.
        let mut inside: Vec<&TraceSegment> =
            traces_in_window(&ordered, deployment.channel, deployment.deploy, deployment.pickup)
                .iter()
                .collect();
        inside.extend(ordered.iter().filter(|segment| {
            segment.channel == deployment.channel
                && segment.start < deployment.deploy
                && deployment.overlaps(segment.start, segment.stop())
        }));
        if inside.is_empty() {
            outcome.observations.push(Finding::NoTracesInWindow {
                serial: deployment.serial.clone(),
                channel: deployment.channel,
                deploy: deployment.deploy,
                pickup: deployment.pickup,
            });
            continue;
        }
        let rates: BTreeSet<(i64, i64)> = inside
            .iter()
            .map(|segment| (segment.sample_rate, segment.effective_multiplier()))
            .collect();
        if rates.len() > 1 {
            outcome.observations.push(Finding::MixedSampleRates {
                serial: deployment.serial.clone(),
                channel: deployment.channel,
                rates: rates.into_iter().collect(),
            });
        }
    }

    let (expected, _) = expected_links(catalog);
    for stale in find_stale(links, &expected) {
        outcome.observations.push(Finding::StaleLink {
            path: stale.path,
            target: stale.target,
        });
    }
}

// ============================================================================
// SECTION: Loader
// ============================================================================

/// Fatal audit setup errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Deployment tables could not be read.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Catalog could not be read.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Experiment directory could not be listed.
    #[error("cannot list experiment files: {0}")]
    Store(StoreError),
}

/// Loads an [`AuditInput`] from an experiment.
///
/// Each shard is opened once through the experiment's handle registry; a
/// shard that fails to open or read is recorded as unreachable and the load
/// continues.
///
/// # Errors
///
/// Returns [`AuditError`] when the master tables or file list cannot be read.
pub fn load_audit_input<S: ContainerStore>(
    experiment: &mut Experiment<S>,
) -> Result<AuditInput, AuditError> {
    let (store, master, handles) = experiment.parts_mut();
    let registry = DeploymentRegistry::load(master)?;
    let catalog = read_all(master)?;
    let (expected, _) = expected_links(&catalog);
    let links = live_links(master, &expected).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "cannot list master links, skipping stale check");
        Vec::new()
    });

    let mut names: BTreeSet<ShardName> = catalog.iter().map(|entry| entry.shard).collect();
    let files = store.list_files().map_err(AuditError::Store)?;
    names.extend(files.iter().filter_map(|file| ShardName::parse(file)));

    let mut shards = BTreeMap::new();
    for shard in names {
        let contents = match handles.open(store, shard) {
            Err(err) => {
                tracing::warn!(shard = %shard, error = %err, "shard unreachable");
                ShardContents::Unreachable {
                    reason: err.to_string(),
                }
            }
            Ok(handle) => load_shard(handle).unwrap_or_else(|err| {
                tracing::warn!(shard = %shard, error = %err, "shard unreadable");
                ShardContents::Unreachable {
                    reason: err.to_string(),
                }
            }),
        };
        shards.insert(shard, contents);
    }
    Ok(AuditInput {
        deployments: registry.deployments().to_vec(),
        catalog,
        shards,
        links,
    })
}

/// Reads every instrument's segments from one shard.
fn load_shard<C: Container>(shard: &C) -> Result<ShardContents, RegistryError> {
    let mut instruments = BTreeMap::new();
    for serial in list_instruments(shard)? {
        let segments = read_traces(shard, &serial)?;
        instruments.insert(serial, segments);
    }
    Ok(ShardContents::Loaded {
        instruments,
    })
}

// ============================================================================
// SECTION: Apply
// ============================================================================

/// Outcome of writing a pruned view back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Tables rewritten, each behind a backup.
    pub rewrites: Vec<Rewrite>,
    /// Link reconciliation outcome.
    pub links: LinkReport,
}

/// Writes an audit's pruned view back to the master file.
#[derive(Clone, Copy)]
pub struct AuditRepair<'a> {
    /// Backup and clock context.
    ctx: RepairContext<'a>,
}

impl<'a> AuditRepair<'a> {
    /// Creates a repairer writing backups through `ctx`.
    #[must_use]
    pub const fn new(ctx: RepairContext<'a>) -> Self {
        Self {
            ctx,
        }
    }

    /// Rewrites each deployment table that lost rows (retained rows stay
    /// byte-identical), recreates the catalog when entries were removed,
    /// then reconciles links against the pruned catalog.
    ///
    /// `outcome` must come from an input loaded in the same batch.
    ///
    /// # Errors
    ///
    /// Returns [`RepairError`] when a backup or store step fails; earlier
    /// rewrites stay applied.
    pub fn apply<S: ContainerStore>(
        &self,
        experiment: &mut Experiment<S>,
        outcome: &AuditOutcome,
    ) -> Result<ApplyReport, RepairError> {
        let master = experiment.master_mut();
        let mut report = ApplyReport::default();

        let mut by_array: BTreeMap<u32, BTreeSet<usize>> = BTreeMap::new();
        for (array, row) in &outcome.removed_deployments {
            by_array.entry(*array).or_default().insert(*row);
        }
        for (array, removed) in by_array {
            let path = deployment_table_path(array);
            let label = deployment_table_name(array);
            let rewrite = rewrite_table(master, &path, &label, self.ctx, |table, text| {
                let rows = rows_from_kef(text, &path, &table.columns)?;
                Ok(Replacement {
                    columns: table.columns.clone(),
                    rows: rows
                        .into_iter()
                        .enumerate()
                        .filter(|(index, _)| !removed.contains(index))
                        .map(|(_, row)| row)
                        .collect(),
                })
            })?;
            report.rewrites.push(rewrite);
        }

        if outcome.catalog_changed {
            report.rewrites.push(replace_all(master, &outcome.pruned.catalog, self.ctx)?);
        }
        report.links = reconcile(master, &outcome.pruned.catalog);
        Ok(report)
    }
}
