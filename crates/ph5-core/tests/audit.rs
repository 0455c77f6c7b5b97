// crates/ph5-core/tests/audit.rs
// ============================================================================
// Module: Auditor Tests
// Description: Stage-by-stage pruning, manual review and write-back.
// Purpose: Ensure the audit converges and every prune is backed up.
// Dependencies: ph5-core
// ============================================================================

//! ## Overview
//! Builds experiments with deliberate divergences, audits them and checks
//! the pruned view, the findings and the applied repair.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use common::Fixture;
use common::NICKNAME;
use common::batch;
use common::deployment;
use common::trace;
use ph5_core::AccessMode;
use ph5_core::Container;
use ph5_core::DasSerial;
use ph5_core::Experiment;
use ph5_core::NodePath;
use ph5_core::Ph5Time;
use ph5_core::ShardName;
use ph5_core::core::records::COL_DESCRIPTION;
use ph5_core::runtime::audit::AuditRepair;
use ph5_core::runtime::audit::Finding;
use ph5_core::runtime::audit::ShardContents;
use ph5_core::runtime::audit::audit;
use ph5_core::runtime::audit::load_audit_input;
use ph5_core::runtime::backup::read_backup;
use ph5_core::runtime::catalog::Catalog;
use ph5_core::runtime::catalog::read_all;
use ph5_core::runtime::links::stale_links;
use ph5_core::runtime::registry::DeploymentRegistry;
use ph5_core::runtime::registry::NewTrace;
use ph5_core::runtime::registry::append_trace;
use ph5_core::runtime::registry::deployment_table_path;
use ph5_core::runtime::registry::valid;

fn reopen(fixture: &Fixture) -> Experiment<ph5_core::InMemoryContainerStore> {
    Experiment::open(fixture.store.clone(), NICKNAME, AccessMode::ReadOnly).unwrap()
}

fn serials_of(findings: &[Finding]) -> Vec<String> {
    findings.iter().map(ToString::to_string).collect()
}

#[test]
fn deployment_without_catalog_is_pruned() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1111", vec![trace(1, 1_500, 100)])]);
    fixture.deploy(1, &[deployment("1X1111", 1, 1_000, 5_000), deployment("3X500", 1, 1_000, 5_000)]);

    let input = load_audit_input(&mut reopen(&fixture)).unwrap();
    let outcome = audit(input);

    assert!(outcome.divergences.iter().any(|finding| matches!(
        finding,
        Finding::DeploymentWithoutCatalog { serial, rows: 1 } if serial.as_str() == "3X500"
    )));
    assert!(serials_of(&outcome.divergences).iter().any(|line| line.contains("3X500")));
    assert!(outcome.pruned.deployments.iter().all(|kept| kept.serial.as_str() != "3X500"));
    assert_eq!(outcome.pruned.deployments.len(), 1);
    assert!(outcome.removed_deployments.contains(&(1, 1)));
    assert!(!outcome.catalog_changed);
}

#[test]
fn duplicate_deployments_need_manual_review_and_stay() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1111", vec![trace(2, 1_500, 100)])]);
    fixture.deploy(1, &[deployment("1X1111", 2, 1_000, 5_000)]);
    fixture.deploy(2, &[deployment("1X1111", 2, 1_000, 6_000)]);

    let outcome = audit(load_audit_input(&mut reopen(&fixture)).unwrap());

    assert_eq!(outcome.manual_review.len(), 1);
    assert!(matches!(
        &outcome.manual_review[0],
        Finding::DuplicateDeployments { serial, channel: 2, rows, .. }
            if serial.as_str() == "1X1111" && rows == &vec![(1, 0), (2, 0)]
    ));
    assert_eq!(outcome.pruned.deployments.len(), 2);
    assert!(outcome.divergences.is_empty());
}

#[test]
fn degenerate_windows_are_grouped_and_dropped() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1", vec![trace(1, 1_500, 100)]), batch("2X2", vec![trace(1, 1_500, 100)])]);
    fixture.deploy(3, &[
        deployment("1X1", 1, 1_000, 5_000),
        deployment("1X1", 1, 2_000, 2_000),
        deployment("2X2", 1, 2_000, 1_000),
        deployment("2X2", 1, 1_000, 5_000),
    ]);

    let outcome = audit(load_audit_input(&mut reopen(&fixture)).unwrap());

    let grouped: Vec<&Finding> = outcome
        .divergences
        .iter()
        .filter(|finding| matches!(finding, Finding::DegenerateDeployments { .. }))
        .collect();
    assert_eq!(grouped.len(), 1);
    let Finding::DegenerateDeployments { array, serials, .. } = grouped[0] else {
        panic!("expected degenerate group");
    };
    assert_eq!(*array, 3);
    assert_eq!(serials.len(), 2);
    assert!(serials.iter().all(|count| count.removed == 1 && count.total == 2));
    assert_eq!(outcome.pruned.deployments.len(), 2);
    assert_eq!(outcome.removed_deployments.len(), 2);
}

#[test]
fn missing_shard_excludes_serial_without_aborting() {
    let mut fixture = Fixture::new();
    let policy = ph5_core::PlacementPolicy {
        max_shard_bytes: 500,
        ..ph5_core::PlacementPolicy::default()
    };
    fixture.ingest_with(policy, &[
        batch("1X1", vec![trace(1, 1_500, 200)]),
        batch("2X2", vec![trace(1, 1_500, 200)]),
    ]);
    fixture.deploy(1, &[deployment("1X1", 1, 1_000, 5_000), deployment("2X2", 1, 1_000, 5_000)]);
    fixture.store.delete_file("miniPH5_00002.ph5").unwrap();

    let input = load_audit_input(&mut reopen(&fixture)).unwrap();
    assert!(matches!(
        input.shards.get(&ShardName::new(2).unwrap()),
        Some(ShardContents::Unreachable { .. })
    ));
    let outcome = audit(input);

    assert!(outcome.divergences.iter().any(|finding| matches!(
        finding,
        Finding::MissingShard { serial, .. } if serial.as_str() == "2X2"
    )));
    assert!(outcome.catalog_changed);
    assert_eq!(outcome.pruned.catalog.len(), 1);
    assert!(outcome.traces.contains_key(&DasSerial::new("1X1")));
    assert!(!outcome.traces.contains_key(&DasSerial::new("2X2")));
}

#[test]
fn orphan_groups_and_catalog_without_data_are_pruned() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1", vec![trace(1, 1_500, 100)])]);
    fixture.deploy(1, &[deployment("1X1", 1, 1_000, 5_000), deployment("9X9", 1, 1_000, 5_000)]);

    let shard = ShardName::new(1).unwrap();
    let ghost = DasSerial::new("9X9");
    let mut catalog = Catalog::new();
    let (start, stop) = (Ph5Time::from_epoch(1_000), Ph5Time::from_epoch(2_000));
    catalog.record(&ghost, shard, &ghost.group_path(), start, stop).unwrap();
    let clock = fixture.clock;
    catalog.flush(fixture.experiment.master_mut(), &clock).unwrap();

    let (store, _, handles) = fixture.experiment.parts_mut();
    let handle = handles.open(store, shard).unwrap();
    append_trace(handle, &DasSerial::new("7X7"), &NewTrace {
        channel: 1,
        start,
        sample_rate: 100,
        multiplier: 1,
        samples: &[1, 2, 3],
        raw_file: "",
    })
    .unwrap();

    let outcome = audit(load_audit_input(&mut reopen(&fixture)).unwrap());

    assert!(outcome.divergences.iter().any(|finding| matches!(
        finding,
        Finding::CatalogWithoutData { serial, .. } if serial == &ghost
    )));
    assert!(outcome.divergences.iter().any(|finding| matches!(
        finding,
        Finding::OrphanInstrument { serial, .. } if serial.as_str() == "7X7"
    )));
    assert!(outcome.pruned.deployments.iter().all(|kept| kept.serial != ghost));
    assert!(outcome.pruned.catalog.iter().all(|entry| entry.serial != ghost));
}

#[test]
fn re_auditing_pruned_view_finds_no_divergence() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[
        batch("1X1", vec![trace(1, 1_500, 100)]),
        batch("2X2", vec![trace(1, 1_500, 100)]),
        batch("4X4", vec![trace(1, 1_500, 100)]),
    ]);
    fixture.deploy(1, &[
        deployment("1X1", 1, 1_000, 5_000),
        deployment("1X1", 1, 3_000, 3_000),
        deployment("3X3", 1, 1_000, 5_000),
        deployment("2X2", 1, 9_000, 8_000),
    ]);

    let first = audit(load_audit_input(&mut reopen(&fixture)).unwrap());
    assert!(!first.divergences.is_empty());
    let second = audit(first.pruned.clone());
    assert!(second.divergences.is_empty(), "{:?}", second.divergences);
    assert_eq!(second.pruned, first.pruned);
}

#[test]
fn observations_do_not_prune() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1", vec![
        trace(2, 1_500, 100),
        trace(1, 1_600, 100),
        ph5_core::runtime::ingest::IngestTrace {
            multiplier: 0,
            sample_rate: 50,
            ..trace(1, 1_700, 100)
        },
    ])]);
    fixture.deploy(1, &[deployment("1X1", 1, 1_000, 5_000), deployment("1X1", 3, 1_000, 5_000)]);

    let outcome = audit(load_audit_input(&mut reopen(&fixture)).unwrap());

    assert!(outcome.divergences.is_empty());
    let has = |predicate: fn(&Finding) -> bool| outcome.observations.iter().any(predicate);
    assert!(has(|finding| matches!(finding, Finding::OutOfOrder { .. })));
    assert!(has(|finding| matches!(finding, Finding::BadTraceMultiplier { rows: 1, .. })));
    assert!(has(|finding| matches!(finding, Finding::MixedSampleRates { channel: 1, .. })));
    assert!(has(|finding| matches!(finding, Finding::NoTracesInWindow { channel: 3, .. })));
    assert_eq!(outcome.pruned.deployments.len(), 2);
}

#[test]
fn trace_running_into_window_counts_as_coverage() {
    let mut fixture = Fixture::new();
    // 200 samples at 100 Hz: [900, 902).
    fixture.ingest(&[batch("1X1", vec![trace(1, 900, 200)])]);
    fixture.deploy(1, &[deployment("1X1", 1, 901, 5_000), deployment("1X1", 1, 902, 5_000)]);

    let outcome = audit(load_audit_input(&mut reopen(&fixture)).unwrap());

    let gaps: Vec<Ph5Time> = outcome
        .observations
        .iter()
        .filter_map(|finding| match finding {
            Finding::NoTracesInWindow {
                deploy, ..
            } => Some(*deploy),
            _ => None,
        })
        .collect();
    assert_eq!(gaps, vec![Ph5Time::from_epoch(902)]);
}

#[test]
fn valid_view_skips_degenerate_windows() {
    let deployments = [
        deployment("1X1", 1, 1_000, 5_000),
        deployment("2X2", 1, 5_000, 5_000),
        deployment("3X3", 1, 6_000, 5_000),
    ];
    let kept: Vec<&str> = valid(&deployments).map(|kept| kept.serial.as_str()).collect();
    assert_eq!(kept, vec!["1X1"]);
    let window = &deployments[0];
    assert!(window.overlaps(Ph5Time::from_epoch(900), Ph5Time::from_epoch(1_001)));
    assert!(!window.overlaps(Ph5Time::from_epoch(900), Ph5Time::from_epoch(1_000)));
    assert!(window.overlaps(Ph5Time::from_epoch(5_000), Ph5Time::from_epoch(6_000)));
    assert!(!window.overlaps(Ph5Time::from_epoch(5_001), Ph5Time::from_epoch(6_000)));
}

#[test]
fn apply_writes_back_pruned_view_behind_backups() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1", vec![trace(1, 1_500, 100)]), batch("5X5", vec![trace(1, 1_500, 100)])]);
    fixture.deploy(1, &[
        deployment("1X1", 1, 1_000, 5_000),
        deployment("3X500", 1, 1_000, 5_000),
        deployment("1X1", 2, 1_000, 5_000),
    ]);
    let before = fixture.experiment.master().read_table(&deployment_table_path(1)).unwrap();

    let outcome = audit(load_audit_input(&mut fixture.experiment).unwrap());
    assert!(outcome.catalog_changed);
    let (experiment, ctx) = fixture.parts();
    let report = AuditRepair::new(ctx).apply(experiment, &outcome).unwrap();
    assert_eq!(report.rewrites.len(), 2);
    for rewrite in &report.rewrites {
        assert!(rewrite.backup.exists());
    }

    let master = fixture.experiment.master();
    let after = master.read_table(&deployment_table_path(1)).unwrap();
    assert_eq!(after.rows, vec![before.rows[0].clone(), before.rows[2].clone()]);
    let registry = DeploymentRegistry::load(master).unwrap();
    assert!(registry.deployments().iter().all(|kept| kept.serial.as_str() != "3X500"));

    let entries = read_all(master).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].serial.as_str(), "1X1");
    assert!(stale_links(master, &entries).unwrap().is_empty());
    assert!(!master.has_node(&NodePath::new("/Experiment_g/Receivers_g/Das_g_5X5")).unwrap());

    let saved = read_backup(&report.rewrites[0].backup).unwrap();
    assert_eq!(saved[0].typed_rows(&before.columns).unwrap(), before.rows);
}

#[test]
fn apply_backup_replays_deployment_rows_exactly() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1", vec![trace(1, 1_500, 100)])]);
    fixture.deploy(1, &[deployment("1X1", 1, 1_000, 5_000)]);
    let path = deployment_table_path(1);
    let mut kept = deployment("1X1", 2, 1_000, 5_000).to_row();
    kept.set_text(COL_DESCRIPTION, "  vault B\nbehind the shed ");
    let mut dropped = deployment("3X500", 1, 1_000, 5_000).to_row();
    dropped.set_text(COL_DESCRIPTION, "\\\\nas\\share\t");
    fixture.experiment.master_mut().append_rows(&path, &[kept, dropped]).unwrap();
    let before = fixture.experiment.master().read_table(&path).unwrap();

    let outcome = audit(load_audit_input(&mut fixture.experiment).unwrap());
    let (experiment, ctx) = fixture.parts();
    let report = AuditRepair::new(ctx).apply(experiment, &outcome).unwrap();
    let rewrite = report.rewrites.iter().find(|rewrite| rewrite.table == path).unwrap();
    assert_eq!((rewrite.rows_before, rewrite.rows_after), (3, 2));

    let saved = read_backup(&rewrite.backup).unwrap();
    assert_eq!(saved[0].typed_rows(&before.columns).unwrap(), before.rows);
    let after = fixture.experiment.master().read_table(&path).unwrap();
    assert_eq!(after.rows, before.rows[.. 2].to_vec());
}
