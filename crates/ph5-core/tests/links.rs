// crates/ph5-core/tests/links.rs
// ============================================================================
// Module: Link Reconciler Tests
// Description: Idempotence, stale-link removal and per-item isolation.
// Purpose: Ensure master links always mirror the catalog.
// Dependencies: ph5-core
// ============================================================================

//! ## Overview
//! Reconciles links over in-memory experiments built by ingestion.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use common::Fixture;
use common::batch;
use common::trace;
use ph5_core::AccessMode;
use ph5_core::CatalogEntry;
use ph5_core::Container;
use ph5_core::ContainerStore;
use ph5_core::DasSerial;
use ph5_core::LinkTarget;
use ph5_core::NodePath;
use ph5_core::Ph5Time;
use ph5_core::RECEIVERS_GROUP;
use ph5_core::ShardName;
use ph5_core::runtime::catalog::read_all;
use ph5_core::runtime::links::expected_links;
use ph5_core::runtime::links::find_stale;
use ph5_core::runtime::links::live_links;
use ph5_core::runtime::links::reconcile;
use ph5_core::runtime::links::stale_links;

fn live(fixture: &Fixture) -> Vec<(NodePath, LinkTarget)> {
    let entries = read_all(fixture.experiment.master()).unwrap();
    let (expected, _) = expected_links(&entries);
    live_links(fixture.experiment.master(), &expected).unwrap()
}

#[test]
fn ingest_links_each_instrument_to_its_shard() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1111", vec![trace(1, 0, 10)]), batch("2X2", vec![trace(1, 0, 10)])]);
    let target = fixture
        .experiment
        .master()
        .read_link(&NodePath::new("/Experiment_g/Receivers_g/Das_g_1X1111"))
        .unwrap();
    assert_eq!(target.file, "miniPH5_00001.ph5");
    assert_eq!(target.path, DasSerial::new("1X1111").group_path());
    assert_eq!(live(&fixture).len(), 2);
}

#[test]
fn reconciling_twice_yields_same_links() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1", vec![trace(1, 0, 10)]), batch("2X2", vec![trace(2, 0, 10)])]);
    let entries = read_all(fixture.experiment.master()).unwrap();

    let first = reconcile(fixture.experiment.master_mut(), &entries);
    let after_first = live(&fixture);
    let second = reconcile(fixture.experiment.master_mut(), &entries);
    let after_second = live(&fixture);

    assert_eq!(after_first, after_second);
    assert_eq!(first.created, second.created);
    assert!(first.failures.is_empty() && second.failures.is_empty());
    assert!(second.removed.is_empty());
}

#[test]
fn stale_links_are_reported_then_removed() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1", vec![trace(1, 0, 10)])]);
    let receivers = NodePath::new(RECEIVERS_GROUP);
    let orphan = LinkTarget {
        file: "miniPH5_00009.ph5".to_string(),
        path: DasSerial::new("9X9").group_path(),
    };
    fixture.experiment.master_mut().create_link(&receivers, "Das_g_9X9", &orphan).unwrap();

    let entries = read_all(fixture.experiment.master()).unwrap();
    let stale = stale_links(fixture.experiment.master(), &entries).unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].path, receivers.child("Das_g_9X9"));
    assert_eq!(stale[0].target, orphan);

    let report = reconcile(fixture.experiment.master_mut(), &entries);
    assert_eq!(report.removed, vec![receivers.child("Das_g_9X9")]);
    assert!(stale_links(fixture.experiment.master(), &entries).unwrap().is_empty());
    assert_eq!(live(&fixture).len(), 1);
}

#[test]
fn link_to_the_wrong_shard_is_stale() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1", vec![trace(1, 0, 10)])]);
    let entries = read_all(fixture.experiment.master()).unwrap();
    let (expected, failures) = expected_links(&entries);
    assert!(failures.is_empty());
    let path = expected[0].path();
    let moved = LinkTarget {
        file: "miniPH5_00002.ph5".to_string(),
        path: expected[0].target.path.clone(),
    };
    let live = vec![(path.clone(), expected[0].target.clone()), (path.clone(), moved.clone())];
    let stale = find_stale(&live, &expected);
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].path, path);
    assert_eq!(stale[0].target, moved);
}

#[test]
fn bad_entry_fails_alone() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1", vec![trace(1, 0, 10)])]);
    let mut entries = read_all(fixture.experiment.master()).unwrap();
    entries.push(CatalogEntry {
        serial: DasSerial::new("8X8"),
        shard: ShardName::new(1).unwrap(),
        path: NodePath::new("/Experiment_g"),
        start: Ph5Time::from_epoch(0),
        stop: Ph5Time::from_epoch(1),
        recorded_at: Ph5Time::from_epoch(0),
    });

    let report = reconcile(fixture.experiment.master_mut(), &entries);
    assert_eq!(report.created.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].serial, Some(DasSerial::new("8X8")));
}

#[test]
fn read_only_master_collects_every_failure() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1", vec![trace(1, 0, 10)]), batch("2X2", vec![trace(1, 0, 10)])]);
    let entries = read_all(fixture.experiment.master()).unwrap();
    let mut master = fixture.store.open("master.ph5", AccessMode::ReadOnly).unwrap();

    let report = reconcile(&mut master, &entries);
    assert!(report.created.is_empty());
    assert_eq!(report.failures.len(), 2);
    assert_eq!(live(&fixture).len(), 2);
}
