// crates/ph5-core/tests/placement.rs
// ============================================================================
// Module: Shard Placement Tests
// Description: Placement determinism, reuse, overflow and round-robin.
// Purpose: Ensure instruments land in one shard chosen by a pure rule.
// Dependencies: ph5-core, proptest
// ============================================================================

//! ## Overview
//! Exercises the pure `plan` function and the session-level placement that
//! wraps it.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::collections::BTreeMap;

use common::Fixture;
use common::batch;
use common::trace;
use ph5_core::CatalogEntry;
use ph5_core::ContainerStore;
use ph5_core::DasSerial;
use ph5_core::NodePath;
use ph5_core::Ph5Time;
use ph5_core::PlacementPolicy;
use ph5_core::ShardName;
use ph5_core::runtime::catalog::Catalog;
use ph5_core::runtime::catalog::CatalogView;
use ph5_core::runtime::catalog::read_all;
use ph5_core::runtime::ingest::IngestSession;
use ph5_core::runtime::shard::PlacementReason;
use ph5_core::runtime::shard::plan;
use proptest::prelude::*;

fn shard(number: u32) -> ShardName {
    ShardName::new(number).unwrap()
}

fn entry(serial: &str, number: u32) -> CatalogEntry {
    let serial = DasSerial::new(serial);
    CatalogEntry {
        path: serial.group_path(),
        serial,
        shard: shard(number),
        start: Ph5Time::from_epoch(0),
        stop: Ph5Time::from_epoch(10),
        recorded_at: Ph5Time::from_epoch(0),
    }
}

proptest! {
    #[test]
    fn plan_is_a_pure_function_of_its_inputs(
        recorded in prop::collection::btree_map("[1-9]X[0-9]{2,4}", 1u32 .. 6, 0 .. 6),
        sizes in prop::collection::btree_map(1u32 .. 6, 0u64 .. 5_000, 0 .. 6),
        serial in "[1-9]X[0-9]{2,4}",
        estimate in 0u64 .. 5_000,
        max_shard_bytes in 1u64 .. 10_000,
        shard_count in prop::option::of(1u32 .. 5),
    ) {
        let entries: Vec<CatalogEntry> =
            recorded.iter().map(|(serial, number)| entry(serial, *number)).collect();
        let known = CatalogView::build(&entries);
        let sizes: BTreeMap<ShardName, u64> =
            sizes.into_iter().map(|(number, size)| (shard(number), size)).collect();
        let policy = PlacementPolicy { max_shard_bytes, shard_count, first_shard: 1 };
        let pending = Catalog::new();
        let serial = DasSerial::new(serial);
        let first = plan(&policy, &serial, estimate, &known, &pending, &sizes).unwrap();
        let second = plan(&policy, &serial, estimate, &known, &pending, &sizes).unwrap();
        prop_assert_eq!(first, second);
        if let Some(number) = recorded.get(serial.as_str()) {
            prop_assert_eq!(first.shard, shard(*number));
            prop_assert_eq!(first.reason, PlacementReason::Recorded);
        }
    }
}

#[test]
fn recorded_serial_reuses_shard_regardless_of_size() {
    let known = CatalogView::build(&[entry("1X1111", 1), entry("2X2222", 2)]);
    let sizes = BTreeMap::from([(shard(1), u64::MAX / 2), (shard(2), 0)]);
    let policy = PlacementPolicy {
        max_shard_bytes: 10,
        ..PlacementPolicy::default()
    };
    let placement =
        plan(&policy, &DasSerial::new("1X1111"), 1_000, &known, &Catalog::new(), &sizes).unwrap();
    assert_eq!(placement.shard, shard(1));
    assert_eq!(placement.reason, PlacementReason::Recorded);
    assert!(!placement.create);
}

#[test]
fn conflicting_catalog_blocks_placement() {
    let known = CatalogView::build(&[entry("1X1111", 1), entry("1X1111", 2)]);
    let result = plan(
        &PlacementPolicy::default(),
        &DasSerial::new("1X1111"),
        0,
        &known,
        &Catalog::new(),
        &BTreeMap::new(),
    );
    assert!(result.is_err());
}

#[test]
fn hundred_small_batches_stay_in_one_shard_with_one_entry() {
    let mut fixture = Fixture::new();
    let batches: Vec<_> =
        (0 .. 100).map(|index| batch("1X1111", vec![trace(1, 1_000 + index * 10, 50)])).collect();
    let report = fixture.ingest(&batches);
    assert_eq!(report.batches, 100);
    assert_eq!(report.shards.len(), 1);
    assert_eq!(report.catalog_entries.len(), 1);

    let files = fixture.store.list_files().unwrap();
    assert_eq!(files, vec!["master.ph5".to_string(), "miniPH5_00001.ph5".to_string()]);
    let entries = read_all(fixture.experiment.master()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].start, Ph5Time::from_epoch(1_000));
    assert_eq!(entries[0].stop, Ph5Time::from_epoch(1_990).add_micros(500_000));
}

#[test]
fn overflow_opens_next_shard_and_recorded_serial_stays() {
    let mut fixture = Fixture::new();
    let policy = PlacementPolicy {
        max_shard_bytes: 1_000,
        ..PlacementPolicy::default()
    };
    let clock = fixture.clock;
    let mut session = IngestSession::new(&mut fixture.experiment, policy, &clock).unwrap();
    let first = session.ingest(&batch("1X1", vec![trace(1, 0, 200)])).unwrap().unwrap();
    let again = session.ingest(&batch("1X1", vec![trace(1, 10, 200)])).unwrap().unwrap();
    let second = session.ingest(&batch("2X2", vec![trace(1, 0, 200)])).unwrap().unwrap();
    let third = session.ingest(&batch("3X3", vec![trace(1, 0, 200)])).unwrap().unwrap();
    session.finish().unwrap();

    assert_eq!((first.shard, first.reason), (shard(1), PlacementReason::First));
    assert!(first.create);
    assert_eq!((again.shard, again.reason), (shard(1), PlacementReason::Pending));
    assert_eq!((second.shard, second.reason), (shard(2), PlacementReason::Overflow));
    assert_eq!((third.shard, third.reason), (shard(3), PlacementReason::Overflow));

    let clock = fixture.clock;
    let mut session = IngestSession::new(&mut fixture.experiment, policy, &clock).unwrap();
    let later = session.ingest(&batch("1X1", vec![trace(1, 99, 5_000)])).unwrap().unwrap();
    session.finish().unwrap();
    assert_eq!((later.shard, later.reason), (shard(1), PlacementReason::Recorded));
}

#[test]
fn round_robin_fills_count_then_wraps_to_smallest() {
    let mut fixture = Fixture::new();
    let policy = PlacementPolicy {
        shard_count: Some(2),
        first_shard: 1,
        ..PlacementPolicy::default()
    };
    let clock = fixture.clock;
    let mut session = IngestSession::new(&mut fixture.experiment, policy, &clock).unwrap();
    let first = session.ingest(&batch("1X1", vec![trace(1, 0, 50)])).unwrap().unwrap();
    let second = session.ingest(&batch("2X2", vec![trace(1, 0, 500)])).unwrap().unwrap();
    let third = session.ingest(&batch("3X3", vec![trace(1, 0, 10)])).unwrap().unwrap();
    session.finish().unwrap();

    assert_eq!((first.shard, first.reason), (shard(1), PlacementReason::First));
    assert_eq!((second.shard, second.reason), (shard(2), PlacementReason::RoundRobinNext));
    assert_eq!((third.shard, third.reason), (shard(1), PlacementReason::RoundRobinSmallest));
}

#[test]
fn first_shard_offset_names_the_first_file() {
    let mut fixture = Fixture::new();
    let policy = PlacementPolicy {
        first_shard: 40,
        ..PlacementPolicy::default()
    };
    let report = fixture.ingest_with(policy, &[batch("4X4", vec![trace(2, 5, 10)])]);
    assert!(report.shards.contains(&shard(40)));
    let entries = read_all(fixture.experiment.master()).unwrap();
    assert_eq!(entries[0].path, NodePath::new("/Experiment_g/Receivers_g/Das_g_4X4"));
}
