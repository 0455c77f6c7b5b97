// crates/ph5-core/tests/repair.rs
// ============================================================================
// Module: Repair Tests
// Description: Multiplier and order repairs, backups and failure handling.
// Purpose: Ensure repairs change only what they fix and always back up first.
// Dependencies: ph5-core
// ============================================================================

//! ## Overview
//! Runs both repairs over in-memory experiments and replays their backups.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::fs;

use common::Fixture;
use common::batch;
use common::deployment;
use common::trace;
use ph5_core::Container;
use ph5_core::DasSerial;
use ph5_core::FieldValue;
use ph5_core::Row;
use ph5_core::ShardName;
use ph5_core::TableData;
use ph5_core::core::records::COL_DESCRIPTION;
use ph5_core::core::records::COL_MULTIPLIER;
use ph5_core::core::records::COL_RAW_FILE;
use ph5_core::runtime::backup::BackupStore;
use ph5_core::runtime::backup::read_backup;
use ph5_core::runtime::ingest::IngestTrace;
use ph5_core::runtime::registry::deployment_table_path;
use ph5_core::runtime::registry::is_ordered;
use ph5_core::runtime::registry::read_traces;
use ph5_core::runtime::repair::OrderTarget;
use ph5_core::runtime::repair::SrmTarget;
use ph5_core::runtime::repair::fix_sample_rate_multiplier;
use ph5_core::runtime::repair::fix_trace_order;
use ph5_core::runtime::rewrite::RepairContext;
use ph5_core::runtime::rewrite::RepairError;

fn zero_multiplier(channel: i64, epoch: i64) -> IngestTrace {
    IngestTrace {
        multiplier: 0,
        ..trace(channel, epoch, 20)
    }
}

fn shard_table(fixture: &mut Fixture, serial: &DasSerial) -> TableData {
    let (store, _, handles) = fixture.experiment.parts_mut();
    let handle = handles.open(store, ShardName::new(1).unwrap()).unwrap();
    handle.read_table(&serial.trace_table_path()).unwrap()
}

fn without_multiplier(rows: &[Row]) -> Vec<Vec<(String, String)>> {
    rows.iter()
        .map(|row| {
            row.iter()
                .filter(|(column, _)| *column != COL_MULTIPLIER)
                .map(|(column, value)| (column.to_string(), value.to_string()))
                .collect()
        })
        .collect()
}

fn backup_count(fixture: &Fixture) -> usize {
    fs::read_dir(fixture.dir.path()).map(Iterator::count).unwrap_or(0)
}

#[test]
fn zero_multipliers_become_one_and_nothing_else_changes() {
    let mut fixture = Fixture::new();
    let serial = DasSerial::new("1X1111");
    fixture.ingest(&[batch("1X1111", vec![zero_multiplier(1, 100), zero_multiplier(1, 200), zero_multiplier(2, 100)])]);
    let before = shard_table(&mut fixture, &serial);

    let (experiment, ctx) = fixture.parts();
    let report = fix_sample_rate_multiplier(experiment, &SrmTarget::Das(serial.clone()), ctx).unwrap();
    assert_eq!(report.rewrites.len(), 1);
    assert!(report.failures.is_empty());

    let after = shard_table(&mut fixture, &serial);
    assert_eq!(after.rows.len(), 3);
    assert!(after.rows.iter().all(|row| row.get(COL_MULTIPLIER) == Some(&FieldValue::Int(1))));
    assert_eq!(without_multiplier(&after.rows), without_multiplier(&before.rows));

    let saved = read_backup(&report.rewrites[0].backup).unwrap();
    assert_eq!(saved[0].typed_rows(&before.columns).unwrap(), before.rows);
}

fn with_raw_file(raw_file: &str, trace: IngestTrace) -> IngestTrace {
    IngestTrace {
        raw_file: raw_file.to_string(),
        ..trace
    }
}

fn with_multiplier_one(row: &Row) -> Row {
    let mut fixed = row.clone();
    fixed.set_int(COL_MULTIPLIER, 1);
    fixed
}

#[test]
fn multiplier_repair_keeps_padded_and_multi_line_text() {
    let mut fixture = Fixture::new();
    let serial = DasSerial::new("1X1111");
    fixture.ingest(&[batch("1X1111", vec![
        with_raw_file("  padded.rt130 ", zero_multiplier(1, 100)),
        with_raw_file("two\nlines", zero_multiplier(1, 200)),
        with_raw_file("C:\\field\\n\t\"q\"", zero_multiplier(2, 100)),
    ])]);
    let before = shard_table(&mut fixture, &serial);

    let (experiment, ctx) = fixture.parts();
    let report = fix_sample_rate_multiplier(experiment, &SrmTarget::Das(serial.clone()), ctx).unwrap();
    assert_eq!(report.rewrites.len(), 1);

    let after = shard_table(&mut fixture, &serial);
    let expected: Vec<Row> = before.rows.iter().map(with_multiplier_one).collect();
    assert_eq!(after.rows, expected);
    assert_eq!(after.rows[0].get(COL_RAW_FILE), Some(&FieldValue::Text("  padded.rt130 ".to_string())));
    assert_eq!(after.rows[1].get(COL_RAW_FILE), Some(&FieldValue::Text("two\nlines".to_string())));

    let saved = read_backup(&report.rewrites[0].backup).unwrap();
    assert_eq!(saved[0].typed_rows(&before.columns).unwrap(), before.rows);
}

#[test]
fn deployment_descriptions_survive_multiplier_repair() {
    let mut fixture = Fixture::new();
    fixture.deploy(1, &[deployment("1X1", 1, 1_000, 5_000)]);
    let path = deployment_table_path(1);
    let mut padded = deployment("2X2", 1, 1_000, 5_000);
    padded.multiplier = None;
    let mut padded = padded.to_row();
    padded.set_text(COL_DESCRIPTION, " north ridge\n  second line ");
    let mut quoted = deployment("3X3", 1, 1_000, 5_000).to_row();
    quoted.set_int(COL_MULTIPLIER, 0);
    quoted.set_text(COL_DESCRIPTION, "\"as logged\"");
    fixture.experiment.master_mut().append_rows(&path, &[padded, quoted]).unwrap();
    let before = fixture.experiment.master().read_table(&path).unwrap();

    let (experiment, ctx) = fixture.parts();
    let report = fix_sample_rate_multiplier(experiment, &SrmTarget::Array(1), ctx).unwrap();
    assert_eq!(report.rewrites.len(), 1);

    let after = fixture.experiment.master().read_table(&path).unwrap();
    let expected: Vec<Row> = before.rows.iter().map(with_multiplier_one).collect();
    assert_eq!(after.rows, expected);

    let saved = read_backup(&report.rewrites[0].backup).unwrap();
    assert_eq!(saved[0].typed_rows(&before.columns).unwrap(), before.rows);
}

#[test]
fn order_repair_keeps_awkward_text() {
    let mut fixture = Fixture::new();
    let serial = DasSerial::new("1X1");
    fixture.ingest(&[batch("1X1", vec![
        with_raw_file(" late ", trace(1, 300, 10)),
        with_raw_file("early\r\n", trace(1, 200, 10)),
    ])]);
    let before = shard_table(&mut fixture, &serial);

    let (experiment, ctx) = fixture.parts();
    let report = fix_trace_order(experiment, &OrderTarget::Das(serial.clone()), ctx).unwrap();
    assert_eq!(report.rewrites.len(), 1);

    let after = shard_table(&mut fixture, &serial);
    assert_eq!(after.rows, vec![before.rows[1].clone(), before.rows[0].clone()]);
    let saved = read_backup(&report.rewrites[0].backup).unwrap();
    assert_eq!(saved[0].typed_rows(&before.columns).unwrap(), before.rows);
}

#[test]
fn absent_deployment_multiplier_is_inserted() {
    let mut fixture = Fixture::new();
    let mut missing = deployment("2X2", 1, 1_000, 5_000);
    missing.multiplier = None;
    fixture.deploy(1, &[deployment("1X1", 1, 1_000, 5_000), missing]);
    fixture.deploy(2, &[deployment("4X4", 1, 1_000, 5_000)]);
    let path = deployment_table_path(1);
    let before = fixture.experiment.master().read_table(&path).unwrap();

    let (experiment, ctx) = fixture.parts();
    let report = fix_sample_rate_multiplier(experiment, &SrmTarget::AllArrays, ctx).unwrap();
    assert_eq!(report.rewrites.len(), 1);
    assert_eq!(report.untouched, vec![deployment_table_path(2)]);

    let after = fixture.experiment.master().read_table(&path).unwrap();
    assert_eq!(after.rows[1].get(COL_MULTIPLIER), Some(&FieldValue::Int(1)));
    assert_eq!(after.rows[0], before.rows[0]);
    assert_eq!(without_multiplier(&after.rows), without_multiplier(&before.rows));
    assert_eq!(backup_count(&fixture), 1);
}

#[test]
fn healthy_tables_are_left_alone() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1", vec![trace(1, 0, 10)])]);
    fixture.deploy(1, &[deployment("1X1", 1, 0, 50)]);

    let (experiment, ctx) = fixture.parts();
    let report = fix_sample_rate_multiplier(experiment, &SrmTarget::All, ctx).unwrap();
    assert!(report.rewrites.is_empty());
    assert_eq!(report.untouched.len(), 2);
    assert_eq!(backup_count(&fixture), 0);
}

#[test]
fn unknown_targets_are_reported() {
    let mut fixture = Fixture::new();
    fixture.ingest(&[batch("1X1", vec![trace(1, 0, 10)])]);
    let (experiment, ctx) = fixture.parts();
    let missing = fix_sample_rate_multiplier(experiment, &SrmTarget::Das(DasSerial::new("0X0")), ctx);
    assert!(matches!(missing, Err(RepairError::NotFound(_))));
    let missing = fix_sample_rate_multiplier(experiment, &SrmTarget::Array(7), ctx);
    assert!(matches!(missing, Err(RepairError::NotFound(_))));
    let missing = fix_trace_order(experiment, &OrderTarget::Das(DasSerial::new("0X0")), ctx);
    assert!(matches!(missing, Err(RepairError::NotFound(_))));
}

#[test]
fn failed_backup_aborts_before_removal() {
    let mut fixture = Fixture::new();
    let serial = DasSerial::new("1X1");
    fixture.ingest(&[batch("1X1", vec![zero_multiplier(1, 0)])]);
    let before = shard_table(&mut fixture, &serial);

    let blocker = fixture.dir.path().join("not-a-dir");
    fs::write(&blocker, b"occupied").unwrap();
    let backups = BackupStore::new(blocker.join("backups"));
    let ctx = RepairContext {
        backups: &backups,
        clock: &fixture.clock,
    };
    let result = fix_sample_rate_multiplier(&mut fixture.experiment, &SrmTarget::AllDas, ctx);
    assert!(matches!(result, Err(RepairError::Backup { .. })));
    assert_eq!(shard_table(&mut fixture, &serial), before);
}

#[test]
fn order_repair_sorts_rows_and_keeps_backup() {
    let mut fixture = Fixture::new();
    let serial = DasSerial::new("1X1");
    fixture.ingest(&[batch("1X1", vec![trace(2, 100, 10), trace(1, 300, 10), trace(1, 200, 10)])]);
    fixture.ingest(&[batch("2X2", vec![trace(1, 100, 10), trace(1, 200, 10)])]);
    let before = shard_table(&mut fixture, &serial);

    let (experiment, ctx) = fixture.parts();
    let report = fix_trace_order(experiment, &OrderTarget::All, ctx).unwrap();
    assert_eq!(report.rewrites.len(), 1);
    assert_eq!(report.untouched, vec![DasSerial::new("2X2").trace_table_path()]);

    let (store, _, handles) = fixture.experiment.parts_mut();
    let handle = handles.open(store, ShardName::new(1).unwrap()).unwrap();
    let segments = read_traces(handle, &serial).unwrap();
    assert!(is_ordered(&segments));
    let starts: Vec<(i64, i64)> = segments.iter().map(|segment| (segment.channel, segment.start.epoch)).collect();
    assert_eq!(starts, vec![(1, 200), (1, 300), (2, 100)]);
    assert_eq!(segments[0].array_name, "Data_a_0003");

    let saved = read_backup(&report.rewrites[0].backup).unwrap();
    assert_eq!(saved[0].typed_rows(&before.columns).unwrap(), before.rows);
}
