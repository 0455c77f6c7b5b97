// crates/ph5-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Container Store Tests
// Description: Durable container behavior on a temporary experiment directory.
// Purpose: Validate hierarchy, rows, arrays, links, access modes and schema
//          versioning through the public store API.
// ============================================================================

//! ## Overview
//! Integration tests for [`SqliteContainerStore`]:
//! - Table rows survive reopen in append order
//! - Read-only handles reject writes
//! - Subtree removal honours exact path prefixes
//! - A full ingestion session runs against on-disk shards
//! - Directory listing skips `SQLite` sidecars
//! - Schema version mismatches fail closed

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::fs;

use ph5_core::AccessMode;
use ph5_core::Container;
use ph5_core::ContainerStore;
use ph5_core::DasSerial;
use ph5_core::Experiment;
use ph5_core::FixedClock;
use ph5_core::LinkTarget;
use ph5_core::NodePath;
use ph5_core::Ph5Time;
use ph5_core::PlacementPolicy;
use ph5_core::Row;
use ph5_core::ShardName;
use ph5_core::StoreError;
use ph5_core::core::table::columns;
use ph5_core::runtime::catalog::read_all;
use ph5_core::runtime::ingest::IngestSession;
use ph5_core::runtime::ingest::IngestTrace;
use ph5_core::runtime::ingest::TraceBatch;
use ph5_core::runtime::registry::read_traces;
use ph5_store_sqlite::SqliteContainerStore;
use ph5_store_sqlite::SqliteStoreConfig;
use ph5_store_sqlite::SqliteStoreError;
use ph5_store_sqlite::SqliteStoreMode;
use proptest::prelude::*;
use rusqlite::Connection;
use rusqlite::params;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn store_in(dir: &TempDir) -> SqliteContainerStore {
    SqliteContainerStore::new(SqliteStoreConfig::new(dir.path())).unwrap()
}

fn int_row(value: i64) -> Row {
    let mut row = Row::new();
    row.set_int("a_i", value);
    row
}

fn trace(channel: i64, epoch: i64, samples: Vec<i32>) -> IngestTrace {
    IngestTrace {
        channel,
        start: Ph5Time::from_epoch(epoch),
        sample_rate: 100,
        multiplier: 1,
        samples,
        raw_file: "field.rt130".to_string(),
    }
}

// ============================================================================
// SECTION: Containers
// ============================================================================

#[test]
fn rows_survive_reopen_in_append_order() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let table = NodePath::new("/Experiment_g/Sorts_g/Array_t_001");
    {
        let mut handle = store.create("master.ph5").unwrap();
        handle.create_table(&table, &columns(&["a_i"])).unwrap();
        handle.append_rows(&table, &[int_row(3), int_row(1)]).unwrap();
        handle.append_rows(&table, &[int_row(2)]).unwrap();
    }
    let handle = store.open("master.ph5", AccessMode::ReadOnly).unwrap();
    let data = handle.read_table(&table).unwrap();
    let values: Vec<i64> = data.rows.iter().map(|row| row.int("a_i").unwrap()).collect();
    assert_eq!(values, vec![3, 1, 2]);
    assert_eq!(data.columns, columns(&["a_i"]));
    assert_eq!(
        handle.list_children(&NodePath::new("/Experiment_g")).unwrap(),
        vec!["Sorts_g".to_string()]
    );
}

#[test]
fn undeclared_columns_append_nothing() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let table = NodePath::new("/T_t");
    let mut handle = store.create("a.ph5").unwrap();
    handle.create_table(&table, &columns(&["a_i"])).unwrap();
    let mut stray = int_row(2);
    stray.set_text("b_s", "x");
    let err = handle.append_rows(&table, &[int_row(1), stray]).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
    assert!(handle.read_table(&table).unwrap().rows.is_empty());
}

#[test]
fn read_only_handles_reject_writes() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.create("a.ph5").unwrap();
    let mut handle = store.open("a.ph5", AccessMode::ReadOnly).unwrap();
    let err = handle.create_group(&NodePath::new("/G")).unwrap_err();
    assert!(matches!(err, StoreError::ReadOnly(_)));
    let err = handle.create_array(&NodePath::new("/G/Data_a_0001"), &[1]).unwrap_err();
    assert!(matches!(err, StoreError::ReadOnly(_)));
}

#[test]
fn remove_node_matches_exact_prefixes() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let mut handle = store.create("a.ph5").unwrap();
    handle.create_array(&NodePath::new("/Das_g_1X1/Data_a_0001"), &[1, 2]).unwrap();
    handle.create_array(&NodePath::new("/DasXg_1X1/Data_a_0001"), &[3]).unwrap();
    handle.create_array(&NodePath::new("/Das_g_1X10/Data_a_0001"), &[4]).unwrap();
    handle.remove_node(&NodePath::new("/Das_g_1X1")).unwrap();
    assert_eq!(handle.list_children(&NodePath::root()).unwrap(), vec![
        "DasXg_1X1".to_string(),
        "Das_g_1X10".to_string()
    ]);
    assert_eq!(handle.read_array(&NodePath::new("/Das_g_1X10/Data_a_0001")).unwrap(), vec![4]);
    assert!(handle.remove_node(&NodePath::new("/Das_g_1X1")).unwrap_err().is_not_found());
}

#[test]
fn links_list_in_name_order() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let mut handle = store.create("master.ph5").unwrap();
    let parent = NodePath::new("/Experiment_g/Receivers_g");
    for serial in ["9X9", "1X1"] {
        let target = LinkTarget {
            file: "miniPH5_00001.ph5".to_string(),
            path: parent.child(&format!("Das_g_{serial}")),
        };
        handle.create_link(&parent, &format!("Das_g_{serial}"), &target).unwrap();
    }
    let links = handle.list_links(&parent).unwrap();
    let names: Vec<&str> = links.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["Das_g_1X1", "Das_g_9X9"]);
    let link = parent.child("Das_g_9X9");
    assert_eq!(handle.read_link(&link).unwrap().path, link);
    assert!(
        handle
            .create_link(&parent, "Das_g_1X1", &links[0].1)
            .unwrap_err()
            .to_string()
            .contains("already exists")
    );
}

// ============================================================================
// SECTION: Store
// ============================================================================

#[test]
fn listing_skips_sidecars_and_directories() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.create("miniPH5_00002.ph5").unwrap();
    store.create("master.ph5").unwrap();
    fs::write(dir.path().join("master.ph5-wal"), b"").unwrap();
    fs::create_dir(dir.path().join("backups")).unwrap();
    assert_eq!(store.list_files().unwrap(), vec![
        "master.ph5".to_string(),
        "miniPH5_00002.ph5".to_string()
    ]);
    assert!(store.file_size("master.ph5").unwrap() > 0);
    assert!(store.file_size("absent.ph5").unwrap_err().is_not_found());
    assert!(store.open("absent.ph5", AccessMode::ReadOnly).unwrap_err().is_not_found());
    assert!(matches!(store.create("master.ph5").unwrap_err(), StoreError::AlreadyExists(_)));
    assert!(matches!(store.exists("../escape.ph5").unwrap_err(), StoreError::Invalid(_)));
}

#[test]
fn compression_level_is_validated() {
    let dir = TempDir::new().unwrap();
    let mut config = SqliteStoreConfig::new(dir.path());
    config.compression_level = 0;
    assert!(matches!(
        SqliteContainerStore::new(config).unwrap_err(),
        SqliteStoreError::Invalid(_)
    ));
}

#[test]
fn schema_version_mismatch_fails_closed() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.create("a.ph5").unwrap();
    let connection = Connection::open(dir.path().join("a.ph5")).unwrap();
    connection.execute("UPDATE store_meta SET version = ?1", params![99]).unwrap();
    drop(connection);
    let err = store.open("a.ph5", AccessMode::ReadWrite).unwrap_err();
    assert!(matches!(err, StoreError::Corrupt(ref message) if message.contains("99")), "{err}");
}

#[test]
fn ingestion_session_runs_on_disk() {
    let dir = TempDir::new().unwrap();
    let mut config = SqliteStoreConfig::new(dir.path());
    config.journal_mode = SqliteStoreMode::Delete;
    let store = SqliteContainerStore::new(config).unwrap();
    let clock = FixedClock(Ph5Time::from_epoch(1_704_067_200));
    let serial = DasSerial::new("3X500");
    {
        let mut experiment = Experiment::create(store.clone(), "master").unwrap();
        let mut session =
            IngestSession::new(&mut experiment, PlacementPolicy::default(), &clock).unwrap();
        session
            .ingest(&TraceBatch {
                serial: serial.clone(),
                traces: vec![trace(1, 1_000, vec![5; 100]), trace(1, 1_001, vec![-5; 100])],
            })
            .unwrap();
        let report = session.finish().unwrap();
        assert_eq!(report.traces, 2);
        assert_eq!(report.links.created.len(), 1);
        experiment.close();
    }
    let mut experiment = Experiment::open(store.clone(), "master", AccessMode::ReadOnly).unwrap();
    let entries = read_all(experiment.master()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].start, Ph5Time::from_epoch(1_000));
    assert_eq!(entries[0].stop, Ph5Time::from_epoch(1_002));
    let (store, _, handles) = experiment.parts_mut();
    let shard = handles.open(store, ShardName::new(1).unwrap()).unwrap();
    let segments = read_traces(shard, &serial).unwrap();
    assert_eq!(segments.len(), 2);
    let samples = shard.read_array(&serial.group_path().child(&segments[1].array_name)).unwrap();
    assert_eq!(samples, vec![-5; 100]);
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn chunked_appends_keep_order(chunks in prop::collection::vec(
        prop::collection::vec(any::<i64>(), 0 .. 5),
        1 .. 5,
    )) {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let table = NodePath::new("/T_t");
        let mut handle = store.create("a.ph5").unwrap();
        handle.create_table(&table, &columns(&["a_i"])).unwrap();
        for chunk in &chunks {
            let rows: Vec<Row> = chunk.iter().copied().map(int_row).collect();
            handle.append_rows(&table, &rows).unwrap();
        }
        let read: Vec<i64> = handle
            .read_table(&table)
            .unwrap()
            .rows
            .iter()
            .map(|row| row.int("a_i").unwrap())
            .collect();
        let expected: Vec<i64> = chunks.into_iter().flatten().collect();
        prop_assert_eq!(read, expected);
    }
}
