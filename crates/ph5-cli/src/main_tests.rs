// crates/ph5-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for argument mapping and input parsing.
// Purpose: Ensure repair targets, overrides and record parsing behave.
// Dependencies: ph5-cli main helpers
// ============================================================================

//! ## Overview
//! Validates repair target selection, config overrides, bounded input reads
//! and JSON-lines record parsing.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use ph5_core::DasSerial;
use ph5_core::OrderTarget;
use ph5_core::SrmTarget;
use tempfile::TempDir;

use super::Cli;
use super::Commands;
use super::parse_records;
use super::read_text_with_limit;
use super::resolve_config;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("ph5-tools").chain(args.iter().copied())).unwrap()
}

fn srm_target(args: &[&str]) -> SrmTarget {
    match parse(args).command {
        Commands::FixSrm(command) => command.target(),
        other => panic!("unexpected command {other:?}"),
    }
}

// ============================================================================
// SECTION: Targets
// ============================================================================

#[test]
fn fix_srm_maps_each_target() {
    assert_eq!(srm_target(&["fix-srm", "--das", "3X500"]), SrmTarget::Das(DasSerial::new("3X500")));
    assert_eq!(srm_target(&["fix-srm", "--all-das"]), SrmTarget::AllDas);
    assert_eq!(srm_target(&["fix-srm", "--array", "7"]), SrmTarget::Array(7));
    assert_eq!(srm_target(&["fix-srm", "--all-arrays"]), SrmTarget::AllArrays);
    assert_eq!(srm_target(&["fix-srm", "--all"]), SrmTarget::All);
}

#[test]
fn fix_srm_requires_exactly_one_target() {
    let none = Cli::try_parse_from(["ph5-tools", "fix-srm"]);
    assert!(none.is_err());
    let both = Cli::try_parse_from(["ph5-tools", "fix-srm", "--all", "--array", "1"]);
    assert!(both.is_err());
}

#[test]
fn fix_order_maps_targets() {
    let target = match parse(&["fix-order", "--das", "1X1"]).command {
        Commands::FixOrder(command) => command.target(),
        other => panic!("unexpected command {other:?}"),
    };
    assert_eq!(target, OrderTarget::Das(DasSerial::new("1X1")));
    let target = match parse(&["fix-order", "--all"]).command {
        Commands::FixOrder(command) => command.target(),
        other => panic!("unexpected command {other:?}"),
    };
    assert_eq!(target, OrderTarget::All);
    assert!(Cli::try_parse_from(["ph5-tools", "fix-order"]).is_err());
}

#[test]
fn global_flags_follow_subcommands() {
    let cli = parse(&["catalog", "--nickname", "master", "-vv", "--path", "/data"]);
    assert_eq!(cli.global.nickname.as_deref(), Some("master"));
    assert_eq!(cli.global.verbose, 2);
    assert_eq!(cli.global.path, Some(PathBuf::from("/data")));
}

// ============================================================================
// SECTION: Config
// ============================================================================

#[test]
fn overrides_replace_config_values() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("ph5.toml");
    fs::write(&config_path, "[experiment]\npath = \"/from/file\"\nnickname = \"filed\"\n").unwrap();
    let config_arg = config_path.to_string_lossy().into_owned();

    let cli = parse(&["--config", &config_arg, "catalog"]);
    let config = resolve_config(&cli.global).unwrap();
    assert_eq!(config.experiment.path, PathBuf::from("/from/file"));
    assert_eq!(config.experiment.nickname.as_deref(), Some("filed"));

    let cli = parse(&["--config", &config_arg, "--path", "/cli", "-n", "cli", "catalog"]);
    let config = resolve_config(&cli.global).unwrap();
    assert_eq!(config.experiment.path, PathBuf::from("/cli"));
    assert_eq!(config.experiment.nickname.as_deref(), Some("cli"));
}

#[test]
fn invalid_nickname_override_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("ph5.toml");
    fs::write(&config_path, "").unwrap();
    let config_arg = config_path.to_string_lossy().into_owned();
    let cli = parse(&["--config", &config_arg, "-n", "a/b", "catalog"]);
    let err = resolve_config(&cli.global).unwrap_err();
    assert!(err.to_string().contains("experiment.nickname"), "{err}");
}

// ============================================================================
// SECTION: Inputs
// ============================================================================

#[test]
fn read_text_with_limit_rejects_oversized_input() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("records.jsonl");
    fs::write(&path, b"0123456789").unwrap();
    assert_eq!(read_text_with_limit(&path, 10).unwrap(), "0123456789");
    let err = read_text_with_limit(&path, 9).unwrap_err();
    assert!(err.to_string().contains("input limit"), "{err}");
}

#[test]
fn parse_records_reads_json_lines() {
    let text = concat!(
        r#"{"serial":"3X500","channel":1,"start":{"epoch":10,"micro_seconds":0},"sample_rate":100,"samples":[1,2]}"#,
        "\n\n",
        r#"{"serial":"3X501","channel":2,"start":{"epoch":11,"micro_seconds":5},"sample_rate":40,"multiplier":2,"samples":[],"raw_file":"a.rt130"}"#,
        "\n",
    );
    let records = parse_records(text).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].serial, DasSerial::new("3X500"));
    assert_eq!(records[0].trace.multiplier, 1);
    assert_eq!(records[1].trace.raw_file, "a.rt130");
}

#[test]
fn parse_records_names_the_bad_line() {
    let text = "{\"serial\":\"1X1\"}\n";
    let err = parse_records(text).unwrap_err();
    assert!(err.to_string().contains("line 1"), "{err}");
}
