// crates/ph5-cli/src/main.rs
// ============================================================================
// Module: PH5 Tools CLI Entry Point
// Description: Command dispatcher for PH5 experiment maintenance workflows.
// Purpose: Ingest, inspect, audit and repair sharded PH5 experiments on disk.
// Dependencies: clap, ph5-config, ph5-core, ph5-store-sqlite, serde_json,
//               thiserror, tracing, tracing-subscriber.
// ============================================================================

//! ## Overview
//! `ph5-tools` opens one experiment directory per invocation through the
//! `SQLite` container store and runs exactly one batch: ingestion, kef
//! import/export, catalog and link inspection, the audit (optionally
//! writing the pruned view back) and the multiplier and order repairs.
//! Command results go to stdout; logs go to stderr. Findings never change
//! the exit code; only fatal setup, backup and store errors do.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::fs;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use ph5_config::LogLevel;
use ph5_config::Ph5Config;
use ph5_core::AccessMode;
use ph5_core::DasSerial;
use ph5_core::Experiment;
use ph5_core::NodePath;
use ph5_core::OrderTarget;
use ph5_core::ShardName;
use ph5_core::SrmTarget;
use ph5_core::SystemClock;
use ph5_core::TraceBatch;
use ph5_core::TraceRecord;
use ph5_core::runtime::audit::AuditRepair;
use ph5_core::runtime::audit::audit;
use ph5_core::runtime::audit::load_audit_input;
use ph5_core::runtime::backup::BackupStore;
use ph5_core::runtime::catalog::CatalogView;
use ph5_core::runtime::catalog::read_all;
use ph5_core::runtime::ingest::IngestSession;
use ph5_core::runtime::links::LinkReport;
use ph5_core::runtime::links::reconcile;
use ph5_core::runtime::links::stale_links;
use ph5_core::runtime::repair::RepairReport;
use ph5_core::runtime::repair::fix_sample_rate_multiplier;
use ph5_core::runtime::repair::fix_trace_order;
use ph5_core::runtime::rewrite::RepairContext;
use ph5_core::runtime::rewrite::export_table;
use ph5_core::runtime::rewrite::import_kef;
use ph5_store_sqlite::SqliteContainerStore;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a records or kef input file.
const MAX_INPUT_BYTES: u64 = 256 * 1024 * 1024;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "ph5-tools", version, disable_help_subcommand = true)]
struct Cli {
    /// Global experiment settings.
    #[command(flatten)]
    global: GlobalArgs,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
struct GlobalArgs {
    /// Experiment directory (overrides `experiment.path`).
    #[arg(long, value_name = "DIR", global = true)]
    path: Option<PathBuf>,
    /// Master file nickname (overrides `experiment.nickname`).
    #[arg(long, short = 'n', value_name = "NAME", global = true)]
    nickname: Option<String>,
    /// Config file (defaults to `PH5_CONFIG`, then `./ph5.toml`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Raise log verbosity; repeat for more.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new experiment master file.
    Init,
    /// Ingest JSON-lines trace records.
    Ingest(IngestCommand),
    /// Import a kef file into the master file.
    Import(ImportCommand),
    /// Export one table as kef.
    Export(ExportCommand),
    /// List catalog entries.
    Catalog,
    /// Reconcile master-file links with the catalog.
    Links(LinksCommand),
    /// Cross-check deployments, catalog and shards.
    Audit(AuditCommand),
    /// Repair absent or zero sample rate multipliers.
    FixSrm(FixSrmCommand),
    /// Re-sort trace tables by channel and start time.
    FixOrder(FixOrderCommand),
}

/// Arguments for `ingest`.
#[derive(Args, Debug)]
struct IngestCommand {
    /// JSON-lines file of normalized trace records.
    #[arg(long, value_name = "FILE")]
    records: PathBuf,
}

/// Arguments for `import`.
#[derive(Args, Debug)]
struct ImportCommand {
    /// Kef file to import.
    #[arg(long, value_name = "FILE")]
    kef: PathBuf,
}

/// Arguments for `export`.
#[derive(Args, Debug)]
struct ExportCommand {
    /// Table path, e.g. `/Experiment_g/Sorts_g/Array_t_001`.
    #[arg(long, value_name = "PATH")]
    table: String,
    /// Read the table from this shard number instead of the master file.
    #[arg(long, value_name = "N")]
    shard: Option<u32>,
    /// Write to a file instead of stdout.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

/// Arguments for `links`.
#[derive(Args, Debug)]
struct LinksCommand {
    /// Only report stale links; change nothing.
    #[arg(long)]
    check: bool,
}

/// Arguments for `audit`.
#[derive(Args, Debug)]
struct AuditCommand {
    /// Write the pruned view back, behind backups.
    #[arg(long)]
    apply: bool,
}

/// Arguments for `fix-srm`; exactly one target is required.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct FixSrmCommand {
    /// One instrument's trace table.
    #[arg(long, value_name = "SERIAL")]
    das: Option<String>,
    /// Every instrument's trace table.
    #[arg(long = "all-das")]
    all_das: bool,
    /// One deployment table.
    #[arg(long, value_name = "N")]
    array: Option<u32>,
    /// Every deployment table.
    #[arg(long = "all-arrays")]
    all_arrays: bool,
    /// Every trace and deployment table.
    #[arg(long)]
    all: bool,
}

impl FixSrmCommand {
    /// Returns the selected repair target.
    fn target(&self) -> SrmTarget {
        if let Some(serial) = &self.das {
            SrmTarget::Das(DasSerial::new(serial.as_str()))
        } else if let Some(array) = self.array {
            SrmTarget::Array(array)
        } else if self.all_das {
            SrmTarget::AllDas
        } else if self.all_arrays {
            SrmTarget::AllArrays
        } else {
            SrmTarget::All
        }
    }
}

/// Arguments for `fix-order`; exactly one target is required.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct FixOrderCommand {
    /// One instrument's trace table.
    #[arg(long, value_name = "SERIAL")]
    das: Option<String>,
    /// Every instrument's trace table.
    #[arg(long)]
    all: bool,
}

impl FixOrderCommand {
    /// Returns the selected repair target.
    fn target(&self) -> OrderTarget {
        match &self.das {
            Some(serial) => OrderTarget::Das(DasSerial::new(serial.as_str())),
            None => OrderTarget::All,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error carrying a user-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }

    /// Wraps any displayable error.
    #[allow(clippy::needless_pass_by_value, reason = "Used as a map_err callback.")]
    fn from_error(error: impl fmt::Display) -> Self {
        Self::new(error.to_string())
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Parses arguments, installs logging and dispatches the command.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let config = resolve_config(&cli.global)?;
    init_logging(config.logging.level.raised(cli.global.verbose));
    let clock = SystemClock;
    match cli.command {
        Commands::Init => command_init(&config),
        Commands::Ingest(command) => command_ingest(&config, &command, &clock),
        Commands::Import(command) => command_import(&config, &command),
        Commands::Export(command) => command_export(&config, &command, &clock),
        Commands::Catalog => command_catalog(&config),
        Commands::Links(command) => command_links(&config, &command),
        Commands::Audit(command) => command_audit(&config, &command, &clock),
        Commands::FixSrm(command) => {
            let target = command.target();
            command_repair(&config, &clock, "fix-srm", |experiment, ctx| {
                fix_sample_rate_multiplier(experiment, &target, ctx)
            })
        }
        Commands::FixOrder(command) => {
            let target = command.target();
            command_repair(&config, &clock, "fix-order", |experiment, ctx| {
                fix_trace_order(experiment, &target, ctx)
            })
        }
    }
}

/// Loads the config file and applies command-line overrides.
fn resolve_config(global: &GlobalArgs) -> CliResult<Ph5Config> {
    let mut config = Ph5Config::load(global.config.as_deref()).map_err(CliError::from_error)?;
    if let Some(path) = &global.path {
        config.experiment.path.clone_from(path);
    }
    if let Some(nickname) = &global.nickname {
        config.experiment.nickname = Some(nickname.clone());
    }
    config.validate().map_err(CliError::from_error)?;
    Ok(config)
}

/// Installs the stderr log subscriber. `RUST_LOG` wins over `level`.
fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// ============================================================================
// SECTION: Experiment Setup
// ============================================================================

/// Returns the configured nickname or a usage error.
fn nickname(config: &Ph5Config) -> CliResult<&str> {
    config.experiment.nickname.as_deref().ok_or_else(|| {
        CliError::new(
            "no experiment nickname: pass --nickname or set experiment.nickname".to_string(),
        )
    })
}

/// Opens the experiment directory's container store.
fn open_store(config: &Ph5Config) -> CliResult<SqliteContainerStore> {
    SqliteContainerStore::new(config.sqlite_config()).map_err(CliError::from_error)
}

/// Opens the experiment for one batch in `mode`.
fn open_experiment(
    config: &Ph5Config,
    mode: AccessMode,
) -> CliResult<Experiment<SqliteContainerStore>> {
    let store = open_store(config)?;
    let nickname = nickname(config)?;
    tracing::debug!(
        path = %config.experiment.path.display(),
        nickname = %nickname,
        writable = mode.is_writable(),
        "opening experiment"
    );
    Experiment::open(store, nickname, mode).map_err(CliError::from_error)
}

/// Reads a UTF-8 input file, refusing oversized inputs.
fn read_text_with_limit(path: &Path, limit: u64) -> CliResult<String> {
    let file = fs::File::open(path)
        .map_err(|err| CliError::new(format!("cannot open {}: {err}", path.display())))?;
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|err| CliError::new(format!("cannot read {}: {err}", path.display())))?;
    if u64::try_from(bytes.len()).unwrap_or(u64::MAX) > limit {
        return Err(CliError::new(format!(
            "{} exceeds the {limit} byte input limit",
            path.display()
        )));
    }
    String::from_utf8(bytes)
        .map_err(|_| CliError::new(format!("{} must be utf-8", path.display())))
}

/// Parses JSON-lines trace records; blank lines are skipped.
fn parse_records(text: &str) -> CliResult<Vec<TraceRecord>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|err| {
                CliError::new(format!("record on line {}: {err}", index + 1))
            })
        })
        .collect()
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes `init`.
fn command_init(config: &Ph5Config) -> CliResult<ExitCode> {
    let store = open_store(config)?;
    let experiment = Experiment::create(store, nickname(config)?).map_err(CliError::from_error)?;
    emit(&format!(
        "created {} in {}",
        experiment.master_file(),
        config.experiment.path.display()
    ))?;
    experiment.close();
    Ok(ExitCode::SUCCESS)
}

/// Executes `ingest`.
fn command_ingest(
    config: &Ph5Config,
    command: &IngestCommand,
    clock: &SystemClock,
) -> CliResult<ExitCode> {
    let text = read_text_with_limit(&command.records, MAX_INPUT_BYTES)?;
    let batches = TraceBatch::from_records(parse_records(&text)?);
    let mut experiment = open_experiment(config, AccessMode::ReadWrite)?;
    let mut session = IngestSession::new(&mut experiment, config.placement.policy(), clock)
        .map_err(CliError::from_error)?;
    for batch in &batches {
        session.ingest(batch).map_err(CliError::from_error)?;
    }
    let report = session.finish().map_err(CliError::from_error)?;
    let shards: Vec<String> = report.shards.iter().map(ToString::to_string).collect();
    emit(&format!(
        "ingested {} traces in {} batches into [{}]",
        report.traces,
        report.batches,
        shards.join(", ")
    ))?;
    for serial in &report.out_of_order {
        emit(&format!("out of order: {serial} (run fix-order --das {serial})"))?;
    }
    emit(&format!("catalog entries flushed: {}", report.catalog_entries.len()))?;
    emit_links(&report.links)?;
    experiment.close();
    Ok(ExitCode::SUCCESS)
}

/// Executes `import`.
fn command_import(config: &Ph5Config, command: &ImportCommand) -> CliResult<ExitCode> {
    let text = read_text_with_limit(&command.kef, MAX_INPUT_BYTES)?;
    let mut experiment = open_experiment(config, AccessMode::ReadWrite)?;
    let report = import_kef(experiment.master_mut(), &text).map_err(CliError::from_error)?;
    for (table, rows) in &report.tables {
        emit(&format!("{table}: {rows} rows appended"))?;
    }
    experiment.close();
    Ok(ExitCode::SUCCESS)
}

/// Executes `export`.
fn command_export(
    config: &Ph5Config,
    command: &ExportCommand,
    clock: &SystemClock,
) -> CliResult<ExitCode> {
    let mut experiment = open_experiment(config, AccessMode::ReadOnly)?;
    let table = NodePath::new(&command.table);
    let text = match command.shard {
        None => export_table(experiment.master(), &table, clock),
        Some(number) => {
            let shard = ShardName::new(number)
                .ok_or_else(|| CliError::new(format!("shard number out of range: {number}")))?;
            let (store, _, handles) = experiment.parts_mut();
            let handle = handles.open(store, shard).map_err(CliError::from_error)?;
            export_table(&*handle, &table, clock)
        }
    }
    .map_err(CliError::from_error)?;
    match &command.output {
        Some(path) => {
            fs::write(path, &text).map_err(|err| {
                CliError::new(format!("cannot write {}: {err}", path.display()))
            })?;
            emit(&format!("exported {table} to {}", path.display()))?;
        }
        None => write_stdout(text.as_bytes())?,
    }
    experiment.close();
    Ok(ExitCode::SUCCESS)
}

/// Executes `catalog`.
fn command_catalog(config: &Ph5Config) -> CliResult<ExitCode> {
    let experiment = open_experiment(config, AccessMode::ReadOnly)?;
    let entries = read_all(experiment.master()).map_err(CliError::from_error)?;
    for entry in &entries {
        emit(&format!(
            "{}\t{}\t{}\t{}\t{}",
            entry.serial, entry.shard, entry.path, entry.start, entry.stop
        ))?;
    }
    for (serial, locations) in CatalogView::build(&entries).conflicts() {
        let shards: Vec<String> = locations.iter().map(|(shard, _)| shard.to_string()).collect();
        emit(&format!("conflict: {serial} recorded in [{}]", shards.join(", ")))?;
    }
    experiment.close();
    Ok(ExitCode::SUCCESS)
}

/// Executes `links`.
fn command_links(config: &Ph5Config, command: &LinksCommand) -> CliResult<ExitCode> {
    let mode = if command.check { AccessMode::ReadOnly } else { AccessMode::ReadWrite };
    let mut experiment = open_experiment(config, mode)?;
    let entries = read_all(experiment.master()).map_err(CliError::from_error)?;
    if command.check {
        let stale = stale_links(experiment.master(), &entries).map_err(CliError::from_error)?;
        for link in &stale {
            emit(&format!("stale: {} -> {}", link.path, link.target))?;
        }
        emit(&format!("stale links: {}", stale.len()))?;
    } else {
        let report = reconcile(experiment.master_mut(), &entries);
        emit_links(&report)?;
    }
    experiment.close();
    Ok(ExitCode::SUCCESS)
}

/// Executes `audit`.
fn command_audit(
    config: &Ph5Config,
    command: &AuditCommand,
    clock: &SystemClock,
) -> CliResult<ExitCode> {
    let mode = if command.apply { AccessMode::ReadWrite } else { AccessMode::ReadOnly };
    let mut experiment = open_experiment(config, mode)?;
    let input = load_audit_input(&mut experiment).map_err(CliError::from_error)?;
    let outcome = audit(input);
    for (heading, findings) in [
        ("divergence", &outcome.divergences),
        ("observation", &outcome.observations),
        ("manual review", &outcome.manual_review),
    ] {
        for finding in findings {
            emit(&format!("{heading}: {finding}"))?;
        }
    }
    emit(&format!(
        "audit: {} divergences, {} observations, {} for manual review",
        outcome.divergences.len(),
        outcome.observations.len(),
        outcome.manual_review.len()
    ))?;
    if command.apply {
        let backups = BackupStore::new(config.backup_dir());
        let ctx = RepairContext {
            backups: &backups,
            clock,
        };
        let report =
            AuditRepair::new(ctx).apply(&mut experiment, &outcome).map_err(CliError::from_error)?;
        for rewrite in &report.rewrites {
            emit(&format!(
                "rewrote {}: {} -> {} rows (backup {})",
                rewrite.table,
                rewrite.rows_before,
                rewrite.rows_after,
                rewrite.backup.display()
            ))?;
        }
        emit_links(&report.links)?;
    }
    experiment.close();
    Ok(ExitCode::SUCCESS)
}

/// Executes one of the table repairs.
fn command_repair<F, E>(
    config: &Ph5Config,
    clock: &SystemClock,
    label: &str,
    repair: F,
) -> CliResult<ExitCode>
where
    F: FnOnce(&mut Experiment<SqliteContainerStore>, RepairContext<'_>) -> Result<RepairReport, E>,
    E: fmt::Display,
{
    let mut experiment = open_experiment(config, AccessMode::ReadWrite)?;
    let backups = BackupStore::new(config.backup_dir());
    let ctx = RepairContext {
        backups: &backups,
        clock,
    };
    let report = repair(&mut experiment, ctx)
        .map_err(|err| CliError::new(format!("{label}: {err}")))?;
    for rewrite in &report.rewrites {
        emit(&format!("repaired {} (backup {})", rewrite.table, rewrite.backup.display()))?;
    }
    for failure in &report.failures {
        tracing::warn!(table = %failure.table, error = %failure.message, "{label} skipped table");
        emit(&format!("failed {}: {}", failure.table, failure.message))?;
    }
    emit(&format!(
        "{label}: {} repaired, {} untouched, {} failed",
        report.rewrites.len(),
        report.untouched.len(),
        report.failures.len()
    ))?;
    experiment.close();
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Prints a link reconciliation summary and its failures.
fn emit_links(report: &LinkReport) -> CliResult<()> {
    for failure in &report.failures {
        emit(&format!("link failed {}: {}", failure.path, failure.message))?;
    }
    emit(&format!(
        "links: {} created, {} stale removed, {} failed",
        report.created.len(),
        report.removed.len(),
        report.failures.len()
    ))
}

/// Writes one line to stdout.
fn emit(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(&mut stdout, "{message}")
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes raw bytes to stdout.
fn write_stdout(bytes: &[u8]) -> CliResult<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes).map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes one line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(&format!("error: {message}"));
    ExitCode::FAILURE
}
