// crates/ph5-core/tests/common/mod.rs
// ============================================================================
// Module: Shared Test Fixtures
// Description: In-memory experiments, fixed clocks and record builders.
// Purpose: Give every integration test the same deterministic starting point.
// ============================================================================

//! Shared fixtures for ph5-core integration tests.

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Shared fixtures are used by a subset of test binaries."
)]

use ph5_core::DasSerial;
use ph5_core::Deployment;
use ph5_core::Experiment;
use ph5_core::FixedClock;
use ph5_core::InMemoryContainerStore;
use ph5_core::Location;
use ph5_core::Ph5Time;
use ph5_core::PlacementPolicy;
use ph5_core::runtime::backup::BackupStore;
use ph5_core::runtime::ingest::IngestReport;
use ph5_core::runtime::ingest::IngestSession;
use ph5_core::runtime::ingest::IngestTrace;
use ph5_core::runtime::ingest::TraceBatch;
use ph5_core::runtime::registry::DeploymentRegistry;
use ph5_core::runtime::rewrite::RepairContext;
use tempfile::TempDir;

/// Nickname used by every fixture experiment.
pub const NICKNAME: &str = "master";

/// An in-memory experiment with a backup directory and a fixed clock.
pub struct Fixture {
    /// Store shared with the experiment.
    pub store: InMemoryContainerStore,
    /// Experiment opened read-write.
    pub experiment: Experiment<InMemoryContainerStore>,
    /// Backup store rooted in `dir`.
    pub backups: BackupStore,
    /// Clock pinned to 2024-01-01.
    pub clock: FixedClock,
    /// Temporary backup directory.
    pub dir: TempDir,
}

impl Fixture {
    /// Creates an empty experiment.
    pub fn new() -> Self {
        let store = InMemoryContainerStore::new();
        let experiment = Experiment::create(store.clone(), NICKNAME).expect("create experiment");
        let dir = TempDir::new().expect("tempdir");
        Self {
            store,
            experiment,
            backups: BackupStore::new(dir.path()),
            clock: FixedClock(Ph5Time::from_epoch(1_704_067_200)),
            dir,
        }
    }

    /// Splits the fixture into the experiment and a repair context writing
    /// into the fixture's backup directory.
    pub fn parts(
        &mut self,
    ) -> (&mut Experiment<InMemoryContainerStore>, RepairContext<'_>) {
        let ctx = RepairContext {
            backups: &self.backups,
            clock: &self.clock,
        };
        (&mut self.experiment, ctx)
    }

    /// Ingests batches in one session with `policy` and returns the report.
    pub fn ingest_with(&mut self, policy: PlacementPolicy, batches: &[TraceBatch]) -> IngestReport {
        let clock = self.clock;
        let mut session =
            IngestSession::new(&mut self.experiment, policy, &clock).expect("start session");
        for batch in batches {
            session.ingest(batch).expect("ingest batch");
        }
        session.finish().expect("finish session")
    }

    /// Ingests batches in one session with the default policy.
    pub fn ingest(&mut self, batches: &[TraceBatch]) -> IngestReport {
        self.ingest_with(PlacementPolicy::default(), batches)
    }

    /// Appends deployments to `Array_t_{array}`.
    pub fn deploy(&mut self, array: u32, deployments: &[Deployment]) {
        let master = self.experiment.master_mut();
        let mut registry = DeploymentRegistry::load(master).expect("load registry");
        registry.append(master, array, deployments).expect("append deployments");
    }
}

/// Builds a trace of `count` samples at 100 Hz starting at `epoch`.
pub fn trace(channel: i64, epoch: i64, count: usize) -> IngestTrace {
    IngestTrace {
        channel,
        start: Ph5Time::from_epoch(epoch),
        sample_rate: 100,
        multiplier: 1,
        samples: vec![7; count],
        raw_file: "field.rt130".to_string(),
    }
}

/// Builds a batch for `serial`.
pub fn batch(serial: &str, traces: Vec<IngestTrace>) -> TraceBatch {
    TraceBatch {
        serial: DasSerial::new(serial),
        traces,
    }
}

/// Builds a deployment with multiplier 1.
pub fn deployment(serial: &str, channel: i64, deploy: i64, pickup: i64) -> Deployment {
    Deployment {
        array: 1,
        row: 0,
        station: format!("{serial}-{channel}"),
        serial: DasSerial::new(serial),
        channel,
        deploy: Ph5Time::from_epoch(deploy),
        pickup: Ph5Time::from_epoch(pickup),
        sample_rate: 100,
        multiplier: Some(1),
        location: Location {
            x: -106.9,
            y: 34.07,
            z: 1_450.5,
        },
    }
}
