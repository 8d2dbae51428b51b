//! Shared wiring for the integration tests: in-memory databases, a manual
//! clock and recording observers, assembled the way the binary assembles the
//! real components.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use config::shared::ManagerConfig;
use dbsync::actions::{load_stages, LoadAction, LoadContext, LoadJob};
use dbsync::db::memory::MemoryDb;
use dbsync::error::{DbsyncError, ErrorKind};
use dbsync::pipeline::{Pipeline, PipelineMode, TaskOutcome};
use dbsync::registry::{Checkpoint, MemoryRegistry};
use dbsync::reporter::ErrorReporter;
use dbsync::test_utils::{ManualClock, RecordingSink, ts};
use telemetry::tracing::init_test_tracing;

pub struct Harness {
    pub source: MemoryDb,
    pub target: MemoryDb,
    pub registry: MemoryRegistry,
    pub clock: ManualClock,
    pub sink: RecordingSink,
    pub config: ManagerConfig,
}

impl Harness {
    pub fn new() -> Self {
        init_test_tracing();

        let target = MemoryDb::new("target_db");
        let registry = MemoryRegistry::new();
        // Checkpoints live in the target database, as in production.
        target.attach_registry(Arc::new(registry.clone()));

        Self {
            source: MemoryDb::new("source_db"),
            target,
            registry,
            clock: ManualClock::starting_at(ts(2024, 5, 1, 12, 0, 0)),
            sink: RecordingSink::new(),
            config: ManagerConfig::default(),
        }
    }

    pub fn ctx(&self) -> LoadContext {
        LoadContext::new(
            Arc::new(self.target.clone()),
            Arc::new(self.registry.clone()),
            Arc::new(self.sink.clone()),
            self.clock.clock(),
            &self.config,
            None,
        )
    }

    /// A checkpoint whose fields all point at the same instant.
    pub fn checkpoint_at(&self, at: DateTime<Utc>) -> Checkpoint {
        Checkpoint {
            last_synced_at: at,
            last_row_at: Some(at),
            last_batch_synced_at: Some(at),
        }
    }
}

/// Runs one action through the staged pipeline, as the manager would.
pub async fn run_action(
    action: impl LoadAction + 'static,
    sink: &RecordingSink,
) -> TaskOutcome<LoadJob> {
    let pipeline = Pipeline::new(load_stages(), PipelineMode::Sequential);
    let mut outcomes = pipeline
        .run(vec![LoadJob::new(Box::new(action), Arc::new(sink.clone()))])
        .await;
    outcomes.remove(0)
}

/// Reporter capturing `(table, kind)` pairs for assertions.
#[derive(Debug, Default, Clone)]
pub struct RecordingReporter {
    reports: Arc<Mutex<Vec<(String, ErrorKind)>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, ErrorKind)> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, table: &str, error: &DbsyncError) {
        self.reports
            .lock()
            .unwrap()
            .push((table.to_string(), error.kind()));
    }
}
