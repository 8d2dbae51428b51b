//! Load actions: the per-table state machines run through the pipeline.
//!
//! Every policy (batch, incremental, refresh-recent) advances through the
//! same four phases: prepare, extract, load, finalize. A phase can decide the
//! table needs no work this cycle and return [`StageOutcome::Skip`]; the job
//! then rides through the remaining phases untouched and counts as completed
//! without work, not as failed.

mod base;
mod batch;
mod incremental;
mod refresh;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;

use config::shared::ManagerConfig;

pub use batch::BatchLoadAction;
pub use incremental::IncrementalLoadAction;
pub use refresh::RefreshRecentLoadAction;

use crate::clock::Clock;
use crate::db::adapter::{DatabaseAdapter, DeleteReconciler};
use crate::error::DbsyncResult;
use crate::observe::{measure, MeasureLabel, MeasurementSink};
use crate::pipeline::{Stage, Task};
use crate::registry::TableRegistry;

/// Lock-wait ceiling (seconds) applied to the target before loads, so a
/// wedged reader fails the load quickly instead of stalling the whole cycle.
pub const LOAD_LOCK_TIMEOUT_SECONDS: u32 = 10;

/// What a phase decided about the rest of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Proceed to the next phase.
    Continue,
    /// Nothing to do for this table this cycle; skip the remaining phases.
    Skip,
}

/// One per-table load policy advancing through the four phases.
#[async_trait]
pub trait LoadAction: Send {
    /// Policy name used in measurement labels.
    fn operation(&self) -> &'static str;

    /// Target-side table name; doubles as the job tag.
    fn table_name(&self) -> &str;

    async fn prepare(&mut self) -> DbsyncResult<StageOutcome>;

    async fn extract(&mut self) -> DbsyncResult<StageOutcome>;

    async fn load(&mut self) -> DbsyncResult<StageOutcome>;

    async fn finalize(&mut self) -> DbsyncResult<StageOutcome>;
}

/// Everything a load action needs besides its table plan.
#[derive(Clone)]
pub struct LoadContext {
    pub target: Arc<dyn DatabaseAdapter>,
    pub registry: Arc<dyn TableRegistry>,
    pub sink: Arc<dyn MeasurementSink>,
    pub clock: Clock,
    /// Re-extraction overlap compensating for rows committed with an earlier
    /// watermark than already-seen rows.
    pub overlap: Duration,
    /// Staleness bound the batch catch-up loop converges to.
    pub batch_max_lag: Duration,
    /// How far back a refresh-recent pass reaches.
    pub refresh_window: Duration,
    pub reconciler: Option<Arc<dyn DeleteReconciler>>,
}

impl LoadContext {
    pub fn new(
        target: Arc<dyn DatabaseAdapter>,
        registry: Arc<dyn TableRegistry>,
        sink: Arc<dyn MeasurementSink>,
        clock: Clock,
        config: &ManagerConfig,
        reconciler: Option<Arc<dyn DeleteReconciler>>,
    ) -> Self {
        Self {
            target,
            registry,
            sink,
            clock,
            overlap: Duration::seconds(config.overlap_secs as i64),
            batch_max_lag: Duration::seconds(config.batch_max_lag_secs as i64),
            refresh_window: Duration::seconds(config.refresh_window_secs as i64),
            reconciler,
        }
    }
}

/// A boxed action plus the "still in play" flag the stages consult.
pub struct LoadJob {
    action: Box<dyn LoadAction>,
    sink: Arc<dyn MeasurementSink>,
    active: bool,
}

impl LoadJob {
    pub fn new(action: Box<dyn LoadAction>, sink: Arc<dyn MeasurementSink>) -> Self {
        Self {
            action,
            sink,
            active: true,
        }
    }

    /// Whether the job ran every phase (as opposed to skipping out early).
    pub fn ran_to_completion(&self) -> bool {
        self.active
    }

    pub fn table_name(&self) -> &str {
        self.action.table_name()
    }
}

impl Task for LoadJob {
    fn tag(&self) -> String {
        self.action.table_name().to_string()
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Prepare,
    Extract,
    Load,
    Finalize,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Extract => "extract",
            Phase::Load => "load",
            Phase::Finalize => "finalize",
        }
    }
}

/// Adapter presenting one action phase as a pipeline stage.
struct ActionStage {
    phase: Phase,
}

#[async_trait]
impl Stage<LoadJob> for ActionStage {
    fn name(&self) -> &str {
        self.phase.name()
    }

    async fn apply(&self, mut job: LoadJob) -> DbsyncResult<LoadJob> {
        if !job.active {
            return Ok(job);
        }

        let label = MeasureLabel::new(
            job.action.operation(),
            self.phase.name(),
            job.action.table_name(),
        );
        let sink = job.sink.clone();
        let phase = self.phase;
        let outcome = measure(&sink, label, async {
            match phase {
                Phase::Prepare => job.action.prepare().await,
                Phase::Extract => job.action.extract().await,
                Phase::Load => job.action.load().await,
                Phase::Finalize => job.action.finalize().await,
            }
        })
        .await?;

        if outcome == StageOutcome::Skip {
            job.active = false;
        }

        Ok(job)
    }
}

/// The four phases as pipeline stages, in execution order.
pub fn load_stages() -> Vec<Arc<dyn Stage<LoadJob>>> {
    vec![
        Arc::new(ActionStage {
            phase: Phase::Prepare,
        }),
        Arc::new(ActionStage {
            phase: Phase::Extract,
        }),
        Arc::new(ActionStage { phase: Phase::Load }),
        Arc::new(ActionStage {
            phase: Phase::Finalize,
        }),
    ]
}
