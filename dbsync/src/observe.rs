//! Timing measurement around every extract/load/switch step.
//!
//! Import time grows with the data sources, and it is critical to know when
//! it grows past what replication can absorb. Every stage body is wrapped in
//! [`measure`], which emits a `(operation, stage, table) -> duration` event
//! to the configured [`MeasurementSink`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::error::DbsyncResult;

/// Identifies one measured step: the load policy, the stage within it, and
/// the table being processed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeasureLabel {
    pub operation: &'static str,
    pub stage: &'static str,
    pub table: String,
}

impl MeasureLabel {
    pub fn new(operation: &'static str, stage: &'static str, table: impl Into<String>) -> Self {
        Self {
            operation,
            stage,
            table: table.into(),
        }
    }
}

impl fmt::Display for MeasureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.operation, self.stage, self.table)
    }
}

/// Outcome attached to a recorded measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureOutcome {
    Finished,
    Failed,
}

/// Sink for timing measurements and free-form log lines.
///
/// External timing dashboards hang off this interface; the core only
/// guarantees that every extract/load/switch/catch-up step is reported.
pub trait MeasurementSink: Send + Sync {
    /// Records the duration of one measured step.
    fn record(&self, label: &MeasureLabel, duration: Duration, outcome: MeasureOutcome);

    /// Emits a free-form message (e.g. a skipped table).
    fn log(&self, message: &str);
}

/// Times `fut` and reports it to `sink`, passing the result through.
pub async fn measure<T, F>(
    sink: &Arc<dyn MeasurementSink>,
    label: MeasureLabel,
    fut: F,
) -> DbsyncResult<T>
where
    F: Future<Output = DbsyncResult<T>>,
{
    let started = Instant::now();
    let result = fut.await;

    let outcome = match &result {
        Ok(_) => MeasureOutcome::Finished,
        Err(_) => MeasureOutcome::Failed,
    };
    sink.record(&label, started.elapsed(), outcome);

    result
}

/// Production sink that forwards measurements to the tracing subscriber.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl MeasurementSink for TracingSink {
    fn record(&self, label: &MeasureLabel, duration: Duration, outcome: MeasureOutcome) {
        match outcome {
            MeasureOutcome::Finished => info!(
                operation = label.operation,
                stage = label.stage,
                table = %label.table,
                duration_ms = duration.as_millis() as u64,
                "step finished"
            ),
            MeasureOutcome::Failed => error!(
                operation = label.operation,
                stage = label.stage,
                table = %label.table,
                duration_ms = duration.as_millis() as u64,
                "step failed"
            ),
        }
    }

    fn log(&self, message: &str) {
        info!("{message}");
    }
}

/// Sink that discards everything, for contexts where instrumentation is not
/// required.
#[derive(Debug, Default, Clone)]
pub struct NullSink;

impl MeasurementSink for NullSink {
    fn record(&self, _label: &MeasureLabel, _duration: Duration, _outcome: MeasureOutcome) {}

    fn log(&self, _message: &str) {}
}
