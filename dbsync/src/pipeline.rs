//! A staged, order-preserving concurrent task pipeline.
//!
//! Tasks enter as a batch and pass through every stage in order. In
//! concurrent mode each stage admits at most `stage_concurrency` tasks at a
//! time, so a slow extract on one table does not stop another table from
//! loading, while no single stage can overwhelm a database with too many
//! simultaneous operations. Results come back in input order regardless of
//! completion order.
//!
//! A task failure is isolated: the failed task is dropped from further
//! stages and reported in the output slot it would have occupied, while
//! every other task continues.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{DbsyncError, DbsyncResult, ErrorKind};

/// A unit of work flowing through a [`Pipeline`].
pub trait Task: Send + 'static {
    /// Stable identifier used to report which task failed. Survives the task
    /// itself, which is consumed by the stage that fails it.
    fn tag(&self) -> String;
}

/// One processing step applied to every task.
///
/// Stages transform tasks; a stage returning `Err` fails that task only.
#[async_trait]
pub trait Stage<T: Task>: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, task: T) -> DbsyncResult<T>;
}

/// A task that did not make it through every stage.
#[derive(Debug)]
pub struct TaskFailure {
    pub tag: String,
    pub error: DbsyncError,
}

/// Terminal state of one task after a [`Pipeline::run`].
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Done(T),
    Failed(TaskFailure),
}

impl<T> TaskOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskOutcome::Done(_))
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            TaskOutcome::Done(_) => None,
            TaskOutcome::Failed(failure) => Some(failure),
        }
    }
}

/// How tasks are scheduled across stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// One task at a time through all stages. Deterministic; used by tests
    /// and one-shot command invocations.
    Sequential,
    /// All tasks in flight at once, bounded per stage.
    Concurrent { stage_concurrency: usize },
}

/// Runs a batch of tasks through an ordered list of stages.
pub struct Pipeline<T: Task> {
    stages: Vec<Arc<dyn Stage<T>>>,
    mode: PipelineMode,
}

impl<T: Task> Pipeline<T> {
    pub fn new(stages: Vec<Arc<dyn Stage<T>>>, mode: PipelineMode) -> Self {
        Self { stages, mode }
    }

    /// Processes `tasks` and returns one outcome per task, in input order.
    pub async fn run(&self, tasks: Vec<T>) -> Vec<TaskOutcome<T>> {
        match self.mode {
            PipelineMode::Sequential => self.run_sequential(tasks).await,
            PipelineMode::Concurrent { stage_concurrency } => {
                self.run_concurrent(tasks, stage_concurrency.max(1)).await
            }
        }
    }

    async fn run_sequential(&self, tasks: Vec<T>) -> Vec<TaskOutcome<T>> {
        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            outcomes.push(apply_stages(&self.stages, task, &[]).await);
        }
        outcomes
    }

    async fn run_concurrent(
        &self,
        tasks: Vec<T>,
        stage_concurrency: usize,
    ) -> Vec<TaskOutcome<T>> {
        let gates: Vec<Arc<Semaphore>> = self
            .stages
            .iter()
            .map(|_| Arc::new(Semaphore::new(stage_concurrency)))
            .collect();

        let mut set = JoinSet::new();
        let task_count = tasks.len();
        for (index, task) in tasks.into_iter().enumerate() {
            let stages = self.stages.clone();
            let gates = gates.clone();
            set.spawn(async move {
                let outcome = apply_stages(&stages, task, &gates).await;
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<TaskOutcome<T>>> =
            (0..task_count).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(join_err) => {
                    // A panicking task aborts its own slot only. The tag is
                    // unrecoverable at this point; the index still is not
                    // known, so record it against the first empty slot.
                    error!(error = %join_err, "pipeline worker panicked");
                    if let Some(slot) = outcomes.iter_mut().find(|slot| slot.is_none()) {
                        *slot = Some(TaskOutcome::Failed(TaskFailure {
                            tag: "<panicked>".to_string(),
                            error: DbsyncError::from((
                                ErrorKind::WorkerPanic,
                                "A pipeline worker panicked",
                                join_err.to_string(),
                            )),
                        }));
                    }
                }
            }
        }

        outcomes
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    TaskOutcome::Failed(TaskFailure {
                        tag: "<lost>".to_string(),
                        error: DbsyncError::from((
                            ErrorKind::WorkerPanic,
                            "A pipeline worker produced no outcome",
                        )),
                    })
                })
            })
            .collect()
    }
}

async fn apply_stages<T: Task>(
    stages: &[Arc<dyn Stage<T>>],
    mut task: T,
    gates: &[Arc<Semaphore>],
) -> TaskOutcome<T> {
    let mut tag = task.tag();
    for (stage_index, stage) in stages.iter().enumerate() {
        // Closed semaphores cannot occur; the gates live as long as the run.
        let _permit = match gates.get(stage_index) {
            Some(gate) => Some(gate.clone().acquire_owned().await.expect("gate closed")),
            None => None,
        };

        debug!(task = %tag, stage = stage.name(), "entering stage");
        match stage.apply(task).await {
            Ok(next) => {
                task = next;
                tag = task.tag();
            }
            Err(error) => {
                return TaskOutcome::Failed(TaskFailure { tag, error });
            }
        }
    }

    TaskOutcome::Done(task)
}
