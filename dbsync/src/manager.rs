//! The replication manager: selects which tables get which load policy and
//! drives them through the pipeline.
//!
//! Three entry points mirror the three policies. `batch_nonactive` reloads
//! tables that have no checkpoint yet (or that an operator named
//! explicitly), `refresh_recent` repairs trailing windows, and
//! `increment_active` loops tail syncs over every checkpointed table until
//! asked to stop.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{info, warn};

use config::shared::ManagerConfig;

use crate::actions::{
    load_stages, BatchLoadAction, IncrementalLoadAction, LoadAction, LoadContext, LoadJob,
    RefreshRecentLoadAction,
};
use crate::bail;
use crate::error::{DbsyncError, DbsyncResult, ErrorKind};
use crate::pipeline::{Pipeline, PipelineMode, TaskOutcome};
use crate::plan::TablePlan;
use crate::plans::TablePlanProvider;
use crate::registry::REGISTRY_TABLE_NAME;
use crate::reporter::ErrorReporter;
use crate::verifier::ConsistencyVerifier;

/// Cooperative stop signal for [`Manager::increment_active`].
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Manager {
    providers: Vec<Arc<dyn TablePlanProvider>>,
    ctx: LoadContext,
    verifier: ConsistencyVerifier,
    reporter: Arc<dyn ErrorReporter>,
    config: ManagerConfig,
    mode: PipelineMode,
    stop: StopHandle,
}

impl Manager {
    pub fn new(
        providers: Vec<Arc<dyn TablePlanProvider>>,
        ctx: LoadContext,
        reporter: Arc<dyn ErrorReporter>,
        config: ManagerConfig,
    ) -> Self {
        let verifier =
            ConsistencyVerifier::new(ctx.target.clone(), ctx.registry.clone(), ctx.overlap);
        let mode = PipelineMode::Concurrent {
            stage_concurrency: config.stage_concurrency as usize,
        };

        Self {
            providers,
            ctx,
            verifier,
            reporter,
            config,
            mode,
            stop: StopHandle::default(),
        }
    }

    /// Switches the pipeline into one-task-at-a-time mode, mainly for
    /// deterministic tests and debugging sessions.
    pub fn sequential(mut self) -> Self {
        self.mode = PipelineMode::Sequential;
        self
    }

    /// Handle that makes [`increment_active`](Self::increment_active) return
    /// after its current cycle.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Collects plans from every provider. When two providers (or two
    /// sources) plan the same target table, the first provider wins.
    pub async fn plans(&self) -> DbsyncResult<Vec<TablePlan>> {
        let mut seen = BTreeSet::new();
        let mut plans = Vec::new();

        for provider in &self.providers {
            for plan in provider.table_plans().await? {
                if seen.insert(plan.table_name.clone()) {
                    plans.push(plan);
                } else {
                    warn!(
                        table = %plan.table_name,
                        source = plan.source.name(),
                        "duplicate plan for table, keeping the first"
                    );
                }
            }
        }

        Ok(plans)
    }

    /// Batch-loads every table that is not yet incrementally active, or
    /// exactly the named tables.
    ///
    /// Naming an unplanned table is an operator error and fails before any
    /// work starts. Named tables are loaded even when their plan opted out
    /// of batch loading; asking by name overrides the opt-out.
    pub async fn batch_nonactive(&self, tables: &[String]) -> DbsyncResult<()> {
        self.ctx.registry.ensure_storage_exists().await?;
        let all_plans = self.plans().await?;

        let selected = if tables.is_empty() {
            let mut nonactive = Vec::new();
            for plan in all_plans.iter().filter(|plan| plan.batch_load) {
                if self.ctx.registry.get(&plan.table_name).await?.is_none() {
                    nonactive.push(plan.clone());
                }
            }
            nonactive
        } else {
            let mut named = Vec::new();
            for table in tables {
                let Some(plan) = all_plans.iter().find(|plan| &plan.table_name == table) else {
                    bail!(
                        ErrorKind::UnknownTable,
                        "Table is not planned by any source",
                        table.clone()
                    );
                };
                let mut plan = plan.clone();
                plan.batch_load = true;
                named.push(plan);
            }
            named
        };

        info!(tables = selected.len(), "starting batch load");
        let result = self
            .run_actions(selected, |ctx, plan| {
                Box::new(BatchLoadAction::new(ctx, plan))
            })
            .await;

        if !tables.is_empty() {
            return result;
        }

        // A purge failure must not swallow the per-table load failures.
        match (result, self.purge_old_tables(&all_plans).await) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(error), Ok(())) | (Ok(()), Err(error)) => Err(error),
            (Err(load_error), Err(purge_error)) => {
                Err(DbsyncError::from(vec![load_error, purge_error]))
            }
        }
    }

    /// Runs a windowed refresh over every refresh-enabled table, or exactly
    /// the named tables.
    pub async fn refresh_recent(&self, tables: &[String]) -> DbsyncResult<()> {
        self.ctx.registry.ensure_storage_exists().await?;
        let all_plans = self.plans().await?;

        let selected = if tables.is_empty() {
            all_plans
                .iter()
                .filter(|plan| plan.refresh_recent.is_enabled())
                .cloned()
                .collect()
        } else {
            let mut named = Vec::new();
            for table in tables {
                let Some(plan) = all_plans.iter().find(|plan| &plan.table_name == table) else {
                    bail!(
                        ErrorKind::UnknownTable,
                        "Table is not planned by any source",
                        table.clone()
                    );
                };
                named.push(plan.clone());
            }
            named
        };

        info!(tables = selected.len(), "starting refresh-recent load");
        self.run_actions(selected, |ctx, plan| {
            Box::new(RefreshRecentLoadAction::new(ctx, plan))
        })
        .await
    }

    /// Tail-syncs every active table in a loop until stopped.
    ///
    /// Transient failures (target lock contention, extraction hiccups) are
    /// retried after a delay, up to `max_consecutive_failures` in a row; any
    /// other failure ends the loop. Maintenance (consistency verification
    /// and purging) runs on the first cycle and then periodically.
    pub async fn increment_active(&self) -> DbsyncResult<()> {
        self.ctx.registry.ensure_storage_exists().await?;

        let mut cycle: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        while !self.stop.is_stopped() {
            cycle += 1;
            match self.increment_cycle(cycle).await {
                Ok(()) => consecutive_failures = 0,
                Err(error) if error.is_transient() => {
                    consecutive_failures += 1;
                    warn!(
                        consecutive_failures,
                        error = %error,
                        "transient failure in incremental cycle"
                    );
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        return Err(error);
                    }
                    tokio::time::sleep(StdDuration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(error) => return Err(error),
            }
        }

        info!(cycles = cycle, "incremental loop stopped");

        Ok(())
    }

    /// One pass over the active tables. Public so one-shot invocations and
    /// tests can run a single cycle.
    pub async fn increment_cycle(&self, cycle: u64) -> DbsyncResult<()> {
        let all_plans = self.plans().await?;

        let mut active = Vec::new();
        for plan in &all_plans {
            if plan.always_sync || self.ctx.registry.get(&plan.table_name).await?.is_some() {
                active.push(plan.clone());
            }
        }

        let result = self
            .run_actions(active.clone(), |ctx, plan| {
                Box::new(IncrementalLoadAction::new(ctx, plan))
            })
            .await;

        let maintenance_every = self.config.maintenance_every_cycles;
        if maintenance_every <= 1 || cycle % maintenance_every == 1 {
            self.run_maintenance(&all_plans, &active).await?;
        }

        result
    }

    /// Consistency verification plus purging, off the hot path.
    ///
    /// Consistency mismatches are detection-only: they are reported, not
    /// returned, so a drifted table does not stop replication of the rest.
    async fn run_maintenance(
        &self,
        all_plans: &[TablePlan],
        active: &[TablePlan],
    ) -> DbsyncResult<()> {
        if let Err(error) = self.verifier.verify_all(active).await {
            self.reporter.report("consistency", &error);
        }

        self.purge_old_tables(all_plans).await?;

        Ok(())
    }

    /// Drops target tables (and checkpoints) that no plan claims any more.
    /// Metadata tables are never purged.
    async fn purge_old_tables(&self, plans: &[TablePlan]) -> DbsyncResult<()> {
        let planned: Vec<String> = plans.iter().map(|plan| plan.table_name.clone()).collect();

        for table in self.ctx.target.list_tables().await? {
            if table.starts_with("meta_") || table == REGISTRY_TABLE_NAME {
                continue;
            }
            let is_planned = planned.iter().any(|name| {
                name == &table || format!("new_{name}") == table || format!("old_{name}") == table
            });
            if !is_planned {
                info!(table = %table, "purging table no longer planned");
                self.ctx.target.drop_table(&table).await?;
            }
        }

        let purged = self.ctx.registry.purge_except(&planned).await?;
        if purged > 0 {
            info!(purged, "purged stale checkpoints");
        }

        Ok(())
    }

    async fn run_actions<F>(&self, plans: Vec<TablePlan>, make: F) -> DbsyncResult<()>
    where
        F: Fn(LoadContext, TablePlan) -> Box<dyn LoadAction>,
    {
        let jobs: Vec<LoadJob> = plans
            .into_iter()
            .map(|plan| LoadJob::new(make(self.ctx.clone(), plan), self.ctx.sink.clone()))
            .collect();

        let pipeline = Pipeline::new(load_stages(), self.mode);
        let outcomes = pipeline.run(jobs).await;

        let mut errors = Vec::new();
        for outcome in outcomes {
            if let TaskOutcome::Failed(failure) = outcome {
                self.reporter.report(&failure.tag, &failure.error);
                errors.push(failure.error);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DbsyncError::from(errors))
        }
    }
}
