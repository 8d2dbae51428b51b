//! Tail-sync policy: merge rows newer than the checkpoint into the live
//! table, re-reading a fixed overlap to absorb out-of-order commits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::actions::base::{resolve_source_table, target_column_names};
use crate::actions::{LoadAction, LoadContext, StageOutcome, LOAD_LOCK_TIMEOUT_SECONDS};
use crate::bail;
use crate::clock::epoch;
use crate::db::adapter::TargetTransaction;
use crate::error::{DbsyncResult, ErrorKind};
use crate::plan::TablePlan;
use crate::registry::{Checkpoint, CheckpointUpdate};
use crate::schema::table_definition;
use crate::staging::StagingFile;

pub struct IncrementalLoadAction {
    ctx: LoadContext,
    plan: TablePlan,
    columns: Vec<String>,
    watermark: Option<String>,
    checkpoint: Option<Checkpoint>,
    staging: Option<StagingFile>,
    /// The open target transaction carrying the merge (and reconciliation)
    /// from the load phase into the checkpoint update at finalize.
    tx: Option<Box<dyn TargetTransaction>>,
    start_time: Option<DateTime<Utc>>,
    observed_row_at: Option<DateTime<Utc>>,
}

impl IncrementalLoadAction {
    pub fn new(ctx: LoadContext, plan: TablePlan) -> Self {
        Self {
            ctx,
            plan,
            columns: Vec::new(),
            watermark: None,
            checkpoint: None,
            staging: None,
            tx: None,
            start_time: None,
            observed_row_at: None,
        }
    }

    fn checkpoint(&self) -> DbsyncResult<Checkpoint> {
        match self.checkpoint {
            Some(checkpoint) => Ok(checkpoint),
            None => bail!(
                ErrorKind::MissingCheckpoint,
                "Incremental sync has no checkpoint",
                self.plan.table_name.clone()
            ),
        }
    }

    /// Tables synced regardless of batch state get a target table and an
    /// epoch checkpoint on first sight, so the next extraction pulls their
    /// full history through the incremental path.
    async fn bootstrap(&mut self) -> DbsyncResult<()> {
        let resolved = resolve_source_table(&self.plan, None).await?;
        let definition = table_definition(
            &self.plan,
            &resolved.schema,
            &resolved.columns,
            &self.plan.table_name,
        );
        self.ctx.target.create_table(&definition).await?;

        self.ctx
            .registry
            .set_force(
                &self.plan.table_name,
                Checkpoint {
                    last_synced_at: epoch(),
                    last_row_at: None,
                    last_batch_synced_at: Some(epoch()),
                },
            )
            .await?;

        self.ctx.sink.log(&format!(
            "bootstrapped always-sync table {}",
            self.plan.table_name
        ));

        Ok(())
    }

    /// The source table is gone. Always-sync tables follow it out of the
    /// target; everything else is left alone for a later batch decision.
    async fn handle_missing_source(&mut self) -> DbsyncResult<StageOutcome> {
        if self.plan.always_sync {
            self.ctx.target.drop_table(&self.plan.table_name).await?;
            self.ctx.registry.delete(&self.plan.table_name).await?;
            self.ctx.sink.log(&format!(
                "{} vanished from source {}, dropped from target",
                self.plan.source_table_name,
                self.plan.source.name()
            ));
        } else {
            self.ctx.sink.log(&format!(
                "{} does not exist in source {}, skipping incremental sync",
                self.plan.source_table_name,
                self.plan.source.name()
            ));
        }

        Ok(StageOutcome::Skip)
    }
}

#[async_trait]
impl LoadAction for IncrementalLoadAction {
    fn operation(&self) -> &'static str {
        "incremental"
    }

    fn table_name(&self) -> &str {
        &self.plan.table_name
    }

    async fn prepare(&mut self) -> DbsyncResult<StageOutcome> {
        if !self
            .plan
            .source
            .table_exists(&self.plan.source_table_name)
            .await?
        {
            return self.handle_missing_source().await;
        }

        let mut checkpoint = self.ctx.registry.get(&self.plan.table_name).await?;
        let mut target_exists = self.ctx.target.table_exists(&self.plan.table_name).await?;

        if self.plan.always_sync && (checkpoint.is_none() || !target_exists) {
            self.bootstrap().await?;
            checkpoint = self.ctx.registry.get(&self.plan.table_name).await?;
            target_exists = true;
        }

        if checkpoint.is_none() {
            self.ctx.sink.log(&format!(
                "{} has no checkpoint, awaiting its first batch load",
                self.plan.table_name
            ));
            return Ok(StageOutcome::Skip);
        }
        if !target_exists {
            // The checkpoint says this table is replicated; recreate the
            // target rather than stalling until someone intervenes.
            let resolved = resolve_source_table(&self.plan, None).await?;
            let definition = table_definition(
                &self.plan,
                &resolved.schema,
                &resolved.columns,
                &self.plan.table_name,
            );
            self.ctx.target.create_table(&definition).await?;
            self.ctx.sink.log(&format!(
                "{} was missing from target, recreated before sync",
                self.plan.table_name
            ));
        }

        let target_columns =
            target_column_names(self.ctx.target.as_ref(), &self.plan.table_name).await?;
        let resolved = resolve_source_table(&self.plan, Some(&target_columns)).await?;
        if resolved.watermark.is_none() {
            self.ctx.sink.log(&format!(
                "{} has no watermark column, cannot sync incrementally",
                self.plan.table_name
            ));
            return Ok(StageOutcome::Skip);
        }

        self.columns = resolved.columns;
        self.watermark = resolved.watermark;
        self.checkpoint = checkpoint;

        Ok(StageOutcome::Continue)
    }

    async fn extract(&mut self) -> DbsyncResult<StageOutcome> {
        let checkpoint = self.checkpoint()?;
        let Some(watermark) = self.watermark.clone() else {
            bail!(
                ErrorKind::InvalidState,
                "Incremental extract ran before prepare",
                self.plan.table_name.clone()
            );
        };

        self.plan.source.ensure_connection().await?;

        // Resume from the newest point we know about. The recorded row
        // watermark beats the sync start time when the source clock runs
        // ahead; the sync start time beats it when the table was empty.
        let since = checkpoint
            .last_row_at
            .map_or(checkpoint.last_synced_at, |row_at| {
                row_at.max(checkpoint.last_synced_at)
            });

        self.start_time = Some((self.ctx.clock)());
        self.observed_row_at = self
            .plan
            .source
            .max_watermark(&self.plan.source_table_name, &watermark)
            .await?;

        let staging = StagingFile::create(&self.plan.table_name)?;
        let rows = self
            .plan
            .source
            .extract_incrementally_to_file(
                &self.plan.source_table_name,
                &self.columns,
                &watermark,
                staging.path(),
                since,
                self.ctx.overlap,
            )
            .await?;
        debug!(table = %self.plan.table_name, rows, since = %since, "extracted tail");

        self.staging = Some(staging);

        Ok(StageOutcome::Continue)
    }

    async fn load(&mut self) -> DbsyncResult<StageOutcome> {
        let Some(staging) = self.staging.take() else {
            bail!(
                ErrorKind::InvalidState,
                "Incremental load ran before extract",
                self.plan.table_name.clone()
            );
        };

        self.ctx.target.ensure_connection().await?;
        self.ctx
            .target
            .set_lock_timeout(LOAD_LOCK_TIMEOUT_SECONDS)
            .await?;

        // Merge, delete reconciliation and the checkpoint update at finalize
        // all ride one transaction; none of them is visible without the rest.
        let mut tx = self.ctx.target.begin().await?;
        tx.load_incrementally_from_file(&self.plan.table_name, &self.columns, staging.path())
            .await?;

        if let Some(reconciler) = &self.ctx.reconciler {
            reconciler.reconcile(tx.as_mut(), &self.plan).await?;
        }

        self.tx = Some(tx);

        Ok(StageOutcome::Continue)
    }

    async fn finalize(&mut self) -> DbsyncResult<StageOutcome> {
        let checkpoint = self.checkpoint()?;
        let Some(mut tx) = self.tx.take() else {
            bail!(
                ErrorKind::InvalidState,
                "Incremental finalize ran before load",
                self.plan.table_name.clone()
            );
        };
        let Some(start_time) = self.start_time else {
            bail!(
                ErrorKind::InvalidState,
                "Incremental finalize ran before extract",
                self.plan.table_name.clone()
            );
        };

        let updated = tx
            .update_checkpoint(
                &self.plan.table_name,
                checkpoint.last_batch_synced_at,
                CheckpointUpdate {
                    last_synced_at: start_time,
                    last_row_at: self.observed_row_at.or(checkpoint.last_row_at),
                },
            )
            .await?;

        // Zero rows means a batch load replaced the table (and checkpoint)
        // while we were merging. Dropping the transaction rolls the merge
        // back; the batch load already carries everything it held.
        if updated == 0 {
            drop(tx);
            self.ctx.sink.log(&format!(
                "checkpoint for {} changed during sync, discarding incremental result",
                self.plan.table_name
            ));
        } else {
            tx.commit().await?;
        }

        Ok(StageOutcome::Continue)
    }
}
