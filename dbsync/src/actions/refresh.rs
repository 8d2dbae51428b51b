//! Window-repair policy: delete and reload the last couple of days of a
//! table, catching late-arriving rows and upstream hard-deletes that the
//! incremental tail sync cannot see.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::actions::base::{resolve_source_table, target_column_names};
use crate::actions::{LoadAction, LoadContext, StageOutcome, LOAD_LOCK_TIMEOUT_SECONDS};
use crate::bail;
use crate::error::{DbsyncResult, ErrorKind};
use crate::plan::TablePlan;
use crate::schema::table_definition;
use crate::staging::StagingFile;

pub struct RefreshRecentLoadAction {
    ctx: LoadContext,
    plan: TablePlan,
    columns: Vec<String>,
    watermark: Option<String>,
    cutoff: Option<DateTime<Utc>>,
    staging: Option<StagingFile>,
}

impl RefreshRecentLoadAction {
    pub fn new(ctx: LoadContext, plan: TablePlan) -> Self {
        Self {
            ctx,
            plan,
            columns: Vec::new(),
            watermark: None,
            cutoff: None,
            staging: None,
        }
    }
}

#[async_trait]
impl LoadAction for RefreshRecentLoadAction {
    fn operation(&self) -> &'static str {
        "refresh_recent"
    }

    fn table_name(&self) -> &str {
        &self.plan.table_name
    }

    async fn prepare(&mut self) -> DbsyncResult<StageOutcome> {
        if !self.plan.refresh_recent.is_enabled() {
            return Ok(StageOutcome::Skip);
        }

        if !self
            .plan
            .source
            .table_exists(&self.plan.source_table_name)
            .await?
        {
            self.ctx.sink.log(&format!(
                "{} does not exist in source {}, skipping refresh",
                self.plan.source_table_name,
                self.plan.source.name()
            ));
            return Ok(StageOutcome::Skip);
        }

        let Some(checkpoint) = self.ctx.registry.get(&self.plan.table_name).await? else {
            self.ctx.sink.log(&format!(
                "{} has no checkpoint, skipping refresh",
                self.plan.table_name
            ));
            return Ok(StageOutcome::Skip);
        };
        if !self.ctx.target.table_exists(&self.plan.table_name).await? {
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
                "{} was missing from target, recreated before refresh",
                self.plan.table_name
            ));
        }

        let target_columns =
            target_column_names(self.ctx.target.as_ref(), &self.plan.table_name).await?;
        let resolved = resolve_source_table(&self.plan, Some(&target_columns)).await?;
        let Some(watermark) = resolved.watermark else {
            self.ctx.sink.log(&format!(
                "{} has no watermark column, cannot refresh",
                self.plan.table_name
            ));
            return Ok(StageOutcome::Skip);
        };

        let base = checkpoint
            .last_row_at
            .map_or(checkpoint.last_synced_at, |row_at| {
                row_at.max(checkpoint.last_synced_at)
            });

        self.columns = resolved.columns;
        self.watermark = Some(watermark);
        self.cutoff = Some(base - self.ctx.refresh_window);

        Ok(StageOutcome::Continue)
    }

    async fn extract(&mut self) -> DbsyncResult<StageOutcome> {
        let (Some(watermark), Some(cutoff)) = (self.watermark.clone(), self.cutoff) else {
            bail!(
                ErrorKind::InvalidState,
                "Refresh extract ran before prepare",
                self.plan.table_name.clone()
            );
        };

        self.plan.source.ensure_connection().await?;

        let staging = StagingFile::create(&self.plan.table_name)?;
        let rows = self
            .plan
            .source
            .extract_incrementally_to_file(
                &self.plan.source_table_name,
                &self.columns,
                &watermark,
                staging.path(),
                cutoff,
                Duration::zero(),
            )
            .await?;
        debug!(table = %self.plan.table_name, rows, cutoff = %cutoff, "extracted refresh window");

        self.staging = Some(staging);

        Ok(StageOutcome::Continue)
    }

    async fn load(&mut self) -> DbsyncResult<StageOutcome> {
        let Some(staging) = self.staging.take() else {
            bail!(
                ErrorKind::InvalidState,
                "Refresh load ran before extract",
                self.plan.table_name.clone()
            );
        };
        let (Some(watermark), Some(cutoff)) = (self.watermark.clone(), self.cutoff) else {
            bail!(
                ErrorKind::InvalidState,
                "Refresh load ran before prepare",
                self.plan.table_name.clone()
            );
        };

        self.ctx.target.ensure_connection().await?;
        self.ctx
            .target
            .set_lock_timeout(LOAD_LOCK_TIMEOUT_SECONDS)
            .await?;

        // The delete and the reload land in one transaction: a failed reload
        // must not leave a hole where the window used to be.
        let mut tx = self.ctx.target.begin().await?;
        let deleted = tx.delete_recent(&self.plan, &watermark, cutoff).await?;
        let loaded = tx
            .load_from_file(&self.plan.table_name, &self.columns, staging.path())
            .await?;
        tx.commit().await?;
        debug!(table = %self.plan.table_name, deleted, loaded, "refreshed window");

        Ok(StageOutcome::Continue)
    }

    async fn finalize(&mut self) -> DbsyncResult<StageOutcome> {
        // A refresh repairs data in place; the checkpoint still describes the
        // incremental frontier and stays untouched.
        Ok(StageOutcome::Continue)
    }
}
