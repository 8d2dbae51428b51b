//! Full-reload policy: rebuild the table from scratch next to the live one,
//! catch it up to near-now, then atomically swap it into place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::actions::base::resolve_source_table;
use crate::actions::{LoadAction, LoadContext, StageOutcome, LOAD_LOCK_TIMEOUT_SECONDS};
use crate::bail;
use crate::error::{DbsyncResult, ErrorKind};
use crate::plan::TablePlan;
use crate::registry::Checkpoint;
use crate::schema::table_definition;
use crate::staging::{StagingFile, SPLIT_LINES};

/// Prefix under which the shadow table is built.
pub const BATCH_STAGING_PREFIX: &str = "new_";

pub struct BatchLoadAction {
    ctx: LoadContext,
    plan: TablePlan,
    staged_table: String,
    columns: Vec<String>,
    watermark: Option<String>,
    staging: Option<StagingFile>,
    start_time: Option<DateTime<Utc>>,
    observed_row_at: Option<DateTime<Utc>>,
}

impl BatchLoadAction {
    pub fn new(ctx: LoadContext, plan: TablePlan) -> Self {
        let staged_table = format!("{BATCH_STAGING_PREFIX}{}", plan.table_name);
        Self {
            ctx,
            plan,
            staged_table,
            columns: Vec::new(),
            watermark: None,
            staging: None,
            start_time: None,
            observed_row_at: None,
        }
    }

    fn start_time(&self) -> DbsyncResult<DateTime<Utc>> {
        match self.start_time {
            Some(start) => Ok(start),
            None => bail!(
                ErrorKind::InvalidState,
                "Batch finalize ran before extract",
                self.plan.table_name.clone()
            ),
        }
    }

    /// Re-extracts everything newer than the previous extraction start and
    /// merges it into the shadow table, until the shadow table is no more
    /// than `batch_max_lag` behind the source.
    async fn catch_up(&mut self) -> DbsyncResult<DateTime<Utc>> {
        let mut start = self.start_time()?;
        let Some(watermark) = self.watermark.clone() else {
            return Ok(start);
        };

        while start <= (self.ctx.clock)() - self.ctx.batch_max_lag {
            let round_started = (self.ctx.clock)();
            debug!(
                table = %self.plan.table_name,
                since = %start,
                "catching up shadow table"
            );

            let staging = StagingFile::create(&self.plan.table_name)?;
            self.plan
                .source
                .extract_incrementally_to_file(
                    &self.plan.source_table_name,
                    &self.columns,
                    &watermark,
                    staging.path(),
                    start,
                    self.ctx.overlap,
                )
                .await?;
            self.observed_row_at = self
                .plan
                .source
                .max_watermark(&self.plan.source_table_name, &watermark)
                .await?;

            self.ctx
                .target
                .load_incrementally_from_file(&self.staged_table, &self.columns, staging.path())
                .await?;

            start = round_started;
        }

        Ok(start)
    }
}

#[async_trait]
impl LoadAction for BatchLoadAction {
    fn operation(&self) -> &'static str {
        "batch"
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
            self.ctx.sink.log(&format!(
                "{} does not exist in source {}, skipping batch load",
                self.plan.source_table_name,
                self.plan.source.name()
            ));
            return Ok(StageOutcome::Skip);
        }

        let resolved = resolve_source_table(&self.plan, None).await?;

        // A previous crashed run may have left a half-built shadow table.
        self.ctx.target.drop_table(&self.staged_table).await?;
        let definition = table_definition(
            &self.plan,
            &resolved.schema,
            &resolved.columns,
            &self.staged_table,
        );
        self.ctx.target.create_table(&definition).await?;

        self.columns = resolved.columns;
        self.watermark = resolved.watermark;

        Ok(StageOutcome::Continue)
    }

    async fn extract(&mut self) -> DbsyncResult<StageOutcome> {
        self.plan.source.ensure_connection().await?;

        self.start_time = Some((self.ctx.clock)());
        if let Some(watermark) = &self.watermark {
            self.observed_row_at = self
                .plan
                .source
                .max_watermark(&self.plan.source_table_name, watermark)
                .await?;
        }

        let staging = StagingFile::create(&self.plan.table_name)?;
        let rows = self
            .plan
            .source
            .extract_to_file(&self.plan.source_table_name, &self.columns, staging.path())
            .await?;
        debug!(table = %self.plan.table_name, rows, "extracted full table");

        self.staging = Some(staging);

        Ok(StageOutcome::Continue)
    }

    async fn load(&mut self) -> DbsyncResult<StageOutcome> {
        let Some(staging) = self.staging.take() else {
            bail!(
                ErrorKind::InvalidState,
                "Batch load ran before extract",
                self.plan.table_name.clone()
            );
        };

        self.ctx.target.ensure_connection().await?;
        self.ctx
            .target
            .set_lock_timeout(LOAD_LOCK_TIMEOUT_SECONDS)
            .await?;

        // Loading chunk by chunk bounds the lock span of any one statement.
        for chunk in staging.split(SPLIT_LINES).await? {
            self.ctx
                .target
                .load_from_file(&self.staged_table, &self.columns, chunk.path())
                .await?;
        }

        Ok(StageOutcome::Continue)
    }

    async fn finalize(&mut self) -> DbsyncResult<StageOutcome> {
        let synced_at = self.catch_up().await?;

        // Delete-then-set keeps the window in which a concurrent incremental
        // sync could observe a checkpoint for the old table as small as the
        // registry allows; `set` is first-write-wins so a racing batch load
        // cannot clobber a newer record.
        self.ctx.registry.delete(&self.plan.table_name).await?;
        self.ctx
            .target
            .switch_table(&self.plan.table_name, &self.staged_table)
            .await?;
        self.ctx
            .registry
            .set(
                &self.plan.table_name,
                Checkpoint {
                    last_synced_at: synced_at,
                    last_row_at: self.observed_row_at,
                    last_batch_synced_at: Some(synced_at),
                },
            )
            .await?;

        Ok(StageOutcome::Continue)
    }
}
