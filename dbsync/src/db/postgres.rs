//! Postgres implementation of the database adapter contract.
//!
//! Bulk extraction and loading go through the COPY text protocol; merges land
//! in a session-temporary staging table and are applied with
//! `INSERT ... ON CONFLICT`, which is where lock-wait and deadlock failures
//! surface and get reclassified as transient.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use config::shared::PgConnectionConfig;
use futures::TryStreamExt;
use sqlx::postgres::{PgPool, PgPoolCopyExt, PgPoolOptions};
use sqlx::Row as SqlxRow;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::db::adapter::{AUX_TIME_BUFFER_SECS, DatabaseAdapter, TargetTransaction};
use crate::error::{DbsyncResult, ErrorKind};
use crate::plan::TablePlan;
use crate::registry::{CheckpointUpdate, REGISTRY_TABLE_NAME};
use crate::schema::{ColumnDef, TableDefinition, TableSchema};
use crate::{bail, dbsync_error};

const NUM_POOL_CONNECTIONS: u32 = 4;

/// Timestamp layout used when a cutoff must be inlined into a COPY statement,
/// which cannot carry bind parameters.
const COPY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f+00";

/// A Postgres database reachable over a sqlx pool, usable as source or target.
#[derive(Debug, Clone)]
pub struct PostgresDb {
    name: String,
    pool: PgPool,
    /// Lock-wait bound applied with `SET LOCAL` to every transaction this
    /// adapter opens. `lock_timeout` is session-scoped in Postgres, so a
    /// plain `SET` on a pooled connection would only cover whichever
    /// connection happened to serve it.
    lock_timeout_secs: Arc<AtomicU32>,
}

impl PostgresDb {
    /// Connects to the configured database.
    pub async fn connect(config: &PgConnectionConfig) -> DbsyncResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(NUM_POOL_CONNECTIONS)
            .connect_with(config.with_db())
            .await
            .map_err(|err| {
                dbsync_error!(
                    ErrorKind::TargetConnectionFailed,
                    "Failed to connect to Postgres",
                    format!("{}:{}/{}", config.host, config.port, config.name),
                    source: err
                )
            })?;

        Ok(Self::from_pool(config.name.clone(), pool))
    }

    /// Wraps an existing pool, mainly for tests that manage their own
    /// database lifecycle.
    pub fn from_pool(name: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            pool,
            lock_timeout_secs: Arc::new(AtomicU32::new(0)),
        }
    }

    /// The underlying pool, shared with components living in the same
    /// database (e.g. the checkpoint registry).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn quoted_columns(columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| Self::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn begin_tx(&self) -> DbsyncResult<sqlx::Transaction<'static, sqlx::Postgres>> {
        let mut tx = self.pool.begin().await?;
        let seconds = self.lock_timeout_secs.load(Ordering::Relaxed);
        if seconds > 0 {
            sqlx::query(&format!("set local lock_timeout = '{seconds}s'"))
                .execute(&mut *tx)
                .await?;
        }
        Ok(tx)
    }

    async fn primary_key_columns_on<'e, E>(executor: E, table: &str) -> DbsyncResult<Vec<String>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows = sqlx::query(
            "select a.attname as column_name
             from pg_index i
             join pg_attribute a on a.attrelid = i.indrelid and a.attnum = any(i.indkey)
             where i.indrelid = $1::regclass and i.indisprimary
             order by a.attnum",
        )
        .bind(table)
        .fetch_all(executor)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("column_name"))
            .collect())
    }

    async fn copy_out_to_file(&self, statement: &str, path: &Path) -> DbsyncResult<u64> {
        let mut stream = self.pool.copy_out_raw(statement).await.map_err(|err| {
            dbsync_error!(
                ErrorKind::ExtractFailed,
                "Bulk extraction failed to start",
                err.to_string(),
                source: err
            )
        })?;

        let mut file = File::create(path).await?;
        let mut rows = 0u64;
        loop {
            let chunk = stream.try_next().await.map_err(|err| {
                dbsync_error!(
                    ErrorKind::ExtractFailed,
                    "Bulk extraction failed mid-stream",
                    err.to_string(),
                    source: err
                )
            })?;
            let Some(chunk) = chunk else {
                break;
            };
            rows += chunk.iter().filter(|byte| **byte == b'\n').count() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(rows)
    }

    /// Copies a staging file into a session-temporary table mirroring
    /// `table`'s shape, ready to be applied with `INSERT ... ON CONFLICT`.
    /// Returns the staging table's name.
    async fn stage_file(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<String> {
        let stage = format!("stage_{table}");
        sqlx::query(&format!(
            "create temp table {} on commit drop as
             select {} from {} with no data",
            Self::quote_ident(&stage),
            Self::quoted_columns(columns),
            Self::quote_ident(table)
        ))
        .execute(&mut **tx)
        .await?;

        let statement = format!(
            "COPY {} ({}) FROM STDIN",
            Self::quote_ident(&stage),
            Self::quoted_columns(columns)
        );
        let contents = tokio::fs::read(path).await?;
        let mut copy = (**tx).copy_in_raw(&statement).await?;
        copy.send(contents).await?;
        copy.finish().await?;

        Ok(stage)
    }

    async fn insert_ignoring_duplicates(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        table: &str,
        stage: &str,
        columns: &[String],
    ) -> DbsyncResult<u64> {
        let inserted = sqlx::query(&format!(
            "insert into {} ({cols}) select {cols} from {} on conflict do nothing",
            Self::quote_ident(table),
            Self::quote_ident(stage),
            cols = Self::quoted_columns(columns)
        ))
        .execute(&mut **tx)
        .await?
        .rows_affected();

        Ok(inserted)
    }

    async fn merge_stage(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        table: &str,
        stage: &str,
        columns: &[String],
    ) -> DbsyncResult<u64> {
        let primary_key = Self::primary_key_columns_on(&mut **tx, table).await?;
        if primary_key.is_empty() {
            bail!(
                ErrorKind::MissingTargetTable,
                "Cannot merge into a table without a primary key",
                table
            );
        }

        let assignments = columns
            .iter()
            .filter(|column| !primary_key.contains(column))
            .map(|column| {
                let quoted = Self::quote_ident(column);
                format!("{quoted} = excluded.{quoted}")
            })
            .collect::<Vec<_>>();
        let conflict_action = if assignments.is_empty() {
            "nothing".to_string()
        } else {
            format!("update set {}", assignments.join(", "))
        };

        let merged = sqlx::query(&format!(
            "insert into {} ({cols}) select {cols} from {}
             on conflict ({pk}) do {action}",
            Self::quote_ident(table),
            Self::quote_ident(stage),
            cols = Self::quoted_columns(columns),
            pk = Self::quoted_columns(&primary_key),
            action = conflict_action
        ))
        .execute(&mut **tx)
        .await?
        .rows_affected();

        Ok(merged)
    }

    async fn delete_recent_rows(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        plan: &TablePlan,
        watermark: &str,
        since: DateTime<Utc>,
    ) -> DbsyncResult<u64> {
        let deleted = match plan.refresh_recent.aux_column() {
            Some(aux_column) => {
                let query = format!(
                    "delete from {} where {} > $1 and {} > $2",
                    Self::quote_ident(&plan.table_name),
                    Self::quote_ident(watermark),
                    Self::quote_ident(aux_column)
                );
                sqlx::query(&query)
                    .bind(since)
                    .bind(since - Duration::seconds(AUX_TIME_BUFFER_SECS))
                    .execute(&mut **tx)
                    .await?
                    .rows_affected()
            }
            None => {
                let query = format!(
                    "delete from {} where {} > $1",
                    Self::quote_ident(&plan.table_name),
                    Self::quote_ident(watermark)
                );
                sqlx::query(&query)
                    .bind(since)
                    .execute(&mut **tx)
                    .await?
                    .rows_affected()
            }
        };

        Ok(deleted)
    }

    fn normalize_type(data_type: &str) -> String {
        match data_type {
            "character varying" => "varchar".to_string(),
            "timestamp without time zone" => "timestamp".to_string(),
            "timestamp with time zone" => "timestamptz".to_string(),
            "ARRAY" => "text".to_string(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresDb {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_connection(&self) -> DbsyncResult<()> {
        sqlx::query("select 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn set_lock_timeout(&self, seconds: u32) -> DbsyncResult<()> {
        self.lock_timeout_secs.store(seconds, Ordering::Relaxed);
        Ok(())
    }

    async fn list_tables(&self) -> DbsyncResult<Vec<String>> {
        let rows = sqlx::query(
            "select table_name from information_schema.tables
             where table_schema = 'public' and table_type = 'BASE TABLE'
             order by table_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("table_name"))
            .collect())
    }

    async fn table_exists(&self, table: &str) -> DbsyncResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "select exists (
                 select from information_schema.tables
                 where table_schema = 'public' and table_name = $1
             )",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn hash_schema(&self, table: &str) -> DbsyncResult<TableSchema> {
        let rows = sqlx::query(
            "select column_name, data_type, is_nullable
             from information_schema.columns
             where table_schema = 'public' and table_name = $1
             order by ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            bail!(
                ErrorKind::MissingSourceTable,
                "Table has no columns or does not exist",
                table
            );
        }

        let primary_key = Self::primary_key_columns_on(&self.pool, table).await?;

        let columns = rows
            .into_iter()
            .map(|row| {
                let name: String = row.get("column_name");
                let data_type: String = row.get("data_type");
                let is_nullable: String = row.get("is_nullable");
                ColumnDef {
                    primary_key: primary_key.iter().any(|pk| pk == &name),
                    nullable: is_nullable == "YES",
                    sql_type: Self::normalize_type(&data_type),
                    name,
                }
            })
            .collect();

        Ok(TableSchema::new(columns))
    }

    async fn create_table(&self, definition: &TableDefinition) -> DbsyncResult<()> {
        let mut column_clauses = definition
            .columns
            .iter()
            .map(|column| {
                let mut clause = format!(
                    "{} {}",
                    Self::quote_ident(&column.name),
                    column.sql_type
                );
                if !column.nullable {
                    clause.push_str(" not null");
                }
                clause
            })
            .collect::<Vec<_>>();
        column_clauses.push(format!(
            "primary key ({})",
            Self::quoted_columns(&definition.primary_key)
        ));

        let ddl = format!(
            "create table if not exists {} ({})",
            Self::quote_ident(&definition.name),
            column_clauses.join(", ")
        );
        sqlx::query(&ddl).execute(&self.pool).await?;

        for index in &definition.indexes {
            let unique = if index.unique { "unique " } else { "" };
            let ddl = format!(
                "create {unique}index if not exists {} on {} ({})",
                Self::quote_ident(&index.name),
                Self::quote_ident(&definition.name),
                Self::quoted_columns(&index.columns)
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
        }

        debug!(table = %definition.name, "ensured table exists");

        Ok(())
    }

    async fn drop_table(&self, table: &str) -> DbsyncResult<()> {
        let ddl = format!("drop table if exists {}", Self::quote_ident(table));
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    async fn switch_table(&self, live: &str, staged: &str) -> DbsyncResult<()> {
        let old = format!("old_{live}");
        let mut tx = self.begin_tx().await?;

        // Transactional DDL: the rename-aside and rename-in are invisible
        // until commit, so readers always see a table under the live name.
        sqlx::query(&format!(
            "drop table if exists {}",
            Self::quote_ident(&old)
        ))
        .execute(&mut *tx)
        .await?;
        let live_exists: bool = sqlx::query_scalar(
            "select exists (
                 select from information_schema.tables
                 where table_schema = 'public' and table_name = $1
             )",
        )
        .bind(live)
        .fetch_one(&mut *tx)
        .await?;
        if live_exists {
            sqlx::query(&format!(
                "alter table {} rename to {}",
                Self::quote_ident(live),
                Self::quote_ident(&old)
            ))
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(&format!(
            "alter table {} rename to {}",
            Self::quote_ident(staged),
            Self::quote_ident(live)
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.drop_table(&old).await?;

        Ok(())
    }

    async fn max_watermark(
        &self,
        table: &str,
        column: &str,
    ) -> DbsyncResult<Option<DateTime<Utc>>> {
        let query = format!(
            "select max({}) from {}",
            Self::quote_ident(column),
            Self::quote_ident(table)
        );
        let max: Option<DateTime<Utc>> = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;

        Ok(max)
    }

    async fn extract_to_file(
        &self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64> {
        let statement = format!(
            "COPY (SELECT {} FROM {}) TO STDOUT",
            Self::quoted_columns(columns),
            Self::quote_ident(table)
        );
        self.copy_out_to_file(&statement, path).await
    }

    async fn extract_incrementally_to_file(
        &self,
        table: &str,
        columns: &[String],
        watermark: &str,
        path: &Path,
        since: DateTime<Utc>,
        overlap: Duration,
    ) -> DbsyncResult<u64> {
        let cutoff = (since - overlap).format(COPY_TIMESTAMP_FORMAT);
        let statement = format!(
            "COPY (SELECT {} FROM {} WHERE {} > '{}') TO STDOUT",
            Self::quoted_columns(columns),
            Self::quote_ident(table),
            Self::quote_ident(watermark),
            cutoff
        );
        self.copy_out_to_file(&statement, path).await
    }

    async fn load_from_file(
        &self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64> {
        let mut tx = self.begin_tx().await?;
        let stage = Self::stage_file(&mut tx, table, columns, path).await?;
        let inserted = Self::insert_ignoring_duplicates(&mut tx, table, &stage, columns).await?;
        tx.commit().await?;

        Ok(inserted)
    }

    async fn load_incrementally_from_file(
        &self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64> {
        let mut tx = self.begin_tx().await?;
        let stage = Self::stage_file(&mut tx, table, columns, path).await?;
        let merged = Self::merge_stage(&mut tx, table, &stage, columns).await?;
        tx.commit().await?;

        Ok(merged)
    }

    async fn begin(&self) -> DbsyncResult<Box<dyn TargetTransaction>> {
        Ok(Box::new(PostgresTransaction {
            tx: self.begin_tx().await?,
        }))
    }

    async fn consistency_count(&self, table: &str, at: DateTime<Utc>) -> DbsyncResult<i64> {
        let query = format!(
            "select count(*) from {} where created_at between $1 and $2",
            Self::quote_ident(table)
        );
        let count: i64 = sqlx::query_scalar(&query)
            .bind(at - Duration::hours(1))
            .bind(at)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// A [`TargetTransaction`] over a pooled Postgres connection. Dropping the
/// value rolls the underlying sqlx transaction back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl TargetTransaction for PostgresTransaction {
    async fn load_from_file(
        &mut self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64> {
        let stage = PostgresDb::stage_file(&mut self.tx, table, columns, path).await?;
        PostgresDb::insert_ignoring_duplicates(&mut self.tx, table, &stage, columns).await
    }

    async fn load_incrementally_from_file(
        &mut self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64> {
        let stage = PostgresDb::stage_file(&mut self.tx, table, columns, path).await?;
        PostgresDb::merge_stage(&mut self.tx, table, &stage, columns).await
    }

    async fn delete_recent(
        &mut self,
        plan: &TablePlan,
        watermark: &str,
        since: DateTime<Utc>,
    ) -> DbsyncResult<u64> {
        PostgresDb::delete_recent_rows(&mut self.tx, plan, watermark, since).await
    }

    async fn update_checkpoint(
        &mut self,
        table_name: &str,
        expected_lock: Option<DateTime<Utc>>,
        values: CheckpointUpdate,
    ) -> DbsyncResult<u64> {
        // The registry table lives in the target database, so the checkpoint
        // row advances in the same transaction as the merge it describes.
        let updated = sqlx::query(&format!(
            "update {REGISTRY_TABLE_NAME}
             set last_synced_at = $1, last_row_at = $2
             where table_name = $3
               and last_batch_synced_at is not distinct from $4"
        ))
        .bind(values.last_synced_at)
        .bind(values.last_row_at)
        .bind(table_name)
        .bind(expected_lock)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> DbsyncResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
