//! Postgres-backed checkpoint registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row as SqlxRow;

use crate::error::DbsyncResult;
use crate::registry::base::{Checkpoint, CheckpointUpdate, TableRegistry, REGISTRY_TABLE_NAME};

#[derive(Debug, Clone)]
pub struct PostgresRegistry {
    pool: PgPool,
}

impl PostgresRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TableRegistry for PostgresRegistry {
    async fn ensure_storage_exists(&self) -> DbsyncResult<()> {
        sqlx::query(&format!(
            "create table if not exists {REGISTRY_TABLE_NAME} (
                 table_name text primary key,
                 last_synced_at timestamptz not null,
                 last_row_at timestamptz,
                 last_batch_synced_at timestamptz
             )"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, table_name: &str) -> DbsyncResult<Option<Checkpoint>> {
        let row = sqlx::query(&format!(
            "select last_synced_at, last_row_at, last_batch_synced_at
             from {REGISTRY_TABLE_NAME} where table_name = $1"
        ))
        .bind(table_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Checkpoint {
            last_synced_at: row.get("last_synced_at"),
            last_row_at: row.get("last_row_at"),
            last_batch_synced_at: row.get("last_batch_synced_at"),
        }))
    }

    async fn set(&self, table_name: &str, checkpoint: Checkpoint) -> DbsyncResult<()> {
        sqlx::query(&format!(
            "insert into {REGISTRY_TABLE_NAME}
                 (table_name, last_synced_at, last_row_at, last_batch_synced_at)
             values ($1, $2, $3, $4)
             on conflict (table_name) do nothing"
        ))
        .bind(table_name)
        .bind(checkpoint.last_synced_at)
        .bind(checkpoint.last_row_at)
        .bind(checkpoint.last_batch_synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_force(&self, table_name: &str, checkpoint: Checkpoint) -> DbsyncResult<()> {
        sqlx::query(&format!(
            "insert into {REGISTRY_TABLE_NAME}
                 (table_name, last_synced_at, last_row_at, last_batch_synced_at)
             values ($1, $2, $3, $4)
             on conflict (table_name) do update set
                 last_synced_at = excluded.last_synced_at,
                 last_row_at = excluded.last_row_at,
                 last_batch_synced_at = excluded.last_batch_synced_at"
        ))
        .bind(table_name)
        .bind(checkpoint.last_synced_at)
        .bind(checkpoint.last_row_at)
        .bind(checkpoint.last_batch_synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(
        &self,
        table_name: &str,
        expected_lock: Option<DateTime<Utc>>,
        values: CheckpointUpdate,
    ) -> DbsyncResult<u64> {
        // IS NOT DISTINCT FROM makes a NULL lock compare equal to NULL, which
        // a plain `=` would not.
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
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated)
    }

    async fn delete(&self, table_name: &str) -> DbsyncResult<()> {
        sqlx::query(&format!(
            "delete from {REGISTRY_TABLE_NAME} where table_name = $1"
        ))
        .bind(table_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_except(&self, keep: &[String]) -> DbsyncResult<u64> {
        let purged = sqlx::query(&format!(
            "delete from {REGISTRY_TABLE_NAME} where table_name <> all($1)"
        ))
        .bind(keep)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(purged)
    }
}
