use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbsyncResult;

/// Name of the checkpoint table in the target database.
pub const REGISTRY_TABLE_NAME: &str = "meta_last_sync_times";

/// The durable sync state of one replicated table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// When a sync against this table last started.
    pub last_synced_at: DateTime<Utc>,
    /// The newest watermark observed in the source at extraction time. The
    /// next incremental extraction resumes from here, not from wall-clock
    /// time, so source clock skew cannot open a gap.
    pub last_row_at: Option<DateTime<Utc>>,
    /// When a batch load last completed. Doubles as the optimistic lock for
    /// incremental checkpoint updates.
    pub last_batch_synced_at: Option<DateTime<Utc>>,
}

/// The fields an incremental sync is allowed to advance.
///
/// `last_batch_synced_at` is deliberately absent: only a completed batch load
/// may move it, via [`TableRegistry::set`] or [`TableRegistry::set_force`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointUpdate {
    pub last_synced_at: DateTime<Utc>,
    pub last_row_at: Option<DateTime<Utc>>,
}

/// Storage for per-table [`Checkpoint`]s.
///
/// Implementations must make [`update`](Self::update) atomic with respect to
/// its optimistic-lock comparison, and must treat a `None` expected lock as
/// matching only a stored `NULL`.
#[async_trait]
pub trait TableRegistry: Send + Sync {
    /// Creates the backing storage if it does not exist yet.
    async fn ensure_storage_exists(&self) -> DbsyncResult<()>;

    async fn get(&self, table_name: &str) -> DbsyncResult<Option<Checkpoint>>;

    /// Inserts a checkpoint for `table_name` unless one already exists.
    /// First write wins; a concurrent batch load that lost the race must not
    /// clobber the winner's record.
    async fn set(&self, table_name: &str, checkpoint: Checkpoint) -> DbsyncResult<()>;

    /// Inserts or overwrites unconditionally.
    async fn set_force(&self, table_name: &str, checkpoint: Checkpoint) -> DbsyncResult<()>;

    /// Advances the incremental fields of an existing checkpoint, but only if
    /// the stored `last_batch_synced_at` still equals `expected_lock`.
    /// Returns the number of rows updated: zero means the lock was stale and
    /// the caller's work must be discarded.
    async fn update(
        &self,
        table_name: &str,
        expected_lock: Option<DateTime<Utc>>,
        values: CheckpointUpdate,
    ) -> DbsyncResult<u64>;

    async fn delete(&self, table_name: &str) -> DbsyncResult<()>;

    /// Removes every checkpoint whose table is not in `keep`.
    async fn purge_except(&self, keep: &[String]) -> DbsyncResult<u64>;
}
