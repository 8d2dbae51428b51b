//! The database adapter contract shared by sources and the target.
//!
//! One implementation exists per dialect; the core composes adapters through
//! this trait and never issues dialect-specific SQL itself. Source and target
//! are the same trait: a load action only ever uses the extraction half on
//! its source and the loading half on its target.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::DbsyncResult;
use crate::plan::TablePlan;
use crate::registry::CheckpointUpdate;
use crate::schema::{TableDefinition, TableSchema};

/// Auxiliary-column slack (seconds) applied by [`TargetTransaction::delete_recent`].
///
/// When a plan filters deletes by a second timestamp column, the cutoff on
/// that column is pushed back by this buffer since the two columns are only
/// loosely correlated.
pub const AUX_TIME_BUFFER_SECS: i64 = 60 * 60 * 24 * 2;

/// A connected database, source or target.
///
/// Implementations must reclassify lock-wait/deadlock failures raised while
/// loading into [`crate::error::ErrorKind::TargetTransient`] so the
/// orchestration layer can retry them, and must implement
/// [`switch_table`](Self::switch_table) such that a concurrent reader never
/// observes a missing table.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// A human-readable identifier (typically the database name) used in
    /// error messages and consistency reports.
    fn name(&self) -> &str;

    /// Re-establishes the connection if it has gone stale.
    ///
    /// Connections sit unused for the whole of a batch load, long enough for
    /// idle timeouts to kill them.
    async fn ensure_connection(&self) -> DbsyncResult<()>;

    /// Bounds how long loads may wait on locks held by other queries.
    async fn set_lock_timeout(&self, seconds: u32) -> DbsyncResult<()>;

    async fn list_tables(&self) -> DbsyncResult<Vec<String>>;

    async fn table_exists(&self, table: &str) -> DbsyncResult<bool>;

    /// Fetches the table schema with column types normalized into the target
    /// dialect's equivalents.
    async fn hash_schema(&self, table: &str) -> DbsyncResult<TableSchema>;

    async fn create_table(&self, definition: &TableDefinition) -> DbsyncResult<()>;

    async fn drop_table(&self, table: &str) -> DbsyncResult<()>;

    /// Atomically replaces `live` with `staged`: rename any existing live
    /// table aside, rename the staged table into place, then drop the old
    /// one.
    async fn switch_table(&self, live: &str, staged: &str) -> DbsyncResult<()>;

    /// Returns the maximum value of `column`, i.e. the newest watermark
    /// currently visible in the table.
    async fn max_watermark(
        &self,
        table: &str,
        column: &str,
    ) -> DbsyncResult<Option<DateTime<Utc>>>;

    /// Streams the whole table (restricted to `columns`) into a local
    /// tab-separated staging file. Returns the number of rows written.
    async fn extract_to_file(
        &self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64>;

    /// Like [`extract_to_file`](Self::extract_to_file), but restricted to
    /// rows whose `watermark` column is strictly newer than
    /// `since - overlap`.
    async fn extract_incrementally_to_file(
        &self,
        table: &str,
        columns: &[String],
        watermark: &str,
        path: &Path,
        since: DateTime<Utc>,
        overlap: Duration,
    ) -> DbsyncResult<u64>;

    /// Bulk-inserts a staging file, ignoring rows whose primary key already
    /// exists. Returns the number of rows applied.
    async fn load_from_file(
        &self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64>;

    /// Bulk-merges a staging file, replacing rows on primary-key conflict.
    async fn load_incrementally_from_file(
        &self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64>;

    /// Opens a transaction on this database.
    ///
    /// The apply steps that must land together (a refresh's delete and
    /// reload, an incremental merge with its checkpoint update) run through
    /// the returned handle; nothing is visible until
    /// [`commit`](TargetTransaction::commit).
    async fn begin(&self) -> DbsyncResult<Box<dyn TargetTransaction>>;

    /// Counts rows created in the hour ending at `at`, for cross-database
    /// consistency verification.
    async fn consistency_count(&self, table: &str, at: DateTime<Utc>) -> DbsyncResult<i64>;
}

/// An open transaction on a target database.
///
/// Dropping the handle without calling [`commit`](Self::commit) rolls every
/// buffered change back.
#[async_trait]
pub trait TargetTransaction: Send {
    /// Bulk-inserts a staging file, ignoring rows whose primary key already
    /// exists. Returns the number of rows applied.
    async fn load_from_file(
        &mut self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64>;

    /// Bulk-merges a staging file, replacing rows on primary-key conflict.
    async fn load_incrementally_from_file(
        &mut self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64>;

    /// Deletes rows whose watermark is strictly newer than `since`,
    /// additionally filtered by the plan's auxiliary timestamp column (with
    /// [`AUX_TIME_BUFFER_SECS`] slack) when one is configured.
    async fn delete_recent(
        &mut self,
        plan: &TablePlan,
        watermark: &str,
        since: DateTime<Utc>,
    ) -> DbsyncResult<u64>;

    /// Advances the incremental checkpoint fields for `table_name`, guarded
    /// by the optimistic lock on `last_batch_synced_at` (same contract as
    /// [`crate::registry::TableRegistry::update`]). Returns the number of
    /// rows updated: zero means the lock was stale and the caller should
    /// drop the transaction instead of committing.
    async fn update_checkpoint(
        &mut self,
        table_name: &str,
        expected_lock: Option<DateTime<Utc>>,
        values: CheckpointUpdate,
    ) -> DbsyncResult<u64>;

    async fn commit(self: Box<Self>) -> DbsyncResult<()>;
}

/// Hook reconstructing upstream deletes (typically from an audit log).
///
/// Invoked once per incremental load with the load's open transaction, after
/// the merge and before the checkpoint update, so its deletes commit (or roll
/// back) together with the merge. Implementations live outside the core; the
/// core only guarantees the invocation point.
#[async_trait]
pub trait DeleteReconciler: Send + Sync {
    async fn reconcile(
        &self,
        tx: &mut dyn TargetTransaction,
        plan: &TablePlan,
    ) -> DbsyncResult<()>;
}
