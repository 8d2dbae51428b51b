//! In-memory database adapter for testing and development.
//!
//! Holds tables as row maps behind a single mutex, implementing the full
//! adapter contract including TSV staging artifacts, so the load actions and
//! the manager can be exercised end to end without a real database. Staging
//! files written by [`MemoryDb`] use the same tab-separated text layout the
//! Postgres adapter produces.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::fs;
use tracing::debug;

use crate::db::adapter::{AUX_TIME_BUFFER_SECS, DatabaseAdapter, TargetTransaction};
use crate::error::{DbsyncError, DbsyncResult, ErrorKind};
use crate::plan::TablePlan;
use crate::registry::{CheckpointUpdate, TableRegistry};
use crate::schema::{TableDefinition, TableSchema};
use crate::{bail, dbsync_error};

/// Text marker for SQL NULL inside staging files, as COPY emits it.
pub const NULL_MARKER: &str = "\\N";

/// One row: column name to raw text value, [`NULL_MARKER`] for NULL.
pub type Row = BTreeMap<String, String>;

#[derive(Debug, Clone)]
struct MemoryTable {
    definition: TableDefinition,
    /// Rows keyed by their primary-key values, preserving insertion order
    /// via the ordered map for deterministic extraction.
    rows: BTreeMap<Vec<String>, Row>,
}

impl MemoryTable {
    fn key_for(&self, row: &Row) -> Vec<String> {
        self.definition
            .primary_key
            .iter()
            .map(|column| row.get(column).cloned().unwrap_or_default())
            .collect()
    }

    fn apply_lines(&mut self, contents: &str, columns: &[String], replace: bool) -> DbsyncResult<u64> {
        let mut applied = 0;
        for line in contents.lines().filter(|line| !line.is_empty()) {
            let row = MemoryDb::parse_line(line, columns)?;
            let key = self.key_for(&row);
            if replace || !self.rows.contains_key(&key) {
                self.rows.insert(key, row);
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn delete_recent_rows(&mut self, plan: &TablePlan, watermark: &str, since: DateTime<Utc>) -> u64 {
        let aux = plan.refresh_recent.aux_column().map(str::to_string);
        let aux_cutoff = since - Duration::seconds(AUX_TIME_BUFFER_SECS);
        let before = self.rows.len();
        self.rows.retain(|_, row| {
            let newer = row
                .get(watermark)
                .and_then(|value| MemoryDb::parse_timestamp(value))
                .is_some_and(|value| value > since);
            let aux_newer = aux.as_ref().is_none_or(|aux_column| {
                row.get(aux_column)
                    .and_then(|value| MemoryDb::parse_timestamp(value))
                    .is_some_and(|value| value > aux_cutoff)
            });
            !(newer && aux_newer)
        });
        (before - self.rows.len()) as u64
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, MemoryTable>,
    /// Errors queued per operation name, popped on the next matching call.
    injected_failures: HashMap<&'static str, VecDeque<DbsyncError>>,
}

/// An in-memory [`DatabaseAdapter`], usable as both source and target.
#[derive(Clone)]
pub struct MemoryDb {
    name: String,
    inner: Arc<std::sync::Mutex<Inner>>,
    registry: Arc<std::sync::Mutex<Option<Arc<dyn TableRegistry>>>>,
}

impl fmt::Debug for MemoryDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDb").field("name", &self.name).finish()
    }
}

impl MemoryDb {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(std::sync::Mutex::new(Inner::default())),
            registry: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Links the checkpoint registry that transactional checkpoint updates
    /// write through, mirroring a real target where the registry table lives
    /// in the same database.
    pub fn attach_registry(&self, registry: Arc<dyn TableRegistry>) {
        *self.registry.lock().unwrap() = Some(registry);
    }

    fn attached_registry(&self) -> DbsyncResult<Arc<dyn TableRegistry>> {
        self.registry.lock().unwrap().clone().ok_or_else(|| {
            dbsync_error!(
                ErrorKind::InvalidState,
                "No checkpoint registry is attached to this database"
            )
        })
    }

    /// Creates a table and seeds it with rows, for test setup.
    pub fn seed_table(&self, definition: TableDefinition, rows: Vec<Row>) {
        let mut inner = self.inner.lock().unwrap();
        let mut table = MemoryTable {
            definition,
            rows: BTreeMap::new(),
        };
        for row in rows {
            let key = table.key_for(&row);
            table.rows.insert(key, row);
        }
        inner.tables.insert(table.definition.name.clone(), table);
    }

    /// Inserts or replaces one row, for test setup.
    pub fn upsert_row(&self, table: &str, row: Row) {
        let mut inner = self.inner.lock().unwrap();
        let table = inner.tables.get_mut(table).expect("table must be seeded");
        let key = table.key_for(&row);
        table.rows.insert(key, row);
    }

    /// Returns a copy of all rows in a table, for test verification.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let inner = self.inner.lock().unwrap();
        inner
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.tables.get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn has_table(&self, table: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.tables.contains_key(table)
    }

    /// Queues an error to be returned by the next call to `operation`.
    ///
    /// Operation names match the [`DatabaseAdapter`] method names.
    pub fn fail_next(&self, operation: &'static str, error: DbsyncError) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .injected_failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    fn take_injected(&self, operation: &'static str) -> Option<DbsyncError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .injected_failures
            .get_mut(operation)
            .and_then(|queue| queue.pop_front())
    }

    fn check_injected(&self, operation: &'static str) -> DbsyncResult<()> {
        match self.take_injected(operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
        value.parse::<DateTime<Utc>>().ok()
    }

    fn render_line(row: &Row, columns: &[String]) -> String {
        columns
            .iter()
            .map(|column| row.get(column).cloned().unwrap_or(NULL_MARKER.to_string()))
            .collect::<Vec<_>>()
            .join("\t")
    }

    fn parse_line(line: &str, columns: &[String]) -> DbsyncResult<Row> {
        let values: Vec<&str> = line.split('\t').collect();
        if values.len() != columns.len() {
            bail!(
                ErrorKind::InvalidState,
                "Staging file row width does not match column list",
                format!("expected {} values, found {}", columns.len(), values.len())
            );
        }

        Ok(columns
            .iter()
            .zip(values)
            .map(|(column, value)| (column.clone(), value.to_string()))
            .collect())
    }

    fn with_table<R>(
        &self,
        table: &str,
        f: impl FnOnce(&mut MemoryTable) -> DbsyncResult<R>,
    ) -> DbsyncResult<R> {
        let mut inner = self.inner.lock().unwrap();
        let table = inner.tables.get_mut(table).ok_or_else(|| {
            dbsync_error!(
                ErrorKind::MissingSourceTable,
                "Table does not exist",
                table
            )
        })?;
        f(table)
    }

    async fn write_rows(
        &self,
        path: &Path,
        table: &str,
        columns: &[String],
        filter: impl Fn(&Row) -> bool,
    ) -> DbsyncResult<u64> {
        let lines = self.with_table(table, |t| {
            Ok(t.rows
                .values()
                .filter(|row| filter(row))
                .map(|row| Self::render_line(row, columns))
                .collect::<Vec<_>>())
        })?;

        let count = lines.len() as u64;
        let mut contents = lines.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        fs::write(path, contents).await?;

        debug!(table, rows = count, "extracted rows to staging file");

        Ok(count)
    }

    async fn apply_file(
        &self,
        table: &str,
        columns: &[String],
        path: &Path,
        replace: bool,
    ) -> DbsyncResult<u64> {
        let contents = fs::read_to_string(path).await?;
        self.with_table(table, |t| t.apply_lines(&contents, columns, replace))
    }
}

/// A buffered transaction over a [`MemoryDb`].
///
/// Mutations land on a staged copy of the touched tables; only
/// [`commit`](TargetTransaction::commit) publishes them (and the pending
/// checkpoint write) back. Dropping the value discards everything, matching
/// the rollback behavior of a real database transaction.
pub struct MemoryTransaction {
    db: MemoryDb,
    staged: HashMap<String, MemoryTable>,
    touched: BTreeSet<String>,
    checkpoint_write: Option<(String, Option<DateTime<Utc>>, CheckpointUpdate)>,
}

impl MemoryTransaction {
    fn staged_table(&mut self, table: &str) -> DbsyncResult<&mut MemoryTable> {
        self.touched.insert(table.to_string());
        self.staged.get_mut(table).ok_or_else(|| {
            dbsync_error!(
                ErrorKind::MissingSourceTable,
                "Table does not exist",
                table
            )
        })
    }
}

#[async_trait]
impl TargetTransaction for MemoryTransaction {
    async fn load_from_file(
        &mut self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64> {
        self.db.check_injected("load_from_file")?;
        let contents = fs::read_to_string(path).await?;
        self.staged_table(table)?
            .apply_lines(&contents, columns, false)
    }

    async fn load_incrementally_from_file(
        &mut self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64> {
        self.db.check_injected("load_incrementally_from_file")?;
        let contents = fs::read_to_string(path).await?;
        self.staged_table(table)?
            .apply_lines(&contents, columns, true)
    }

    async fn delete_recent(
        &mut self,
        plan: &TablePlan,
        watermark: &str,
        since: DateTime<Utc>,
    ) -> DbsyncResult<u64> {
        self.db.check_injected("delete_recent")?;
        Ok(self
            .staged_table(&plan.table_name)?
            .delete_recent_rows(plan, watermark, since))
    }

    async fn update_checkpoint(
        &mut self,
        table_name: &str,
        expected_lock: Option<DateTime<Utc>>,
        values: CheckpointUpdate,
    ) -> DbsyncResult<u64> {
        self.db.check_injected("update_checkpoint")?;
        let registry = self.db.attached_registry()?;

        // Evaluate the optimistic lock now; the actual write is buffered and
        // re-checked atomically by the registry at commit.
        let current = registry.get(table_name).await?;
        match current {
            Some(checkpoint) if checkpoint.last_batch_synced_at == expected_lock => {
                self.checkpoint_write = Some((table_name.to_string(), expected_lock, values));
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn commit(mut self: Box<Self>) -> DbsyncResult<()> {
        self.db.check_injected("commit")?;

        {
            let mut inner = self.db.inner.lock().unwrap();
            for table in &self.touched {
                match self.staged.remove(table) {
                    Some(staged) => {
                        inner.tables.insert(table.clone(), staged);
                    }
                    None => {
                        inner.tables.remove(table);
                    }
                }
            }
        }

        if let Some((table, expected_lock, values)) = self.checkpoint_write.take() {
            let registry = self.db.attached_registry()?;
            registry.update(&table, expected_lock, values).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryDb {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_connection(&self) -> DbsyncResult<()> {
        self.check_injected("ensure_connection")
    }

    async fn set_lock_timeout(&self, _seconds: u32) -> DbsyncResult<()> {
        Ok(())
    }

    async fn list_tables(&self) -> DbsyncResult<Vec<String>> {
        self.check_injected("list_tables")?;
        let inner = self.inner.lock().unwrap();
        let mut tables: Vec<String> = inner.tables.keys().cloned().collect();
        tables.sort();
        Ok(tables)
    }

    async fn table_exists(&self, table: &str) -> DbsyncResult<bool> {
        Ok(self.has_table(table))
    }

    async fn hash_schema(&self, table: &str) -> DbsyncResult<TableSchema> {
        self.check_injected("hash_schema")?;
        self.with_table(table, |t| {
            Ok(TableSchema::new(t.definition.columns.clone()))
        })
    }

    async fn create_table(&self, definition: &TableDefinition) -> DbsyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .tables
            .entry(definition.name.clone())
            .or_insert_with(|| MemoryTable {
                definition: definition.clone(),
                rows: BTreeMap::new(),
            });
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> DbsyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.tables.remove(table);
        Ok(())
    }

    async fn switch_table(&self, live: &str, staged: &str) -> DbsyncResult<()> {
        self.check_injected("switch_table")?;
        let mut inner = self.inner.lock().unwrap();

        let mut staged_table = inner.tables.remove(staged).ok_or_else(|| {
            dbsync_error!(
                ErrorKind::MissingTargetTable,
                "Staged table does not exist",
                staged
            )
        })?;
        staged_table.definition.name = live.to_string();

        // Single mutation under the lock: a reader can never observe the
        // live name missing.
        inner.tables.insert(live.to_string(), staged_table);

        Ok(())
    }

    async fn max_watermark(
        &self,
        table: &str,
        column: &str,
    ) -> DbsyncResult<Option<DateTime<Utc>>> {
        self.with_table(table, |t| {
            Ok(t.rows
                .values()
                .filter_map(|row| row.get(column))
                .filter_map(|value| Self::parse_timestamp(value))
                .max())
        })
    }

    async fn extract_to_file(
        &self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64> {
        self.check_injected("extract_to_file")?;
        self.write_rows(path, table, columns, |_| true).await
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
        self.check_injected("extract_incrementally_to_file")?;
        let cutoff = since - overlap;
        let watermark = watermark.to_string();
        self.write_rows(path, table, columns, move |row| {
            row.get(&watermark)
                .and_then(|value| Self::parse_timestamp(value))
                .is_some_and(|value| value > cutoff)
        })
        .await
    }

    async fn load_from_file(
        &self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64> {
        self.check_injected("load_from_file")?;
        self.apply_file(table, columns, path, false).await
    }

    async fn load_incrementally_from_file(
        &self,
        table: &str,
        columns: &[String],
        path: &Path,
    ) -> DbsyncResult<u64> {
        self.check_injected("load_incrementally_from_file")?;
        self.apply_file(table, columns, path, true).await
    }

    async fn begin(&self) -> DbsyncResult<Box<dyn TargetTransaction>> {
        self.check_injected("begin")?;
        let staged = self.inner.lock().unwrap().tables.clone();
        Ok(Box::new(MemoryTransaction {
            db: self.clone(),
            staged,
            touched: BTreeSet::new(),
            checkpoint_write: None,
        }))
    }

    async fn consistency_count(&self, table: &str, at: DateTime<Utc>) -> DbsyncResult<i64> {
        self.check_injected("consistency_count")?;
        let window_start = at - Duration::hours(1);

        self.with_table(table, |t| {
            Ok(t.rows
                .values()
                .filter(|row| {
                    row.get("created_at")
                        .or_else(|| row.get("updated_at"))
                        .and_then(|value| Self::parse_timestamp(value))
                        .is_some_and(|value| value >= window_start && value <= at)
                })
                .count() as i64)
        })
    }
}
