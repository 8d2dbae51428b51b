//! Table plans: the immutable per-cycle description of one replicated table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use config::shared::{ColumnSelection, IndexSpec, RefreshRecent};

use crate::db::adapter::DatabaseAdapter;

/// Candidate watermark columns, in preference order.
const WATERMARK_COLUMNS: &[&str] = &["updated_at", "created_at", "imported_at"];

/// Everything the load actions need to know about one table for one cycle.
///
/// A plan is immutable once built; per-cycle state (resolved columns, staging
/// artifacts, observed watermarks) lives on the load action instead.
#[derive(Clone)]
pub struct TablePlan {
    /// Name of the table on the target.
    pub table_name: String,
    /// Name of the table on the source.
    pub source_table_name: String,
    pub columns: ColumnSelection,
    pub indexes: Vec<IndexSpec>,
    /// Explicit primary key override; falls back to the source schema's key.
    pub primary_key: Option<Vec<String>>,
    pub batch_load: bool,
    pub refresh_recent: RefreshRecent,
    pub consistency: bool,
    pub always_sync: bool,
    /// Per-column SQL type overrides applied when creating the target table.
    pub type_casts: BTreeMap<String, String>,
    /// Handle to the source database this table is pulled from.
    pub source: Arc<dyn DatabaseAdapter>,
}

impl TablePlan {
    /// Picks the watermark column out of a resolved column list.
    ///
    /// Preference order matters: `updated_at` detects changed rows, the
    /// others only detect appends.
    pub fn watermark_column(columns: &[String]) -> Option<&str> {
        WATERMARK_COLUMNS
            .iter()
            .find(|candidate| columns.iter().any(|c| c == *candidate))
            .copied()
    }
}

impl fmt::Debug for TablePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TablePlan")
            .field("table_name", &self.table_name)
            .field("source_table_name", &self.source_table_name)
            .field("columns", &self.columns)
            .field("batch_load", &self.batch_load)
            .field("refresh_recent", &self.refresh_recent)
            .field("consistency", &self.consistency)
            .field("always_sync", &self.always_sync)
            .field("source", &self.source.name())
            .finish_non_exhaustive()
    }
}
