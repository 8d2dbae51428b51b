use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which columns of a table are replicated.
///
/// `All` is resolved against the live source schema at run time, so newly
/// added columns are picked up without a config change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", untagged)]
pub enum ColumnSelection {
    /// Replicate every column present in the source schema.
    All(AllColumns),
    /// Replicate only the named columns.
    Only(Vec<String>),
}

/// Serde marker for the `"all"` column selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllColumns {
    All,
}

impl ColumnSelection {
    pub fn all() -> Self {
        ColumnSelection::All(AllColumns::All)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, ColumnSelection::All(_))
    }
}

impl Default for ColumnSelection {
    fn default() -> Self {
        ColumnSelection::all()
    }
}

/// Whether (and how) a table participates in windowed refresh loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", untagged)]
pub enum RefreshRecent {
    /// The table is never refresh-recent loaded.
    #[default]
    Disabled,
    /// Delete and reload the trailing window filtered by the watermark column.
    Enabled(bool),
    /// Additionally filter the delete by an auxiliary timestamp column, for
    /// tables whose watermark is not indexed on the target.
    WithAuxColumn(String),
}

impl RefreshRecent {
    pub fn is_enabled(&self) -> bool {
        match self {
            RefreshRecent::Disabled => false,
            RefreshRecent::Enabled(enabled) => *enabled,
            RefreshRecent::WithAuxColumn(_) => true,
        }
    }

    pub fn aux_column(&self) -> Option<&str> {
        match self {
            RefreshRecent::WithAuxColumn(column) => Some(column.as_str()),
            _ => None,
        }
    }
}

/// A secondary index to create on the target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

fn default_batch_load() -> bool {
    true
}

/// A user-authored spec for one replicated table.
///
/// This is the static counterpart of automatic table discovery: it pins down
/// an explicit column subset, useful when some columns carry sensitive or
/// oversized data that must not leave the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TableSpec {
    /// Name of the table on the target. Defaults to the source table name
    /// with `__` collapsed to `_` (Postgres relation prefixes flatten into a
    /// single target namespace).
    pub table_name: Option<String>,
    /// Name of the table on the source. Defaults to `table_name`.
    pub source_table_name: Option<String>,
    #[serde(default)]
    pub columns: ColumnSelection,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    /// Explicit primary key override; defaults to the source schema's key.
    #[serde(default)]
    pub primary_key: Option<Vec<String>>,
    /// Whether the table is eligible for full batch reloads.
    #[serde(default = "default_batch_load")]
    pub batch_load: bool,
    #[serde(default)]
    pub refresh_recent: RefreshRecent,
    /// Whether the table participates in periodic consistency verification.
    #[serde(default)]
    pub consistency: bool,
    /// Whether the incremental loop should bootstrap (and tear down) this
    /// table automatically rather than waiting for an operator batch load.
    #[serde(default)]
    pub always_sync: bool,
    /// Per-column SQL type overrides applied when creating the target table.
    #[serde(default)]
    pub type_casts: BTreeMap<String, String>,
}
