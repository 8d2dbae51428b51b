//! Table schemas and the plan-to-DDL resolution used to create target tables.

use std::collections::BTreeMap;

use crate::plan::{IndexSpec, TablePlan};

/// Metadata for one column, with the type already normalized into the target
/// dialect by the adapter that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

/// A source table schema as reported by [`crate::db::adapter::DatabaseAdapter::hash_schema`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns flagged as primary key by the source.
    pub fn primary_key_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect()
    }
}

/// A fully resolved definition ready to be handed to
/// [`crate::db::adapter::DatabaseAdapter::create_table`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexSpec>,
}

/// Resolves a plan plus its fetched source schema into target DDL.
///
/// Type casts from the plan override the normalized source types. The primary
/// key comes from the plan when given, else from the source schema, defaulting
/// to `id` so tables without a declared key still get one.
pub fn table_definition(
    plan: &TablePlan,
    schema: &TableSchema,
    resolved_columns: &[String],
    table_name: &str,
) -> TableDefinition {
    let type_casts: &BTreeMap<String, String> = &plan.type_casts;

    let columns = resolved_columns
        .iter()
        .filter_map(|name| schema.column(name))
        .map(|column| {
            let sql_type = type_casts
                .get(&column.name)
                .cloned()
                .unwrap_or_else(|| column.sql_type.clone());
            ColumnDef {
                name: column.name.clone(),
                sql_type,
                nullable: column.nullable,
                primary_key: column.primary_key,
            }
        })
        .collect::<Vec<_>>();

    let mut primary_key = plan
        .primary_key
        .clone()
        .unwrap_or_else(|| schema.primary_key_columns());
    primary_key.retain(|key| resolved_columns.iter().any(|c| c == key));
    if primary_key.is_empty() {
        primary_key = vec!["id".to_string()];
    }

    TableDefinition {
        name: table_name.to_string(),
        columns,
        primary_key,
        indexes: plan.indexes.clone(),
    }
}

/// Resolves the effective column list for a plan.
///
/// A plan requesting all columns gets every source column; otherwise the
/// intersection of requested and source columns, in source schema order. When
/// `target_columns` is given (the live table already exists), the result is
/// further intersected with it so target tables lagging behind source schema
/// changes keep loading.
pub fn resolve_columns(
    plan: &TablePlan,
    source_columns: &[String],
    target_columns: Option<&[String]>,
) -> Vec<String> {
    let mut resolved: Vec<String> = match &plan.columns {
        crate::plan::ColumnSelection::All(_) => source_columns.to_vec(),
        crate::plan::ColumnSelection::Only(requested) => source_columns
            .iter()
            .filter(|column| requested.iter().any(|r| r == *column))
            .cloned()
            .collect(),
    };

    if let Some(target_columns) = target_columns {
        resolved.retain(|column| target_columns.iter().any(|t| t == column));
    }

    resolved
}
