//! Helpers shared by the load actions.

use crate::error::DbsyncResult;
use crate::plan::TablePlan;
use crate::schema::{resolve_columns, TableSchema};

/// The per-cycle resolution of a plan against live schemas.
pub(crate) struct ResolvedTable {
    pub schema: TableSchema,
    pub columns: Vec<String>,
    pub watermark: Option<String>,
}

/// Fetches the source schema and resolves the effective column list.
///
/// `target_columns` is passed when the live target table must constrain the
/// load (incremental and refresh-recent); batch loads create the table fresh
/// and pass `None`.
pub(crate) async fn resolve_source_table(
    plan: &TablePlan,
    target_columns: Option<&[String]>,
) -> DbsyncResult<ResolvedTable> {
    let schema = plan.source.hash_schema(&plan.source_table_name).await?;
    let columns = resolve_columns(plan, &schema.column_names(), target_columns);
    let watermark = TablePlan::watermark_column(&columns).map(str::to_string);

    Ok(ResolvedTable {
        schema,
        columns,
        watermark,
    })
}

/// Column names of the live target table, used to constrain in-place loads.
pub(crate) async fn target_column_names(
    target: &dyn crate::db::adapter::DatabaseAdapter,
    table: &str,
) -> DbsyncResult<Vec<String>> {
    Ok(target.hash_schema(table).await?.column_names())
}
