//! Table plan providers: where the set of replicated tables comes from.
//!
//! Two strategies exist. Static plans replicate exactly what the operator
//! wrote down; all-tables plans discover every eligible table in a source at
//! the start of each cycle.

mod all_tables;
mod static_plan;

use async_trait::async_trait;

pub use all_tables::AllTablesPlan;
pub use static_plan::StaticTablePlan;

use crate::error::DbsyncResult;
use crate::plan::TablePlan;

/// Produces the table plans for one source database.
///
/// Called once per cycle; implementations may consult the live source, so the
/// plan set can change between cycles.
#[async_trait]
pub trait TablePlanProvider: Send + Sync {
    async fn table_plans(&self) -> DbsyncResult<Vec<TablePlan>>;
}
