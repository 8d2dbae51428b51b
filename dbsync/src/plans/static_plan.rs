//! Operator-authored table plans.

use std::sync::Arc;

use async_trait::async_trait;

use config::shared::TableSpec;

use crate::bail;
use crate::db::adapter::DatabaseAdapter;
use crate::error::{DbsyncResult, ErrorKind};
use crate::plan::TablePlan;
use crate::plans::TablePlanProvider;

/// A fixed list of plans built from config-file table specs.
pub struct StaticTablePlan {
    source: Arc<dyn DatabaseAdapter>,
    specs: Vec<TableSpec>,
}

impl StaticTablePlan {
    pub fn new(source: Arc<dyn DatabaseAdapter>, specs: Vec<TableSpec>) -> Self {
        Self { source, specs }
    }

    fn plan_from_spec(&self, spec: &TableSpec) -> DbsyncResult<TablePlan> {
        let (table_name, source_table_name) = match (&spec.table_name, &spec.source_table_name) {
            (Some(table), Some(source)) => (table.clone(), source.clone()),
            // Source relation prefixes use `__`; they flatten to a single
            // underscore in the shared target namespace.
            (None, Some(source)) => (source.replace("__", "_"), source.clone()),
            (Some(table), None) => (table.clone(), table.clone()),
            (None, None) => bail!(
                ErrorKind::ConfigError,
                "A table spec must name at least one of table_name and source_table_name"
            ),
        };

        Ok(TablePlan {
            table_name,
            source_table_name,
            columns: spec.columns.clone(),
            indexes: spec.indexes.clone(),
            primary_key: spec.primary_key.clone(),
            batch_load: spec.batch_load,
            refresh_recent: spec.refresh_recent.clone(),
            consistency: spec.consistency,
            always_sync: spec.always_sync,
            type_casts: spec.type_casts.clone(),
            source: self.source.clone(),
        })
    }
}

#[async_trait]
impl TablePlanProvider for StaticTablePlan {
    async fn table_plans(&self) -> DbsyncResult<Vec<TablePlan>> {
        self.specs
            .iter()
            .map(|spec| self.plan_from_spec(spec))
            .collect()
    }
}
