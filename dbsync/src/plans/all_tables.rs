//! Automatic discovery of every replicable table in a source.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::db::adapter::DatabaseAdapter;
use crate::error::{DbsyncResult, ErrorKind};
use crate::plan::TablePlan;
use crate::plans::TablePlanProvider;

/// Plans every source table that can actually be kept in sync: it must have
/// a primary key (merges need one) and an `updated_at` or `created_at`
/// column (tail syncs need a watermark).
pub struct AllTablesPlan {
    source: Arc<dyn DatabaseAdapter>,
}

impl AllTablesPlan {
    pub fn new(source: Arc<dyn DatabaseAdapter>) -> Self {
        Self { source }
    }

    fn eligible(column_names: &[String], primary_key: &[String]) -> bool {
        !primary_key.is_empty()
            && column_names
                .iter()
                .any(|name| name == "updated_at" || name == "created_at")
    }
}

#[async_trait]
impl TablePlanProvider for AllTablesPlan {
    async fn table_plans(&self) -> DbsyncResult<Vec<TablePlan>> {
        let mut plans = Vec::new();

        for table in self.source.list_tables().await? {
            let schema = match self.source.hash_schema(&table).await {
                Ok(schema) => schema,
                // Tables dropped between enumeration and inspection are
                // simply not part of this cycle.
                Err(error) if error.kind() == ErrorKind::MissingSourceTable => continue,
                Err(error) => return Err(error),
            };

            if !Self::eligible(&schema.column_names(), &schema.primary_key_columns()) {
                debug!(table = %table, "not eligible for replication");
                continue;
            }

            plans.push(TablePlan {
                table_name: table.replace("__", "_"),
                source_table_name: table,
                columns: Default::default(),
                indexes: Vec::new(),
                primary_key: None,
                batch_load: true,
                refresh_recent: Default::default(),
                consistency: false,
                always_sync: false,
                type_casts: Default::default(),
                source: self.source.clone(),
            });
        }

        Ok(plans)
    }
}
