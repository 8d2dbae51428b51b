use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::shared::{ManagerConfig, PgConnectionConfig, TableSpec, ValidationError};

/// How the tables of one source are discovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum TableDiscoveryConfig {
    /// Sync every eligible table found in the source schema.
    AllTables,
    /// Sync only the explicitly listed table specs.
    Static { tables: Vec<TableSpec> },
}

/// One replication source: where to connect and which tables to pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceConfig {
    pub connection: PgConnectionConfig,
    pub discovery: TableDiscoveryConfig,
}

/// Top-level configuration for a replicator process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplicatorConfig {
    /// Named source databases, each with its own table discovery policy.
    pub sources: BTreeMap<String, SourceConfig>,
    /// The single target database all sources replicate into.
    pub target: PgConnectionConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
}

impl ReplicatorConfig {
    /// Validates the whole config tree.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.manager.validate()
    }
}
