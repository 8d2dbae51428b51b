use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use config::load::load_config;
use config::shared::{ReplicatorConfig, TableDiscoveryConfig};
use dbsync::actions::LoadContext;
use dbsync::clock::system_clock;
use dbsync::db::adapter::DatabaseAdapter;
use dbsync::db::postgres::PostgresDb;
use dbsync::manager::Manager;
use dbsync::observe::{MeasurementSink, TracingSink};
use dbsync::plans::{AllTablesPlan, StaticTablePlan, TablePlanProvider};
use dbsync::registry::{PostgresRegistry, TableRegistry};
use dbsync::reporter::TracingReporter;

/// Wires config, connections and providers into a ready-to-run manager.
async fn build_manager() -> anyhow::Result<Manager> {
    let config: ReplicatorConfig = load_config().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let target_db = PostgresDb::connect(&config.target)
        .await
        .context("failed to connect to the target database")?;
    // The checkpoint registry lives in the target database and shares its
    // pool.
    let registry: Arc<dyn TableRegistry> = Arc::new(PostgresRegistry::new(target_db.pool().clone()));
    let target: Arc<dyn DatabaseAdapter> = Arc::new(target_db);

    let mut providers: Vec<Arc<dyn TablePlanProvider>> = Vec::new();
    for (name, source_config) in &config.sources {
        let source: Arc<dyn DatabaseAdapter> = Arc::new(
            PostgresDb::connect(&source_config.connection)
                .await
                .with_context(|| format!("failed to connect to source `{name}`"))?,
        );
        info!(source = %name, "connected to source");

        let provider: Arc<dyn TablePlanProvider> = match &source_config.discovery {
            TableDiscoveryConfig::AllTables => Arc::new(AllTablesPlan::new(source)),
            TableDiscoveryConfig::Static { tables } => {
                Arc::new(StaticTablePlan::new(source, tables.clone()))
            }
        };
        providers.push(provider);
    }

    let sink: Arc<dyn MeasurementSink> = Arc::new(TracingSink);
    let ctx = LoadContext::new(
        target,
        registry,
        sink,
        system_clock(),
        &config.manager,
        None,
    );

    Ok(Manager::new(
        providers,
        ctx,
        Arc::new(TracingReporter),
        config.manager,
    ))
}

pub async fn batch(tables: &[String]) -> anyhow::Result<()> {
    let manager = build_manager().await?;
    manager.batch_nonactive(tables).await?;
    info!("batch load finished");

    Ok(())
}

pub async fn refresh_recent(tables: &[String]) -> anyhow::Result<()> {
    let manager = build_manager().await?;
    manager.refresh_recent(tables).await?;
    info!("refresh-recent load finished");

    Ok(())
}

pub async fn increment() -> anyhow::Result<()> {
    let manager = build_manager().await?;

    let stop = manager.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current cycle");
            stop.stop();
        }
    });

    manager.increment_active().await?;

    Ok(())
}
