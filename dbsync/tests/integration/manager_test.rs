use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;

use dbsync::error::{DbsyncError, DbsyncResult, ErrorKind};
use dbsync::manager::Manager;
use dbsync::plan::TablePlan;
use dbsync::plans::TablePlanProvider;
use dbsync::registry::TableRegistry;
use dbsync::test_utils::{plan_builder, ts, user_row, users_definition};

use crate::support::{Harness, RecordingReporter};

struct FixedPlans(Vec<TablePlan>);

#[async_trait]
impl TablePlanProvider for FixedPlans {
    async fn table_plans(&self) -> DbsyncResult<Vec<TablePlan>> {
        Ok(self.0.clone())
    }
}

fn manager(harness: &Harness, plans: Vec<TablePlan>, reporter: &RecordingReporter) -> Manager {
    Manager::new(
        vec![Arc::new(FixedPlans(plans))],
        harness.ctx(),
        Arc::new(reporter.clone()),
        harness.config.clone(),
    )
    .sequential()
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_nonactive_loads_only_unckeckpointed_tables() {
    let harness = Harness::new();
    for table in ["users", "orders"] {
        harness.source.seed_table(
            users_definition(table),
            vec![user_row(1, ts(2024, 5, 1, 9, 0, 0))],
        );
    }
    harness
        .registry
        .set_force("orders", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();

    let source = Arc::new(harness.source.clone());
    let plans = vec![
        plan_builder("users").build(source.clone()),
        plan_builder("orders").build(source),
    ];
    let reporter = RecordingReporter::new();
    manager(&harness, plans, &reporter)
        .batch_nonactive(&[])
        .await
        .unwrap();

    assert!(harness.target.has_table("users"));
    assert!(!harness.target.has_table("orders"));
    assert!(reporter.reports().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn naming_an_unplanned_table_fails_before_any_work() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 5, 1, 9, 0, 0))],
    );

    let plans = vec![plan_builder("users").build(Arc::new(harness.source.clone()))];
    let reporter = RecordingReporter::new();
    let error = manager(&harness, plans, &reporter)
        .batch_nonactive(&["users".to_string(), "nope".to_string()])
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::UnknownTable);
    assert!(!harness.target.has_table("users"));
}

#[tokio::test(flavor = "multi_thread")]
async fn naming_a_table_overrides_its_batch_opt_out() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 5, 1, 9, 0, 0))],
    );

    let mut plan = plan_builder("users").build(Arc::new(harness.source.clone()));
    plan.batch_load = false;
    let reporter = RecordingReporter::new();
    manager(&harness, vec![plan], &reporter)
        .batch_nonactive(&["users".to_string()])
        .await
        .unwrap();

    assert!(harness.target.has_table("users"));
}

#[tokio::test(flavor = "multi_thread")]
async fn per_table_failures_are_reported_and_aggregated() {
    let harness = Harness::new();
    for table in ["users", "orders"] {
        harness.source.seed_table(
            users_definition(table),
            vec![user_row(1, ts(2024, 5, 1, 9, 0, 0))],
        );
    }
    // Sequential mode processes plans in order; the first extraction fails.
    harness.source.fail_next(
        "extract_to_file",
        DbsyncError::from((ErrorKind::ExtractFailed, "disk full")),
    );

    let source = Arc::new(harness.source.clone());
    let plans = vec![
        plan_builder("users").build(source.clone()),
        plan_builder("orders").build(source),
    ];
    let reporter = RecordingReporter::new();
    let error = manager(&harness, plans, &reporter)
        .batch_nonactive(&[])
        .await
        .unwrap_err();

    assert_eq!(error.kinds(), vec![ErrorKind::ExtractFailed]);
    assert_eq!(
        reporter.reports(),
        vec![("users".to_string(), ErrorKind::ExtractFailed)]
    );
    assert!(!harness.target.has_table("users"));
    assert!(harness.target.has_table("orders"));
}

#[tokio::test(flavor = "multi_thread")]
async fn purge_failure_does_not_mask_load_failures() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 5, 1, 9, 0, 0))],
    );
    harness.source.fail_next(
        "extract_to_file",
        DbsyncError::from((ErrorKind::ExtractFailed, "disk full")),
    );
    // The purge that follows the batch pass fails too.
    harness.target.fail_next(
        "list_tables",
        DbsyncError::from((ErrorKind::TargetQueryFailed, "connection reset")),
    );

    let plans = vec![plan_builder("users").build(Arc::new(harness.source.clone()))];
    let reporter = RecordingReporter::new();
    let error = manager(&harness, plans, &reporter)
        .batch_nonactive(&[])
        .await
        .unwrap_err();

    // Both failures surface; neither hides the other.
    let kinds = error.kinds();
    assert!(kinds.contains(&ErrorKind::ExtractFailed));
    assert!(kinds.contains(&ErrorKind::TargetQueryFailed));
}

// The increment loop never yields when there are no plans, so on a
// single-CPU host one worker thread would starve the sleep and stop below.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn increment_loop_stops_when_asked() {
    let harness = Harness::new();
    let reporter = RecordingReporter::new();
    let manager = manager(&harness, Vec::new(), &reporter);
    let stop = manager.stop_handle();

    let run = tokio::spawn(async move { manager.increment_active().await });
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    stop.stop();

    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failures_stop_the_loop_at_the_bound() {
    let mut harness = Harness::new();
    harness.config.max_consecutive_failures = 3;
    harness.config.retry_delay_ms = 1;

    harness.source.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 5, 1, 11, 30, 0))],
    );
    harness
        .target
        .seed_table(users_definition("users"), vec![]);
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();
    for _ in 0..5 {
        harness.target.fail_next(
            "load_incrementally_from_file",
            DbsyncError::from((ErrorKind::TargetTransient, "lock wait timeout")),
        );
    }

    let plans = vec![plan_builder("users").build(Arc::new(harness.source.clone()))];
    let reporter = RecordingReporter::new();
    let error = manager(&harness, plans, &reporter)
        .increment_active()
        .await
        .unwrap_err();

    assert!(error.is_transient());
    assert_eq!(reporter.reports().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn fatal_failures_end_the_loop_immediately() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 5, 1, 11, 30, 0))],
    );
    harness
        .target
        .seed_table(users_definition("users"), vec![]);
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();
    harness.target.fail_next(
        "load_incrementally_from_file",
        DbsyncError::from((ErrorKind::TargetQueryFailed, "relation is corrupt")),
    );

    let plans = vec![plan_builder("users").build(Arc::new(harness.source.clone()))];
    let reporter = RecordingReporter::new();
    let error = manager(&harness, plans, &reporter)
        .increment_active()
        .await
        .unwrap_err();

    assert!(!error.is_transient());
    assert_eq!(reporter.reports().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn purge_drops_unplanned_tables_but_never_metadata() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 5, 1, 9, 0, 0))],
    );
    harness
        .target
        .seed_table(users_definition("legacy"), vec![]);
    harness
        .target
        .seed_table(users_definition("meta_audit"), vec![]);
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();
    harness
        .registry
        .set_force("legacy", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();

    let plans = vec![plan_builder("users").build(Arc::new(harness.source.clone()))];
    let reporter = RecordingReporter::new();
    manager(&harness, plans, &reporter)
        .batch_nonactive(&[])
        .await
        .unwrap();

    assert!(!harness.target.has_table("legacy"));
    assert!(harness.target.has_table("meta_audit"));
    let entries = harness.registry.entries();
    assert!(entries.contains_key("users"));
    assert!(!entries.contains_key("legacy"));
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_recent_runs_only_enabled_plans() {
    let harness = Harness::new();
    for table in ["users", "orders"] {
        harness.source.seed_table(
            users_definition(table),
            vec![user_row(1, ts(2024, 4, 30, 18, 0, 0))],
        );
        harness
            .target
            .seed_table(users_definition(table), vec![]);
        harness
            .registry
            .set_force(table, harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
            .await
            .unwrap();
    }

    let source = Arc::new(harness.source.clone());
    let plans = vec![
        plan_builder("users").refresh_recent().build(source.clone()),
        plan_builder("orders").build(source),
    ];
    let reporter = RecordingReporter::new();
    manager(&harness, plans, &reporter)
        .refresh_recent(&[])
        .await
        .unwrap();

    assert_eq!(harness.target.row_count("users"), 1);
    assert_eq!(harness.target.row_count("orders"), 0);
}
