use chrono::Duration;

use dbsync::actions::{BatchLoadAction, LoadAction, StageOutcome};
use dbsync::test_utils::{plan_builder, ts, user_row, users_definition};

use crate::support::{run_action, Harness};

#[tokio::test(flavor = "multi_thread")]
async fn batch_load_builds_and_swaps_the_table() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![
            user_row(1, ts(2024, 5, 1, 9, 0, 0)),
            user_row(2, ts(2024, 5, 1, 10, 0, 0)),
            user_row(3, ts(2024, 5, 1, 11, 0, 0)),
        ],
    );

    let plan = plan_builder("users").build(std::sync::Arc::new(harness.source.clone()));
    let outcome = run_action(BatchLoadAction::new(harness.ctx(), plan), &harness.sink).await;

    assert!(outcome.is_done());
    assert_eq!(harness.target.row_count("users"), 3);
    assert!(!harness.target.has_table("new_users"));

    let checkpoint = harness.registry.entries().remove("users").unwrap();
    assert_eq!(checkpoint.last_synced_at, harness.clock.now());
    assert_eq!(checkpoint.last_batch_synced_at, Some(harness.clock.now()));
    assert_eq!(checkpoint.last_row_at, Some(ts(2024, 5, 1, 11, 0, 0)));
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_load_is_idempotent_over_a_stale_shadow_table() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 5, 1, 9, 0, 0))],
    );
    // A crashed previous run left a half-built shadow table behind.
    harness.target.seed_table(
        users_definition("new_users"),
        vec![user_row(99, ts(2024, 5, 1, 8, 0, 0))],
    );

    let plan = plan_builder("users").build(std::sync::Arc::new(harness.source.clone()));
    let outcome = run_action(BatchLoadAction::new(harness.ctx(), plan), &harness.sink).await;

    assert!(outcome.is_done());
    assert_eq!(harness.target.row_count("users"), 1);
    assert_eq!(harness.target.rows("users")[0].get("id").unwrap(), "1");
}

#[tokio::test(flavor = "multi_thread")]
async fn catch_up_merges_rows_written_during_the_load() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 5, 1, 9, 0, 0))],
    );

    let plan = plan_builder("users").build(std::sync::Arc::new(harness.source.clone()));
    let mut action = BatchLoadAction::new(harness.ctx(), plan);

    assert_eq!(action.prepare().await.unwrap(), StageOutcome::Continue);
    assert_eq!(action.extract().await.unwrap(), StageOutcome::Continue);
    assert_eq!(action.load().await.unwrap(), StageOutcome::Continue);

    // A row lands in the source while the bulk load was running, and enough
    // time passes that the shadow table is stale.
    let late_row_at = harness.clock.now() + Duration::seconds(60);
    harness.source.upsert_row("users", user_row(2, late_row_at));
    harness.clock.advance(Duration::seconds(400));

    assert_eq!(action.finalize().await.unwrap(), StageOutcome::Continue);

    assert_eq!(harness.target.row_count("users"), 2);
    let checkpoint = harness.registry.entries().remove("users").unwrap();
    // The checkpoint records the catch-up round's start, not the original
    // extraction start.
    assert!(checkpoint.last_synced_at > ts(2024, 5, 1, 12, 0, 0));
    assert_eq!(checkpoint.last_row_at, Some(late_row_at));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_source_table_skips_without_failing() {
    let harness = Harness::new();

    let plan = plan_builder("users").build(std::sync::Arc::new(harness.source.clone()));
    let outcome = run_action(BatchLoadAction::new(harness.ctx(), plan), &harness.sink).await;

    assert!(outcome.is_done());
    assert!(!harness.target.has_table("users"));
    assert!(harness
        .sink
        .logs()
        .iter()
        .any(|log| log.contains("skipping batch load")));
}
