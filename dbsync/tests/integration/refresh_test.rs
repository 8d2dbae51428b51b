use std::sync::Arc;

use dbsync::actions::RefreshRecentLoadAction;
use dbsync::error::{DbsyncError, ErrorKind};
use dbsync::registry::TableRegistry;
use dbsync::test_utils::{plan_builder, ts, user_row, users_definition};

use crate::support::{run_action, Harness};

#[tokio::test(flavor = "multi_thread")]
async fn reloads_the_recent_window_in_place() {
    let harness = Harness::new();
    // Source truth: rows 1 (old), 2 (in window). Row 3 exists only in the
    // target (a late upstream delete); row 2 is missing from the target (a
    // late arrival).
    harness.source.seed_table(
        users_definition("users"),
        vec![
            user_row(1, ts(2024, 4, 20, 9, 0, 0)),
            user_row(2, ts(2024, 4, 30, 18, 0, 0)),
        ],
    );
    harness.target.seed_table(
        users_definition("users"),
        vec![
            user_row(1, ts(2024, 4, 20, 9, 0, 0)),
            user_row(3, ts(2024, 4, 30, 20, 0, 0)),
        ],
    );
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();

    let plan = plan_builder("users")
        .refresh_recent()
        .build(Arc::new(harness.source.clone()));
    let outcome = run_action(
        RefreshRecentLoadAction::new(harness.ctx(), plan),
        &harness.sink,
    )
    .await;

    assert!(outcome.is_done());
    let ids: Vec<String> = harness
        .target
        .rows("users")
        .iter()
        .map(|row| row.get("id").unwrap().clone())
        .collect();
    assert_eq!(ids, vec!["1", "2"]);

    // The checkpoint is a repair pass's input, never its output.
    let checkpoint = harness.registry.entries().remove("users").unwrap();
    assert_eq!(checkpoint, harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_reload_leaves_the_window_intact() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![
            user_row(1, ts(2024, 4, 20, 9, 0, 0)),
            user_row(2, ts(2024, 4, 30, 18, 0, 0)),
        ],
    );
    harness.target.seed_table(
        users_definition("users"),
        vec![
            user_row(1, ts(2024, 4, 20, 9, 0, 0)),
            user_row(2, ts(2024, 4, 30, 18, 0, 0)),
        ],
    );
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();
    harness.target.fail_next(
        "load_from_file",
        DbsyncError::from((ErrorKind::TargetTransient, "lock wait timeout")),
    );

    let plan = plan_builder("users")
        .refresh_recent()
        .build(Arc::new(harness.source.clone()));
    let outcome = run_action(
        RefreshRecentLoadAction::new(harness.ctx(), plan),
        &harness.sink,
    )
    .await;

    assert!(!outcome.is_done());
    // The delete rolled back with the failed reload: no hole in the window.
    let ids: Vec<String> = harness
        .target
        .rows("users")
        .iter()
        .map(|row| row.get("id").unwrap().clone())
        .collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn recreates_a_dropped_target_table() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![
            user_row(1, ts(2024, 4, 20, 9, 0, 0)),
            user_row(2, ts(2024, 4, 30, 18, 0, 0)),
        ],
    );
    // Checkpointed, but the target table itself is gone.
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();

    let plan = plan_builder("users")
        .refresh_recent()
        .build(Arc::new(harness.source.clone()));
    let outcome = run_action(
        RefreshRecentLoadAction::new(harness.ctx(), plan),
        &harness.sink,
    )
    .await;

    assert!(outcome.is_done());
    assert!(harness.target.has_table("users"));
    // The in-window row comes back; older rows wait for a batch load.
    let ids: Vec<String> = harness
        .target
        .rows("users")
        .iter()
        .map(|row| row.get("id").unwrap().clone())
        .collect();
    assert_eq!(ids, vec!["2"]);
    assert!(harness
        .sink
        .logs()
        .iter()
        .any(|log| log.contains("recreated before refresh")));
}

#[tokio::test(flavor = "multi_thread")]
async fn skips_without_a_checkpoint() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 4, 30, 18, 0, 0))],
    );

    let plan = plan_builder("users")
        .refresh_recent()
        .build(Arc::new(harness.source.clone()));
    let outcome = run_action(
        RefreshRecentLoadAction::new(harness.ctx(), plan),
        &harness.sink,
    )
    .await;

    assert!(outcome.is_done());
    assert!(!harness.target.has_table("users"));
    assert!(harness
        .sink
        .logs()
        .iter()
        .any(|log| log.contains("no checkpoint, skipping refresh")));
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_plans_skip_silently() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 4, 30, 18, 0, 0))],
    );
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();

    let plan = plan_builder("users").build(Arc::new(harness.source.clone()));
    let outcome = run_action(
        RefreshRecentLoadAction::new(harness.ctx(), plan),
        &harness.sink,
    )
    .await;

    assert!(outcome.is_done());
    assert!(!harness.target.has_table("users"));
    assert!(harness.sink.logs().is_empty());
}
