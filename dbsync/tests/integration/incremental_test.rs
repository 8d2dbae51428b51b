use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dbsync::actions::{IncrementalLoadAction, LoadAction, LoadContext, StageOutcome};
use dbsync::db::adapter::{DeleteReconciler, TargetTransaction};
use dbsync::error::DbsyncResult;
use dbsync::plan::TablePlan;
use dbsync::registry::TableRegistry;
use dbsync::test_utils::{plan_builder, ts, user_row, user_row_updated, users_definition};

use crate::support::{run_action, Harness};

#[tokio::test(flavor = "multi_thread")]
async fn merges_rows_newer_than_the_checkpoint() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![
            user_row(1, ts(2024, 5, 1, 9, 0, 0)),
            user_row(2, ts(2024, 5, 1, 11, 30, 0)),
        ],
    );
    harness.target.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 5, 1, 9, 0, 0))],
    );
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();

    let plan = plan_builder("users").build(Arc::new(harness.source.clone()));
    let outcome = run_action(
        IncrementalLoadAction::new(harness.ctx(), plan),
        &harness.sink,
    )
    .await;

    assert!(outcome.is_done());
    assert_eq!(harness.target.row_count("users"), 2);

    let checkpoint = harness.registry.entries().remove("users").unwrap();
    assert_eq!(checkpoint.last_synced_at, harness.clock.now());
    assert_eq!(checkpoint.last_row_at, Some(ts(2024, 5, 1, 11, 30, 0)));
    // The optimistic lock field is untouched by incremental syncs.
    assert_eq!(
        checkpoint.last_batch_synced_at,
        Some(ts(2024, 5, 1, 11, 0, 0))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn overlap_re_reads_updated_rows_without_duplicating() {
    let harness = Harness::new();
    // Row 1 was updated just inside the overlap window; the target still
    // holds its previous version.
    harness.source.seed_table(
        users_definition("users"),
        vec![user_row_updated(
            1,
            ts(2024, 5, 1, 8, 0, 0),
            ts(2024, 5, 1, 10, 59, 0),
        )],
    );
    harness.target.seed_table(
        users_definition("users"),
        vec![user_row_updated(
            1,
            ts(2024, 5, 1, 8, 0, 0),
            ts(2024, 5, 1, 10, 30, 0),
        )],
    );
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();

    let plan = plan_builder("users").build(Arc::new(harness.source.clone()));
    let outcome = run_action(
        IncrementalLoadAction::new(harness.ctx(), plan),
        &harness.sink,
    )
    .await;

    assert!(outcome.is_done());
    assert_eq!(harness.target.row_count("users"), 1);
    assert_eq!(
        harness.target.rows("users")[0].get("updated_at").unwrap(),
        &ts(2024, 5, 1, 10, 59, 0).to_rfc3339()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn skips_tables_without_a_checkpoint() {
    let harness = Harness::new();
    harness
        .source
        .seed_table(users_definition("users"), vec![]);

    let plan = plan_builder("users").build(Arc::new(harness.source.clone()));
    let outcome = run_action(
        IncrementalLoadAction::new(harness.ctx(), plan),
        &harness.sink,
    )
    .await;

    assert!(outcome.is_done());
    assert!(!harness.target.has_table("users"));
    assert!(harness
        .sink
        .logs()
        .iter()
        .any(|log| log.contains("awaiting its first batch load")));
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_lock_discards_the_checkpoint_update() {
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

    let plan = plan_builder("users").build(Arc::new(harness.source.clone()));
    let mut action = IncrementalLoadAction::new(harness.ctx(), plan);

    assert_eq!(action.prepare().await.unwrap(), StageOutcome::Continue);
    assert_eq!(action.extract().await.unwrap(), StageOutcome::Continue);
    assert_eq!(action.load().await.unwrap(), StageOutcome::Continue);

    // A batch load completes while we were merging, replacing the checkpoint.
    let rebatched = harness.checkpoint_at(ts(2024, 5, 1, 12, 30, 0));
    harness.registry.set_force("users", rebatched).await.unwrap();

    assert_eq!(action.finalize().await.unwrap(), StageOutcome::Continue);

    // The batch load's checkpoint survives untouched, and the merge rolled
    // back with it; the batch load already carried the row.
    let checkpoint = harness.registry.entries().remove("users").unwrap();
    assert_eq!(checkpoint, rebatched);
    assert_eq!(harness.target.row_count("users"), 0);
    assert!(harness
        .sink
        .logs()
        .iter()
        .any(|log| log.contains("discarding incremental result")));
}

#[tokio::test(flavor = "multi_thread")]
async fn recreates_a_dropped_target_table() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![
            user_row(1, ts(2024, 5, 1, 9, 0, 0)),
            user_row(2, ts(2024, 5, 1, 11, 30, 0)),
        ],
    );
    // Checkpointed, but someone dropped the target table out from under us.
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();

    let plan = plan_builder("users").build(Arc::new(harness.source.clone()));
    let outcome = run_action(
        IncrementalLoadAction::new(harness.ctx(), plan),
        &harness.sink,
    )
    .await;

    assert!(outcome.is_done());
    assert!(harness.target.has_table("users"));
    // Only rows past the checkpoint (minus overlap) come back; recovery of
    // the rest is a batch load's job.
    assert_eq!(harness.target.row_count("users"), 1);
    assert!(harness
        .sink
        .logs()
        .iter()
        .any(|log| log.contains("recreated before sync")));
}

/// Reconciler that deletes target rows with a watermark past a fixed instant,
/// standing in for an audit-log-driven delete replay.
struct WindowReconciler {
    since: DateTime<Utc>,
}

#[async_trait]
impl DeleteReconciler for WindowReconciler {
    async fn reconcile(
        &self,
        tx: &mut dyn TargetTransaction,
        plan: &TablePlan,
    ) -> DbsyncResult<()> {
        tx.delete_recent(plan, "updated_at", self.since).await?;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn reconciler_deletes_commit_with_the_merge() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 5, 1, 11, 30, 0))],
    );
    // Row 9 was deleted upstream after 11:40; only the reconciler knows.
    harness.target.seed_table(
        users_definition("users"),
        vec![user_row(9, ts(2024, 5, 1, 11, 45, 0))],
    );
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();

    let reconciler = WindowReconciler {
        since: ts(2024, 5, 1, 11, 40, 0),
    };
    let ctx = LoadContext::new(
        Arc::new(harness.target.clone()),
        Arc::new(harness.registry.clone()),
        Arc::new(harness.sink.clone()),
        harness.clock.clock(),
        &harness.config,
        Some(Arc::new(reconciler)),
    );

    let plan = plan_builder("users").build(Arc::new(harness.source.clone()));
    let outcome = run_action(IncrementalLoadAction::new(ctx, plan), &harness.sink).await;

    assert!(outcome.is_done());
    // The merge and the reconciler's delete landed together: row 1 arrived,
    // row 9 is gone.
    let ids: Vec<_> = harness
        .target
        .rows("users")
        .iter()
        .map(|row| row.get("id").unwrap().clone())
        .collect();
    assert_eq!(ids, vec!["1"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn always_sync_bootstraps_an_unseen_table() {
    let harness = Harness::new();
    harness.source.seed_table(
        users_definition("users"),
        vec![
            user_row(1, ts(2024, 5, 1, 9, 0, 0)),
            user_row(2, ts(2024, 5, 1, 10, 0, 0)),
        ],
    );

    let plan = plan_builder("users")
        .always_sync()
        .build(Arc::new(harness.source.clone()));
    let outcome = run_action(
        IncrementalLoadAction::new(harness.ctx(), plan),
        &harness.sink,
    )
    .await;

    assert!(outcome.is_done());
    // The epoch checkpoint makes the first incremental pass pull everything.
    assert_eq!(harness.target.row_count("users"), 2);
    let checkpoint = harness.registry.entries().remove("users").unwrap();
    assert_eq!(checkpoint.last_synced_at, harness.clock.now());
}

#[tokio::test(flavor = "multi_thread")]
async fn always_sync_tears_down_a_vanished_table() {
    let harness = Harness::new();
    harness.target.seed_table(
        users_definition("users"),
        vec![user_row(1, ts(2024, 5, 1, 9, 0, 0))],
    );
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();

    let plan = plan_builder("users")
        .always_sync()
        .build(Arc::new(harness.source.clone()));
    let outcome = run_action(
        IncrementalLoadAction::new(harness.ctx(), plan),
        &harness.sink,
    )
    .await;

    assert!(outcome.is_done());
    assert!(!harness.target.has_table("users"));
    assert!(harness.registry.entries().is_empty());
}
