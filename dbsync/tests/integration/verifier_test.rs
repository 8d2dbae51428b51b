use std::sync::Arc;

use chrono::Duration;

use dbsync::error::ErrorKind;
use dbsync::registry::TableRegistry;
use dbsync::test_utils::{plan_builder, ts, user_row, users_definition};
use dbsync::verifier::ConsistencyVerifier;

use crate::support::Harness;

fn verifier(harness: &Harness) -> ConsistencyVerifier {
    ConsistencyVerifier::new(
        Arc::new(harness.target.clone()),
        Arc::new(harness.registry.clone()),
        Duration::seconds(harness.config.overlap_secs as i64),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn matching_counts_verify_cleanly() {
    let harness = Harness::new();
    // Window ends at last_row_at minus overlap: 10:57, so it spans 9:57-10:57.
    let in_window = ts(2024, 5, 1, 10, 30, 0);
    harness
        .source
        .seed_table(users_definition("users"), vec![user_row(1, in_window)]);
    harness
        .target
        .seed_table(users_definition("users"), vec![user_row(1, in_window)]);
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();

    let plan = plan_builder("users")
        .consistency()
        .build(Arc::new(harness.source.clone()));
    assert!(verifier(&harness).verify(&plan).await.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn count_mismatch_names_both_sides() {
    let harness = Harness::new();
    let in_window = ts(2024, 5, 1, 10, 30, 0);
    harness.source.seed_table(
        users_definition("users"),
        vec![user_row(1, in_window), user_row(2, in_window)],
    );
    harness
        .target
        .seed_table(users_definition("users"), vec![user_row(1, in_window)]);
    harness
        .registry
        .set_force("users", harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
        .await
        .unwrap();

    let plan = plan_builder("users")
        .consistency()
        .build(Arc::new(harness.source.clone()));
    let error = verifier(&harness).verify(&plan).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::ConsistencyCheckFailed);
    let detail = error.detail().unwrap();
    assert!(detail.contains("users had a count difference of 1"));
    assert!(detail.contains("source: source_db (count: 2)"));
    assert!(detail.contains("sink: target_db (count: 1)"));
}

#[tokio::test(flavor = "multi_thread")]
async fn tables_without_a_frontier_are_silently_consistent() {
    let harness = Harness::new();
    harness
        .source
        .seed_table(users_definition("users"), vec![]);

    let plan = plan_builder("users")
        .consistency()
        .build(Arc::new(harness.source.clone()));
    assert!(verifier(&harness).verify(&plan).await.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn verify_all_reports_every_mismatch() {
    let harness = Harness::new();
    let in_window = ts(2024, 5, 1, 10, 30, 0);
    for table in ["users", "orders"] {
        harness.source.seed_table(
            users_definition(table),
            vec![user_row(1, in_window), user_row(2, in_window)],
        );
        harness
            .target
            .seed_table(users_definition(table), vec![user_row(1, in_window)]);
        harness
            .registry
            .set_force(table, harness.checkpoint_at(ts(2024, 5, 1, 11, 0, 0)))
            .await
            .unwrap();
    }

    let plans = vec![
        plan_builder("users")
            .consistency()
            .build(Arc::new(harness.source.clone())),
        plan_builder("orders")
            .consistency()
            .build(Arc::new(harness.source.clone())),
    ];
    let error = verifier(&harness).verify_all(&plans).await.unwrap_err();
    assert_eq!(error.kinds().len(), 2);
}
