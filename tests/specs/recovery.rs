// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restart recovery specs.

use crate::prelude::*;

#[tokio::test]
async fn in_progress_item_without_open_run_recovers_to_ready() {
    let h = harness();
    let goal = Goal::builder().status(GoalStatus::Active).build();
    let item = WorkItem::builder()
        .goal_id(goal.id)
        .status(WorkItemStatus::InProgress)
        .build();
    h.seed(&goal, &[item.clone()]);

    let admitted = h.scheduler.recover().await.expect("recover");
    assert_eq!(admitted, 1);

    let recovered = h
        .store
        .with_tx(|tx| tx.get_work_item(&item.id))
        .expect("store")
        .expect("item");
    assert_eq!(recovered.status, WorkItemStatus::Ready);
    // Recovery itself must not mint a run.
    assert!(h.store.with_tx(|tx| tx.list_runs(&item.id)).expect("store").is_empty());

    // The recovered goal finishes normally from here.
    h.drive(4).await;
    assert_eq!(h.goal(&goal.id).status, GoalStatus::Completed);
}

#[tokio::test]
async fn stale_open_run_is_closed_aborted_and_retried() {
    let h = harness();
    let goal = Goal::builder().status(GoalStatus::Active).build();
    let item = WorkItem::builder()
        .goal_id(goal.id)
        .status(WorkItemStatus::InProgress)
        .max_retries(2)
        .build();
    h.seed(&goal, &[item.clone()]);
    h.store
        .with_tx(|tx| tx.create_run(&item.id, &goal.id, "react", 1))
        .expect("open run");

    h.scheduler.recover().await.expect("recover");

    let runs = h.store.with_tx(|tx| tx.list_runs(&item.id)).expect("store");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Aborted);

    let recovered = h
        .store
        .with_tx(|tx| tx.get_work_item(&item.id))
        .expect("store")
        .expect("item");
    assert_eq!(recovered.status, WorkItemStatus::Queued);
    assert_eq!(recovered.retry_count, 1);

    // And the goal still completes on the retry.
    h.drive(4).await;
    assert_eq!(h.goal(&goal.id).status, GoalStatus::Completed);
    let runs = h.store.with_tx(|tx| tx.list_runs(&item.id)).expect("store");
    assert_eq!(runs.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn queued_goals_are_readmitted_on_start() {
    let h = harness();
    let goal = Goal::builder().build();
    h.seed(&goal, &[WorkItem::builder().goal_id(goal.id).build()]);

    h.scheduler.recover().await.expect("recover");
    assert_eq!(h.goal(&goal.id).status, GoalStatus::Active);
    assert!(h.event_kinds().contains(&EventKind::GoalStarted));
}
