// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Goal progression specs: dependency order, cycles, cancellation,
//! lane caps.

use crate::prelude::*;
use drover_engine::{ExecOutcome, SchedulerConfig};
use drover_store::RunMetrics;

#[tokio::test]
async fn dependent_work_items_run_in_order_with_spend() {
    let h = harness();
    let goal = Goal::builder().title("build X").build();
    let w1 = WorkItem::builder().goal_id(goal.id).title("W1").created_at_ms(1).build();
    let w2 = WorkItem::builder()
        .goal_id(goal.id)
        .title("W2")
        .created_at_ms(2)
        .deps(vec![w1.id])
        .build();
    h.seed(&goal, &[w1.clone(), w2.clone()]);

    h.scheduler.submit_goal(&goal.id).await.expect("submit");
    h.drive(6).await;

    // Observable order: goal start, W1, W2, goal done.
    let events = h.events_snapshot();
    let order: Vec<(EventKind, Option<String>)> = events
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                EventKind::GoalStarted
                    | EventKind::WorkItemStarted
                    | EventKind::WorkItemCompleted
                    | EventKind::GoalCompleted
            )
        })
        .map(|e| (e.kind, e.work_item_id.map(|id| id.as_str().to_string())))
        .collect();
    assert_eq!(
        order,
        vec![
            (EventKind::GoalStarted, None),
            (EventKind::WorkItemStarted, Some(w1.id.as_str().to_string())),
            (EventKind::WorkItemCompleted, Some(w1.id.as_str().to_string())),
            (EventKind::WorkItemStarted, Some(w2.id.as_str().to_string())),
            (EventKind::WorkItemCompleted, Some(w2.id.as_str().to_string())),
            (EventKind::GoalCompleted, None),
        ]
    );

    // Two successful runs at 100 tokens each.
    assert_eq!(h.goal(&goal.id).spent.tokens, 200);
    assert_eq!(h.goal(&goal.id).status, GoalStatus::Completed);
}

#[tokio::test]
async fn dependency_gate_holds_until_dep_is_done() {
    let h = harness();
    let goal = Goal::builder().build();
    let w1 = WorkItem::builder().goal_id(goal.id).title("dep").created_at_ms(1).build();
    let w2 = WorkItem::builder()
        .goal_id(goal.id)
        .title("gated")
        .created_at_ms(2)
        .deps(vec![w1.id])
        .build();
    h.seed(&goal, &[w1.clone(), w2.clone()]);
    h.scheduler.submit_goal(&goal.id).await.expect("submit");

    // One tick: only the dependency ran; the dependent reached
    // in-progress never — it is still queued or ready at most.
    h.scheduler.tick().await.expect("tick");
    let statuses: Vec<(String, WorkItemStatus)> = h
        .items(&goal.id)
        .into_iter()
        .map(|i| (i.title.clone(), i.status))
        .collect();
    let dep = statuses.iter().find(|(t, _)| t == "dep").expect("dep");
    let gated = statuses.iter().find(|(t, _)| t == "gated").expect("gated");
    assert_eq!(dep.1, WorkItemStatus::Done);
    assert!(matches!(gated.1, WorkItemStatus::Queued | WorkItemStatus::Ready));
    assert_eq!(h.exec.executed_titles(), vec!["dep"]);
}

#[tokio::test]
async fn cycle_is_rejected_with_named_vertex_and_no_runs() {
    let h = harness();
    let goal = Goal::builder().build();
    let mut w1 = WorkItem::builder().goal_id(goal.id).build();
    let w2 = WorkItem::builder().goal_id(goal.id).deps(vec![w1.id]).build();
    w1.deps = vec![w2.id];
    h.seed(&goal, &[w1.clone(), w2.clone()]);

    let err = h.scheduler.submit_goal(&goal.id).await.expect_err("cycle must fail");
    assert!(err.to_string().contains("Cycle detected"));
    assert_eq!(h.goal(&goal.id).status, GoalStatus::Failed);
    for item in [&w1, &w2] {
        assert!(h.store.with_tx(|tx| tx.list_runs(&item.id)).expect("store").is_empty());
    }
}

#[tokio::test]
async fn cancel_twice_reports_already_cancelled_and_stays_quiet() {
    let h = harness();
    h.exec.hang_until_cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
    let goal = Goal::builder().build();
    let item = WorkItem::builder().goal_id(goal.id).build();
    h.seed(&goal, &[item.clone()]);
    h.scheduler.submit_goal(&goal.id).await.expect("submit");

    let scheduler = std::sync::Arc::clone(&h.scheduler);
    let tick = tokio::spawn(async move { scheduler.tick().await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    h.scheduler.cancel_goal(&goal.id, None).await.expect("first cancel succeeds");
    let err = h.scheduler.cancel_goal(&goal.id, None).await.expect_err("second fails");
    assert!(err.to_string().contains("already cancelled"));

    tick.await.expect("join").expect("tick");
    assert_eq!(h.goal(&goal.id).status, GoalStatus::Cancelled);

    // The in-flight run was recorded as failed or aborted...
    let runs = h.store.with_tx(|tx| tx.list_runs(&item.id)).expect("store");
    assert_eq!(runs.len(), 1);
    assert!(matches!(runs[0].status, RunStatus::Failed | RunStatus::Aborted));
    // ...and nothing was emitted after goal.cancelled.
    assert_eq!(h.event_kinds().last(), Some(&EventKind::GoalCancelled));
}

#[tokio::test]
async fn lane_cap_never_exceeded() {
    let h = harness_with(SchedulerConfig {
        lane_caps: drover_core::LaneCaps { main: 2, subagent: 4, cron: 2, session: 2 },
        ..SchedulerConfig::default()
    });
    let goal = Goal::builder().build();
    let items: Vec<WorkItem> = (0..5)
        .map(|i| {
            WorkItem::builder()
                .goal_id(goal.id)
                .title(format!("t{i}"))
                .created_at_ms(i as u64)
                .build()
        })
        .collect();
    h.seed(&goal, &items);
    h.scheduler.submit_goal(&goal.id).await.expect("submit");

    let mut per_tick = Vec::new();
    for _ in 0..4 {
        let report = h.scheduler.tick().await.expect("tick");
        per_tick.push(report.dispatched);
        if h.scheduler.active_goals().is_empty() {
            break;
        }
    }
    assert!(per_tick.iter().all(|d| *d <= 2), "dispatch per tick {per_tick:?} within cap");
    assert_eq!(per_tick.iter().sum::<usize>(), 5);
    assert_eq!(h.goal(&goal.id).status, GoalStatus::Completed);
}

#[tokio::test]
async fn retry_budgeted_failure_escalates_once_spent() {
    let h = harness();
    let goal = Goal::builder().build();
    let item = WorkItem::builder().goal_id(goal.id).title("flaky").max_retries(1).build();
    h.seed(&goal, &[item.clone()]);
    for attempt in 1..=2 {
        h.exec.script(
            "flaky",
            ExecOutcome::Failure {
                error: format!("attempt {attempt} failed"),
                metrics: RunMetrics::default(),
            },
        );
    }
    h.scheduler.submit_goal(&goal.id).await.expect("submit");
    h.drive(4).await;

    assert_eq!(h.goal(&goal.id).status, GoalStatus::Failed);
    let runs = h.store.with_tx(|tx| tx.list_runs(&item.id)).expect("store");
    assert_eq!(runs.len(), 2, "one retry was admitted");
    assert!(h.event_kinds().contains(&EventKind::EscalationCreated));
}
