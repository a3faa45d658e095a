// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron dispatch specs: coalesced catch-up, idempotence, claim expiry.

use crate::prelude::*;
use drover_core::{AgentDefinition, AgentKind, CronRunStatus, CronSchedule};

fn minute_agent(agent_id: &str) -> AgentDefinition {
    AgentDefinition {
        agent_id: agent_id.into(),
        kind: AgentKind::ReactGoal,
        title: format!("Agent {agent_id}"),
        description: String::new(),
        schedule: CronSchedule::Interval { every_ms: 60_000, tz: None },
        enabled: true,
        priority: 0,
        budgets: Budgets::default(),
        max_retries: 1,
        model_hint: None,
        tool_allowlist: None,
    }
}

#[tokio::test]
async fn coalesced_interval_fires_once_and_advances() {
    let h = harness();
    let t0 = 10_000_000u64;
    h.clock.set_epoch_ms(t0);
    h.agents.register(minute_agent("watcher")).expect("register");

    // Three fire times have passed when the dispatcher finally runs.
    let now = t0 + 181_000;
    h.clock.set_epoch_ms(now);
    assert_eq!(h.agents.dispatch_once().await.expect("dispatch"), 1);

    let runs = h.store.with_tx(|tx| tx.list_cron_runs("watcher")).expect("store");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].coalesced_count, 2);
    assert_eq!(runs[0].status, CronRunStatus::Submitted);
    assert!(runs[0].goal_id.is_some());

    let job = h.store.with_tx(|tx| tx.get_cron_job("watcher")).expect("store").expect("job");
    assert!(job.in_flight.clone().expect("lease").goal_id.is_some());
    // next_run_at = now + 59 s.
    assert_eq!(job.next_run_at_ms, Some(now + 59_000));

    // Re-dispatching immediately with the same inputs creates nothing.
    h.clock.set_epoch_ms(now + 10);
    assert_eq!(h.agents.dispatch_once().await.expect("dispatch"), 0);
    assert_eq!(h.store.with_tx(|tx| tx.list_cron_runs("watcher")).expect("store").len(), 1);
    let goals = h.store.with_tx(|tx| tx.list_goals(None, 100, 0)).expect("store");
    assert_eq!(goals.len(), 1);
}

#[tokio::test]
async fn submitted_runs_per_firing_never_exceed_one() {
    let h = harness();
    let t0 = 10_000_000u64;
    h.clock.set_epoch_ms(t0);
    h.agents.register(minute_agent("watcher")).expect("register");

    h.clock.set_epoch_ms(t0 + 61_000);
    for _ in 0..5 {
        h.agents.dispatch_once().await.expect("dispatch");
    }
    let runs = h.store.with_tx(|tx| tx.list_cron_runs("watcher")).expect("store");
    let submitted = runs
        .iter()
        .filter(|r| r.scheduled_for_ms == t0 + 60_000)
        .filter(|r| r.status == CronRunStatus::Submitted)
        .count();
    assert!(submitted <= 1, "at most one submitted run per firing");
}

#[tokio::test]
async fn expired_claim_from_dead_daemon_is_reclaimable() {
    let h = harness();
    let t0 = 10_000_000u64;
    h.clock.set_epoch_ms(t0);
    h.agents.register(minute_agent("watcher")).expect("register");

    // A daemon claimed the job with a claim that expires 2 s from now,
    // then died without dispatching.
    let now = t0 + 61_000;
    h.clock.set_epoch_ms(now);
    let claimed = h
        .store
        .with_tx(|tx| tx.claim_due_cron_jobs("dead-daemon", now, 2_000))
        .expect("claim");
    assert_eq!(claimed.len(), 1);

    // 3 s later a fresh daemon instance makes progress.
    h.clock.set_epoch_ms(now + 3_000);
    assert_eq!(h.agents.dispatch_once().await.expect("dispatch"), 1);
    let goals = h.store.with_tx(|tx| tx.list_goals(None, 100, 0)).expect("store");
    assert_eq!(goals.len(), 1);
}

#[tokio::test]
async fn cron_goal_completes_and_lease_clears() {
    let h = harness();
    let t0 = 10_000_000u64;
    h.clock.set_epoch_ms(t0);
    h.agents.register(minute_agent("watcher")).expect("register");
    h.clock.set_epoch_ms(t0 + 61_000);
    h.agents.dispatch_once().await.expect("dispatch");

    h.drive(5).await;
    let goals = h.store.with_tx(|tx| tx.list_goals(None, 100, 0)).expect("store");
    assert_eq!(goals[0].status, GoalStatus::Completed);

    // The next dispatcher round settles the lease.
    h.clock.advance(std::time::Duration::from_secs(1));
    h.agents.dispatch_once().await.expect("dispatch");
    let job = h.store.with_tx(|tx| tx.get_cron_job("watcher")).expect("store").expect("job");
    assert!(job.in_flight.is_none());
    let runs = h.store.with_tx(|tx| tx.list_cron_runs("watcher")).expect("store");
    assert_eq!(runs[0].status, CronRunStatus::Success);
}
