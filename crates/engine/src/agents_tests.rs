// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::agents::{AgentScheduler, AgentSchedulerConfig};
use crate::exec::StubExecutionService;
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerDeps};
use crate::verify::AutoApproveReview;
use drover_core::{
    cron::run_key, AgentDefinition, AgentKind, Budgets, CronRunStatus, CronSchedule, FakeClock,
    GoalStatus, Lane,
};
use drover_store::{Store, StoreError};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: Arc<Store>,
    clock: FakeClock,
    scheduler: Arc<Scheduler<FakeClock>>,
    agents: AgentScheduler<FakeClock>,
}

fn harness() -> Harness {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let clock = FakeClock::new();
    let scheduler = Arc::new(Scheduler::new(
        SchedulerDeps {
            store: Arc::clone(&store),
            exec: Arc::new(StubExecutionService::success_with(50)),
            review: Arc::new(AutoApproveReview),
        },
        clock.clone(),
        SchedulerConfig::default(),
    ));
    let agents = AgentScheduler::new(
        Arc::clone(&store),
        Arc::clone(&scheduler),
        clock.clone(),
        AgentSchedulerConfig {
            poll_interval_ms: 1_000,
            claim_ttl_ms: 2_000,
            instance_id: "daemon-under-test".into(),
        },
    );
    Harness { store, clock, scheduler, agents }
}

fn minute_agent(agent_id: &str) -> AgentDefinition {
    AgentDefinition {
        agent_id: agent_id.into(),
        kind: AgentKind::ReactGoal,
        title: format!("Agent {agent_id}"),
        description: "periodic work".into(),
        schedule: CronSchedule::Interval { every_ms: 60_000, tz: None },
        enabled: true,
        priority: 1,
        budgets: Budgets { tokens: Some(10_000), ..Budgets::default() },
        max_retries: 1,
        model_hint: Some("small".into()),
        tool_allowlist: Some(vec!["read".into(), "search".into()]),
    }
}

impl Harness {
    fn goal_count(&self) -> usize {
        self.store
            .with_tx(|tx| tx.list_goals(None, 100, 0))
            .unwrap()
            .len()
    }
}

#[tokio::test]
async fn register_creates_cron_job_with_next_fire() {
    let h = harness();
    h.clock.set_epoch_ms(1_000_000);
    let job = h.agents.register(minute_agent("watcher")).unwrap();
    assert_eq!(job.agent_id, "watcher");
    assert!(job.enabled);
    assert_eq!(job.next_run_at_ms, Some(1_060_000));
    assert!(job.in_flight.is_none());
}

#[tokio::test]
async fn coalesced_catch_up_dispatches_once_at_latest_fire() {
    let h = harness();
    let t0 = 1_000_000;
    h.clock.set_epoch_ms(t0);
    h.agents.register(minute_agent("watcher")).unwrap();

    // 181 s later: fires at +60 s, +120 s, +180 s have all passed.
    h.clock.set_epoch_ms(t0 + 181_000);
    let dispatched = h.agents.dispatch_once().await.unwrap();
    assert_eq!(dispatched, 1);
    assert_eq!(h.goal_count(), 1);

    let job = h.store.with_tx(|tx| tx.get_cron_job("watcher")).unwrap().unwrap();
    let lease = job.in_flight.clone().unwrap();
    assert!(lease.goal_id.is_some());
    assert_eq!(job.last_run_at_ms, Some(t0 + 180_000));
    // Next fire is 59 s out from "now".
    assert_eq!(job.next_run_at_ms, Some(t0 + 240_000));
    assert!(job.claim.is_none(), "claim cleared after dispatch");

    let runs = h.store.with_tx(|tx| tx.list_cron_runs("watcher")).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].coalesced_count, 2);
    assert_eq!(runs[0].scheduled_for_ms, t0 + 180_000);
    assert_eq!(runs[0].status, CronRunStatus::Submitted);

    // Immediately repeating the dispatch creates nothing new.
    h.clock.set_epoch_ms(t0 + 181_010);
    let dispatched = h.agents.dispatch_once().await.unwrap();
    assert_eq!(dispatched, 0);
    assert_eq!(h.goal_count(), 1);
    assert_eq!(h.store.with_tx(|tx| tx.list_cron_runs("watcher")).unwrap().len(), 1);
}

#[tokio::test]
async fn cron_goal_carries_runner_configuration() {
    let h = harness();
    let t0 = 1_000_000;
    h.clock.set_epoch_ms(t0);
    h.agents.register(minute_agent("watcher")).unwrap();
    h.clock.set_epoch_ms(t0 + 61_000);
    h.agents.dispatch_once().await.unwrap();

    let goals = h.store.with_tx(|tx| tx.list_goals(None, 10, 0)).unwrap();
    assert_eq!(goals.len(), 1);
    let goal = &goals[0];
    assert_eq!(goal.title, "Agent watcher");
    assert_eq!(goal.priority, 1);
    assert_eq!(goal.budgets.tokens, Some(10_000));
    assert_eq!(goal.status, GoalStatus::Active, "submitted to the scheduler");

    let items = h.store.with_tx(|tx| tx.list_work_items(&goal.id)).unwrap();
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.context_str("source"), Some("scheduler.cron"));
    assert_eq!(item.context_str("agent_id"), Some("watcher"));
    assert_eq!(item.model_hint.as_deref(), Some("small"));
    assert_eq!(item.tool_allowlist.as_deref(), Some(&["read".to_string(), "search".into()][..]));
    assert_eq!(Lane::for_item(item), Lane::Cron);
    assert_eq!(item.max_retries, 1);
}

#[tokio::test]
async fn already_linked_run_is_skipped_idempotently() {
    let h = harness();
    let t0 = 1_000_000u64;
    h.clock.set_epoch_ms(t0);
    let def = minute_agent("watcher");
    let hash = def.definition_hash();
    h.agents.register(def).unwrap();

    // Simulate a predecessor that inserted and linked the firing but died
    // before advancing the job: the run row exists and points at a goal.
    let goal = drover_core::Goal::builder().title("previous attempt").build();
    let key = run_key("watcher", &hash, t0 + 60_000);
    h.store
        .with_tx(|tx| -> Result<(), StoreError> {
            tx.create_goal(&goal)?;
            tx.insert_cron_run("watcher", &key, t0 + 60_000, 0, t0)?;
            tx.link_cron_run("watcher", &key, &goal.id)?;
            Ok(())
        })
        .unwrap();

    h.clock.set_epoch_ms(t0 + 61_000);
    let dispatched = h.agents.dispatch_once().await.unwrap();
    assert_eq!(dispatched, 0, "already-linked firing must not dispatch again");
    assert_eq!(h.goal_count(), 1, "no second goal");

    // The job's cadence still advanced and its claim is gone.
    let job = h.store.with_tx(|tx| tx.get_cron_job("watcher")).unwrap().unwrap();
    assert_eq!(job.next_run_at_ms, Some(t0 + 120_000));
    assert!(job.claim.is_none());
}

#[tokio::test]
async fn lease_settles_when_goal_completes() {
    let h = harness();
    let t0 = 1_000_000;
    h.clock.set_epoch_ms(t0);
    h.agents.register(minute_agent("watcher")).unwrap();
    h.clock.set_epoch_ms(t0 + 61_000);
    h.agents.dispatch_once().await.unwrap();

    // Drive the scheduler until the cron goal finishes.
    for _ in 0..4 {
        h.clock.advance(Duration::from_secs(1));
        h.scheduler.tick().await.unwrap();
        if h.scheduler.active_goals().is_empty() {
            break;
        }
    }

    h.clock.advance(Duration::from_secs(1));
    h.agents.dispatch_once().await.unwrap();
    let job = h.store.with_tx(|tx| tx.get_cron_job("watcher")).unwrap().unwrap();
    assert!(job.in_flight.is_none(), "lease cleared after terminal goal");
    let runs = h.store.with_tx(|tx| tx.list_cron_runs("watcher")).unwrap();
    assert_eq!(runs[0].status, CronRunStatus::Success);
}

#[tokio::test]
async fn disabled_agent_never_dispatches() {
    let h = harness();
    let t0 = 1_000_000;
    h.clock.set_epoch_ms(t0);
    let mut def = minute_agent("sleeper");
    def.enabled = false;
    h.agents.register(def).unwrap();

    h.clock.set_epoch_ms(t0 + 600_000);
    let dispatched = h.agents.dispatch_once().await.unwrap();
    assert_eq!(dispatched, 0);
    assert_eq!(h.goal_count(), 0);
}

#[tokio::test]
async fn foreign_expired_claim_is_taken_over() {
    let h = harness();
    let t0 = 1_000_000;
    h.clock.set_epoch_ms(t0);
    h.agents.register(minute_agent("watcher")).unwrap();

    // A dying daemon claimed the job with a 2 s TTL.
    h.clock.set_epoch_ms(t0 + 61_000);
    let stolen = h
        .store
        .with_tx(|tx| tx.claim_due_cron_jobs("dead-daemon", t0 + 61_000, 2_000))
        .unwrap();
    assert_eq!(stolen.len(), 1);

    // While the claim holds, this dispatcher stays hands-off.
    h.clock.set_epoch_ms(t0 + 62_000);
    assert_eq!(h.agents.dispatch_once().await.unwrap(), 0);

    // After expiry it reclaims and makes progress.
    h.clock.set_epoch_ms(t0 + 64_000);
    assert_eq!(h.agents.dispatch_once().await.unwrap(), 1);
    assert_eq!(h.goal_count(), 1);
}

#[tokio::test]
async fn claimed_job_without_definition_gets_disabled() {
    let h = harness();
    let t0 = 1_000_000u64;
    h.clock.set_epoch_ms(t0);
    // Job exists in the store, but nothing registered it in this process.
    h.store
        .with_tx(|tx| {
            tx.upsert_cron_job(
                "ghost",
                &CronSchedule::Interval { every_ms: 60_000, tz: None },
                "hash",
                t0 + 60_000,
                t0,
            )
        })
        .unwrap();

    h.clock.set_epoch_ms(t0 + 61_000);
    assert_eq!(h.agents.dispatch_once().await.unwrap(), 0);
    let job = h.store.with_tx(|tx| tx.get_cron_job("ghost")).unwrap().unwrap();
    assert!(!job.enabled);
    assert!(job.claim.is_none());
}

#[tokio::test]
async fn schedule_change_on_register_resets_cadence() {
    let h = harness();
    let t0 = 1_000_000;
    h.clock.set_epoch_ms(t0);
    h.agents.register(minute_agent("watcher")).unwrap();

    let mut faster = minute_agent("watcher");
    faster.schedule = CronSchedule::Interval { every_ms: 30_000, tz: None };
    let job = h.agents.register(faster).unwrap();
    assert_eq!(job.next_run_at_ms, Some(t0 + 30_000));
}
