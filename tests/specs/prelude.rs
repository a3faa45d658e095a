// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared spec harness.

#![allow(dead_code)]

use drover_core::{FakeClock, SchedulerEvent};
use drover_engine::{
    AgentScheduler, AgentSchedulerConfig, AutoApproveReview, Scheduler, SchedulerConfig,
    SchedulerDeps, StubExecutionService,
};
use drover_store::Store;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub use drover_core::{
    Budgets, EventKind, Gate, GateKind, Goal, GoalId, GoalStatus, RunStatus, WorkItem,
    WorkItemStatus,
};

pub struct SpecHarness {
    pub store: Arc<Store>,
    pub clock: FakeClock,
    pub exec: Arc<StubExecutionService>,
    pub scheduler: Arc<Scheduler<FakeClock>>,
    pub agents: AgentScheduler<FakeClock>,
    pub events: Arc<Mutex<Vec<SchedulerEvent>>>,
}

pub fn harness() -> SpecHarness {
    harness_with(SchedulerConfig::default())
}

pub fn harness_with(config: SchedulerConfig) -> SpecHarness {
    let store = Arc::new(Store::open_in_memory().expect("in-memory store"));
    let clock = FakeClock::new();
    let exec = Arc::new(StubExecutionService::success_with(100));
    let scheduler = Arc::new(Scheduler::new(
        SchedulerDeps {
            store: Arc::clone(&store),
            exec: Arc::clone(&exec) as Arc<dyn drover_engine::ExecutionService>,
            review: Arc::new(AutoApproveReview),
        },
        clock.clone(),
        config,
    ));
    let agents = AgentScheduler::new(
        Arc::clone(&store),
        Arc::clone(&scheduler),
        clock.clone(),
        AgentSchedulerConfig {
            poll_interval_ms: 1_000,
            claim_ttl_ms: 2_000,
            instance_id: "spec-daemon".into(),
        },
    );
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    scheduler.subscribe(move |event| sink.lock().push(event.clone()));
    SpecHarness { store, clock, exec, scheduler, agents, events }
}

impl SpecHarness {
    pub fn seed(&self, goal: &Goal, items: &[WorkItem]) {
        self.store
            .with_tx(|tx| -> Result<(), drover_store::StoreError> {
                tx.create_goal(goal)?;
                for item in items {
                    tx.create_work_item(item)?;
                }
                Ok(())
            })
            .expect("seed goal");
    }

    /// Tick until the scheduler goes idle or `max_ticks` elapse.
    pub async fn drive(&self, max_ticks: usize) {
        for _ in 0..max_ticks {
            self.clock.advance(Duration::from_secs(1));
            self.scheduler.tick().await.expect("tick");
            if self.scheduler.active_goals().is_empty() {
                return;
            }
        }
    }

    pub fn goal(&self, goal_id: &GoalId) -> Goal {
        self.store
            .with_tx(|tx| tx.get_goal(goal_id))
            .expect("store")
            .expect("goal exists")
    }

    pub fn items(&self, goal_id: &GoalId) -> Vec<WorkItem> {
        self.store.with_tx(|tx| tx.list_work_items(goal_id)).expect("store")
    }

    pub fn event_kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn events_snapshot(&self) -> Vec<SchedulerEvent> {
        self.events.lock().clone()
    }
}
