// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduler: drives active goals forward within concurrency and
//! budget limits, producing run records and events.

mod completion;
mod recovery;
mod tick;

use crate::error::SchedulerError;
use crate::exec::ExecutionService;
use crate::manager::WorkItemManager;
use crate::verify::ReviewService;
use drover_core::{
    ActorKind, AuditEntry, Clock, EventKind, Goal, GoalId, GoalStatus, Lane, LaneCaps,
    SchedulerEvent,
};
use drover_store::Store;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tuning knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    pub lane_caps: LaneCaps,
    /// How long a cancelled goal's executors get to unwind before their
    /// runs are closed administratively.
    pub cancel_grace_ms: u64,
    /// Spend fraction that triggers the one-shot budget warning.
    pub budget_warn_fraction: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            lane_caps: LaneCaps::default(),
            cancel_grace_ms: 30_000,
            budget_warn_fraction: 0.8,
        }
    }
}

/// Shared collaborators handed to the scheduler.
pub struct SchedulerDeps {
    pub store: Arc<Store>,
    pub exec: Arc<dyn ExecutionService>,
    pub review: Arc<dyn ReviewService>,
}

type Subscriber = Box<dyn Fn(&SchedulerEvent) + Send + Sync>;

pub(crate) struct ActiveGoal {
    pub cancel: CancellationToken,
    pub budget_warned: bool,
}

pub(crate) struct Inner {
    pub active: HashMap<GoalId, ActiveGoal>,
    pub lanes: HashMap<Lane, usize>,
}

/// Outcome of one tick, mostly for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// A tick was dropped because another was still running.
    pub skipped: bool,
    pub dispatched: usize,
    pub goals_completed: usize,
    pub goals_failed: usize,
}

pub struct Scheduler<C: Clock> {
    pub(crate) store: Arc<Store>,
    pub(crate) exec: Arc<dyn ExecutionService>,
    pub(crate) review: Arc<dyn ReviewService>,
    pub(crate) clock: C,
    pub(crate) config: SchedulerConfig,
    pub(crate) manager: WorkItemManager,
    pub(crate) inner: Mutex<Inner>,
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
    next_subscriber_id: AtomicU64,
    /// Ticks aborted by persistence faults.
    pub(crate) error_count: AtomicU64,
    /// Serializes ticks; an overlapping firing is dropped, not queued.
    pub(crate) tick_gate: tokio::sync::Mutex<()>,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(deps: SchedulerDeps, clock: C, config: SchedulerConfig) -> Self {
        Self {
            store: deps.store,
            exec: deps.exec,
            review: deps.review,
            clock,
            config,
            manager: WorkItemManager::new(),
            inner: Mutex::new(Inner { active: HashMap::new(), lanes: HashMap::new() }),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
            error_count: AtomicU64::new(0),
            tick_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn manager(&self) -> &WorkItemManager {
        &self.manager
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Register an event subscriber. Returns a handle for unsubscribe.
    pub fn subscribe(&self, f: impl Fn(&SchedulerEvent) + Send + Sync + 'static) -> u64 {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Box::new(f)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|(sid, _)| *sid != id);
    }

    pub(crate) fn emit(&self, event: SchedulerEvent) {
        tracing::debug!(kind = %event.kind, goal = %event.goal_id, "scheduler event");
        let subscribers = self.subscribers.lock();
        for (_, subscriber) in subscribers.iter() {
            subscriber(&event);
        }
    }

    pub(crate) fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.store.append_audit(&entry) {
            tracing::warn!(error = %e, action = %entry.action, "audit append failed");
        }
    }

    /// Audit a goal status change by id only.
    pub(crate) fn audit_goal_id(&self, goal_id: &GoalId, action: &str) {
        let entry = AuditEntry::new(
            ActorKind::Daemon,
            "scheduler",
            action,
            "goal",
            goal_id.as_str(),
            self.clock.epoch_ms(),
        )
        .goal_id(goal_id.as_str());
        self.audit(entry);
    }

    fn goal_audit(&self, goal: &Goal, action: &str, reason: Option<&str>) -> AuditEntry {
        let mut entry = AuditEntry::new(
            ActorKind::Daemon,
            "scheduler",
            action,
            "goal",
            goal.id.as_str(),
            self.clock.epoch_ms(),
        )
        .goal_id(goal.id.as_str());
        if let Some(reason) = reason {
            entry = entry.meta(serde_json::json!({ "reason": reason }));
        }
        entry
    }

    /// Admit a goal: validate its dependency graph, mark it active, and
    /// start driving it on subsequent ticks.
    ///
    /// Safe to call again for an already-active goal.
    pub async fn submit_goal(&self, goal_id: &GoalId) -> Result<(), SchedulerError> {
        let now_ms = self.clock.epoch_ms();
        let goal: Goal = self
            .store
            .with_tx(|tx| tx.get_goal(goal_id))?
            .ok_or_else(|| SchedulerError::GoalNotFound(goal_id.as_str().to_string()))?;

        match goal.status {
            GoalStatus::Cancelled => {
                return Err(SchedulerError::GoalAlreadyCancelled(goal_id.as_str().to_string()))
            }
            GoalStatus::Completed | GoalStatus::Failed => return Ok(()),
            GoalStatus::Queued | GoalStatus::Active => {}
        }

        if self.inner.lock().active.contains_key(goal_id) {
            return Ok(());
        }

        let items = self.store.with_tx(|tx| tx.list_work_items(goal_id))?;
        if let Err(e) = WorkItemManager::validate_dag(&items) {
            let reason = e.to_string();
            self.store.with_tx(|tx| {
                tx.update_goal_status(goal_id, GoalStatus::Failed, now_ms)
            })?;
            self.audit(self.goal_audit(&goal, "goal.admission_failed", Some(&reason)));
            self.emit(
                SchedulerEvent::goal(EventKind::GoalFailed, *goal_id, now_ms)
                    .with_data(serde_json::json!({ "reason": reason })),
            );
            return Err(e);
        }

        let was_queued = goal.status == GoalStatus::Queued;
        self.store
            .with_tx(|tx| tx.update_goal_status(goal_id, GoalStatus::Active, now_ms))?;
        self.inner.lock().active.insert(
            *goal_id,
            ActiveGoal { cancel: CancellationToken::new(), budget_warned: false },
        );

        if was_queued {
            self.audit(self.goal_audit(&goal, "goal.admitted", None));
            self.emit(SchedulerEvent::goal(EventKind::GoalStarted, *goal_id, now_ms));
        }
        tracing::info!(goal = %goal_id, "goal admitted");
        Ok(())
    }

    /// Cancel a goal: terminal status, cancellation signal to in-flight
    /// executors, administrative close of whatever outlives the grace
    /// period.
    pub async fn cancel_goal(
        &self,
        goal_id: &GoalId,
        reason: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let now_ms = self.clock.epoch_ms();
        let goal: Goal = self
            .store
            .with_tx(|tx| tx.get_goal(goal_id))?
            .ok_or_else(|| SchedulerError::GoalNotFound(goal_id.as_str().to_string()))?;

        match goal.status {
            GoalStatus::Cancelled => {
                return Err(SchedulerError::GoalAlreadyCancelled(goal_id.as_str().to_string()))
            }
            GoalStatus::Completed | GoalStatus::Failed => {
                return Err(SchedulerError::InvalidGoalState(format!(
                    "goal {goal_id} is {}",
                    goal.status
                )))
            }
            GoalStatus::Queued | GoalStatus::Active => {}
        }

        self.store
            .with_tx(|tx| tx.update_goal_status(goal_id, GoalStatus::Cancelled, now_ms))?;

        let removed = self.inner.lock().active.remove(goal_id);
        if let Some(active) = &removed {
            active.cancel.cancel();
        }

        self.audit(self.goal_audit(&goal, "goal.cancelled", reason));
        self.emit(SchedulerEvent::goal(EventKind::GoalCancelled, *goal_id, now_ms));

        // Whatever the executors have not reported by the end of the grace
        // period gets closed administratively.
        let store = Arc::clone(&self.store);
        let goal_id = *goal_id;
        let grace = Duration::from_millis(self.config.cancel_grace_ms);
        let clock = self.clock.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(e) = abort_open_runs(&store, &goal_id, clock.epoch_ms()) {
                tracing::warn!(goal = %goal_id, error = %e, "grace-period abort failed");
            }
        });

        Ok(())
    }

    /// Ids of currently active goals (snapshot).
    pub fn active_goals(&self) -> Vec<GoalId> {
        self.inner.lock().active.keys().copied().collect()
    }

    /// Current active count for a lane (snapshot).
    pub fn lane_active(&self, lane: Lane) -> usize {
        self.inner.lock().lanes.get(&lane).copied().unwrap_or(0)
    }

    /// Run the tick loop until `shutdown` fires. Overlapping timer
    /// firings are dropped.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("scheduler loop stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "tick aborted");
                    }
                }
            }
        }
    }
}

/// Close any still-open runs of a goal as `aborted` and fail their items.
fn abort_open_runs(
    store: &Store,
    goal_id: &GoalId,
    now_ms: u64,
) -> Result<(), SchedulerError> {
    store.with_tx(|tx| {
        let items = tx.list_work_items(goal_id)?;
        for item in &items {
            if let Some(run) = tx.open_run(&item.id)? {
                tx.complete_run(
                    &run.id,
                    drover_core::RunStatus::Aborted,
                    &drover_store::RunMetrics::default(),
                    now_ms,
                )?;
                if item.status == drover_core::WorkItemStatus::InProgress {
                    tx.update_work_item_status(
                        &item.id,
                        drover_core::WorkItemStatus::Failed,
                        now_ms,
                    )?;
                }
                tracing::info!(item = %item.id, run = %run.id, "run aborted after grace period");
            }
        }
        Ok(())
    })
}

#[cfg(test)]
#[path = "../scheduler_tests.rs"]
mod tests;
