// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The tick: select ready work, dispatch within lane caps, settle
//! completions, progress goals.

use super::{Scheduler, TickReport};
use crate::error::SchedulerError;
use crate::exec::{ExecOutcome, ExecRequest};
use crate::manager::WorkItemManager;
use drover_core::{
    Clock, EventKind, Goal, GoalId, GoalStatus, Lane, Run, SchedulerEvent, WorkItem,
    WorkItemStatus,
};
use drover_store::RunMetrics;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One dispatched execution awaiting settlement.
struct InFlight {
    goal: Goal,
    item: WorkItem,
    run: Run,
    lane: Lane,
    handle: JoinHandle<ExecOutcome>,
}

impl<C: Clock> Scheduler<C> {
    /// Run one tick. A tick that fires while another is still running is
    /// dropped, not queued.
    pub async fn tick(&self) -> Result<TickReport, SchedulerError> {
        let Ok(_gate) = self.tick_gate.try_lock() else {
            tracing::debug!("tick overlapped, dropping");
            return Ok(TickReport { skipped: true, ..TickReport::default() });
        };

        let mut report = TickReport::default();
        let goal_ids = self.active_goals();
        let mut goals = Vec::with_capacity(goal_ids.len());
        for goal_id in &goal_ids {
            if let Some(goal) = self.store.with_tx(|tx| tx.get_goal(goal_id))? {
                goals.push(goal);
            } else {
                // Pruned underneath us; forget it.
                self.inner.lock().active.remove(goal_id);
            }
        }
        goals.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });

        for goal in goals {
            match self.drive_goal(&goal).await {
                Ok(dispatched) => report.dispatched += dispatched,
                Err(SchedulerError::Store(e)) => {
                    // Persistence fault: count it and abort the tick; the
                    // next tick retries idempotently.
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    return Err(SchedulerError::Store(e));
                }
                Err(e) => {
                    tracing::error!(goal = %goal.id, error = %e, "goal progression failed");
                }
            }
        }

        // Settle goal statuses after this round of completions.
        for goal_id in self.active_goals() {
            match self.settle_goal(&goal_id)? {
                GoalSettled::Completed => report.goals_completed += 1,
                GoalSettled::Failed => report.goals_failed += 1,
                GoalSettled::Open => {}
            }
        }

        Ok(report)
    }

    /// Progress one goal: budget check, ready selection, dispatch, and
    /// settlement of every execution dispatched this tick. Returns the
    /// number of items dispatched.
    async fn drive_goal(&self, goal: &Goal) -> Result<usize, SchedulerError> {
        let now_ms = self.clock.epoch_ms();

        if goal.status == GoalStatus::Cancelled {
            self.inner.lock().active.remove(&goal.id);
            return Ok(0);
        }

        if goal.spent.exhausted(&goal.budgets) {
            self.store
                .with_tx(|tx| tx.update_goal_status(&goal.id, GoalStatus::Failed, now_ms))?;
            if let Some(active) = self.inner.lock().active.remove(&goal.id) {
                active.cancel.cancel();
            }
            self.audit_goal_id(&goal.id, "goal.budget_exceeded");
            self.emit(SchedulerEvent::goal(EventKind::BudgetExceeded, goal.id, now_ms));
            self.emit(
                SchedulerEvent::goal(EventKind::GoalFailed, goal.id, now_ms)
                    .with_data(serde_json::json!({ "reason": "budget exhausted" })),
            );
            return Ok(0);
        }

        let ready = self
            .store
            .with_tx(|tx| self.manager.ready_items(tx, &goal.id, &self.clock))?;

        let mut in_flight: Vec<InFlight> = Vec::new();
        for item in ready {
            let lane = Lane::for_item(&item);
            let available = {
                let mut inner = self.inner.lock();
                let count = inner.lanes.entry(lane).or_insert(0);
                if *count < self.config.lane_caps.cap(lane) {
                    *count += 1;
                    true
                } else {
                    false
                }
            };
            if !available {
                // Lane full: the item stays ready for a later tick.
                continue;
            }

            match self.dispatch_item(goal, &item, lane) {
                Ok(dispatched) => in_flight.push(dispatched),
                Err(e) => {
                    // Leave the item in ready; the next tick retries.
                    self.release_lane(lane);
                    tracing::warn!(item = %item.id, error = %e, "dispatch failed");
                }
            }
        }

        let dispatched = in_flight.len();

        // Executions run concurrently; settle each as its task finishes.
        for flight in in_flight {
            let InFlight { goal, item, run, lane, handle } = flight;
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => ExecOutcome::Failure {
                    error: format!("execution task died: {join_err}"),
                    metrics: RunMetrics::default(),
                },
            };
            let settled = self.settle_execution(&goal, item, run, outcome).await;
            self.release_lane(lane);
            settled?;
        }

        Ok(dispatched)
    }

    /// Transition to in-progress, open the run, and launch the executor.
    fn dispatch_item(
        &self,
        goal: &Goal,
        item: &WorkItem,
        lane: Lane,
    ) -> Result<InFlight, SchedulerError> {
        let now_ms = self.clock.epoch_ms();
        let run = self.store.with_tx(|tx| -> Result<Run, SchedulerError> {
            self.manager.transition(tx, item, WorkItemStatus::InProgress, now_ms, None)?;
            Ok(tx.create_run(&item.id, &goal.id, &item.kind, now_ms)?)
        })?;

        self.emit(SchedulerEvent::work_item(
            EventKind::WorkItemStarted,
            goal.id,
            item.id,
            now_ms,
        ));
        self.emit(SchedulerEvent::run(EventKind::RunStarted, goal.id, item.id, run.id, now_ms));

        let cancel = self
            .inner
            .lock()
            .active
            .get(&goal.id)
            .map(|a| a.cancel.child_token())
            .unwrap_or_default();
        let req = ExecRequest {
            goal: goal.clone(),
            item: item.clone(),
            run_id: run.id,
            cancel,
        };
        let exec = Arc::clone(&self.exec);
        let handle = tokio::spawn(async move { exec.execute(req).await });

        let mut item = item.clone();
        item.status = WorkItemStatus::InProgress;
        Ok(InFlight { goal: goal.clone(), item, run, lane, handle })
    }

    pub(crate) fn release_lane(&self, lane: Lane) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.lanes.get_mut(&lane) {
            *count = count.saturating_sub(1);
        }
    }

    /// Mark the goal completed or failed when its items warrant it.
    fn settle_goal(&self, goal_id: &GoalId) -> Result<GoalSettled, SchedulerError> {
        let now_ms = self.clock.epoch_ms();
        let items = self.store.with_tx(|tx| tx.list_work_items(goal_id))?;
        if items.is_empty() {
            return Ok(GoalSettled::Open);
        }

        if WorkItemManager::all_complete(&items) {
            self.store
                .with_tx(|tx| tx.update_goal_status(goal_id, GoalStatus::Completed, now_ms))?;
            self.inner.lock().active.remove(goal_id);
            self.audit_goal_id(goal_id, "goal.completed");
            self.emit(SchedulerEvent::goal(EventKind::GoalCompleted, *goal_id, now_ms));
            return Ok(GoalSettled::Completed);
        }

        // A failed item has no retry path left; the goal cannot complete.
        if items.iter().any(|i| i.status == WorkItemStatus::Failed) {
            self.store
                .with_tx(|tx| tx.update_goal_status(goal_id, GoalStatus::Failed, now_ms))?;
            if let Some(active) = self.inner.lock().active.remove(goal_id) {
                active.cancel.cancel();
            }
            self.audit_goal_id(goal_id, "goal.failed");
            self.emit(
                SchedulerEvent::goal(EventKind::GoalFailed, *goal_id, now_ms)
                    .with_data(serde_json::json!({ "reason": "work item failed" })),
            );
            return Ok(GoalSettled::Failed);
        }

        Ok(GoalSettled::Open)
    }
}

enum GoalSettled {
    Completed,
    Failed,
    Open,
}
