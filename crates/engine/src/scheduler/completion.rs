// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Settling a finished execution: run record, spend, verification,
//! retry, escalation.

use super::Scheduler;
use crate::error::SchedulerError;
use crate::exec::ExecOutcome;
use crate::verify;
use drover_core::{
    ActorKind, AuditEntry, Clock, EventKind, Goal, Run, RunStatus, SchedulerEvent, VerifyStatus,
    WorkItem, WorkItemStatus,
};
use drover_store::RunMetrics;

impl<C: Clock> Scheduler<C> {
    /// Handle a dispatched execution's outcome.
    ///
    /// `item.status` is the in-progress snapshot taken at dispatch.
    pub(crate) async fn settle_execution(
        &self,
        goal: &Goal,
        mut item: WorkItem,
        run: Run,
        outcome: ExecOutcome,
    ) -> Result<(), SchedulerError> {
        let now_ms = self.clock.epoch_ms();

        // The goal may have gone terminal (cancelled, budget-failed)
        // while the executor ran. Record the run, fail the item, stay
        // silent: no events follow a goal's terminal event.
        let goal_now = self
            .store
            .with_tx(|tx| tx.get_goal(&goal.id))?
            .unwrap_or_else(|| goal.clone());
        if goal_now.status.is_terminal() {
            let status = match &outcome {
                ExecOutcome::Success { .. } => RunStatus::Aborted,
                ExecOutcome::Failure { .. } => RunStatus::Failed,
            };
            let metrics = outcome.metrics().clone();
            self.store.with_tx(|tx| -> Result<(), SchedulerError> {
                tx.complete_run(&run.id, status, &metrics, now_ms)?;
                self.manager.transition(
                    tx,
                    &item,
                    WorkItemStatus::Failed,
                    now_ms,
                    Some("goal terminal during execution"),
                )?;
                Ok(())
            })?;
            return Ok(());
        }

        match outcome {
            ExecOutcome::Success { metrics } => {
                self.record_run(goal, &run, RunStatus::Success, &metrics, now_ms)?;
                self.emit(SchedulerEvent::run(
                    EventKind::RunCompleted,
                    goal.id,
                    item.id,
                    run.id,
                    now_ms,
                ));
                self.check_budget_warning(&goal.id)?;

                if item.has_verification() {
                    self.verify_item(goal, &mut item, &run).await?;
                } else {
                    self.store.with_tx(|tx| {
                        self.manager.transition(tx, &item, WorkItemStatus::Done, now_ms, None)
                    })?;
                    self.emit(SchedulerEvent::work_item(
                        EventKind::WorkItemCompleted,
                        goal.id,
                        item.id,
                        now_ms,
                    ));
                }
            }
            ExecOutcome::Failure { error, mut metrics } => {
                if metrics.log.is_empty() {
                    metrics.log = error.clone();
                }
                self.record_run(goal, &run, RunStatus::Failed, &metrics, now_ms)?;
                self.emit(
                    SchedulerEvent::run(EventKind::RunCompleted, goal.id, item.id, run.id, now_ms)
                        .with_data(serde_json::json!({ "error": error })),
                );
                self.check_budget_warning(&goal.id)?;

                if item.retries_remaining() {
                    self.store.with_tx(|tx| -> Result<(), SchedulerError> {
                        self.manager.transition(
                            tx,
                            &item,
                            WorkItemStatus::Failed,
                            now_ms,
                            Some(&error),
                        )?;
                        let mut failed = item.clone();
                        failed.status = WorkItemStatus::Failed;
                        self.manager.transition(
                            tx,
                            &failed,
                            WorkItemStatus::Queued,
                            now_ms,
                            Some("retry admitted"),
                        )?;
                        tx.set_retry_count(&item.id, item.retry_count + 1, now_ms)?;
                        Ok(())
                    })?;
                    tracing::info!(
                        item = %item.id,
                        attempt = item.retry_count + 1,
                        "execution failed, retrying"
                    );
                } else {
                    self.fail_item(goal, &item, &error, now_ms)?;
                }
            }
        }

        Ok(())
    }

    /// Run the item's quality gates and settle `verify` → `done`/`failed`.
    async fn verify_item(
        &self,
        goal: &Goal,
        item: &mut WorkItem,
        run: &Run,
    ) -> Result<(), SchedulerError> {
        let now_ms = self.clock.epoch_ms();
        self.store.with_tx(|tx| -> Result<(), SchedulerError> {
            self.manager.transition(tx, item, WorkItemStatus::Verify, now_ms, None)?;
            tx.set_verify_status(&item.id, VerifyStatus::InProgress, now_ms)?;
            Ok(())
        })?;
        item.status = WorkItemStatus::Verify;
        self.emit(SchedulerEvent::run(
            EventKind::VerificationStarted,
            goal.id,
            item.id,
            run.id,
            now_ms,
        ));

        let verdict = verify::run_gates(item, self.review.as_ref()).await;
        let now_ms = self.clock.epoch_ms();
        match verdict {
            Ok(()) => {
                self.store.with_tx(|tx| -> Result<(), SchedulerError> {
                    tx.set_verify_status(&item.id, VerifyStatus::Passed, now_ms)?;
                    self.manager.transition(tx, item, WorkItemStatus::Done, now_ms, None)?;
                    Ok(())
                })?;
                self.emit(
                    SchedulerEvent::run(
                        EventKind::VerificationCompleted,
                        goal.id,
                        item.id,
                        run.id,
                        now_ms,
                    )
                    .with_data(serde_json::json!({ "passed": true })),
                );
                self.emit(SchedulerEvent::work_item(
                    EventKind::WorkItemCompleted,
                    goal.id,
                    item.id,
                    now_ms,
                ));
            }
            Err(failure) => {
                self.store.with_tx(|tx| -> Result<(), SchedulerError> {
                    tx.set_verify_status(&item.id, VerifyStatus::Failed, now_ms)?;
                    self.manager.transition(
                        tx,
                        item,
                        WorkItemStatus::Failed,
                        now_ms,
                        Some(&failure.reason),
                    )?;
                    Ok(())
                })?;
                self.emit(
                    SchedulerEvent::run(
                        EventKind::VerificationCompleted,
                        goal.id,
                        item.id,
                        run.id,
                        now_ms,
                    )
                    .with_data(serde_json::json!({
                        "passed": false,
                        "gate": failure.gate,
                        "reason": failure.reason,
                    })),
                );
                self.emit_item_failure(goal, item, &failure.reason, now_ms);
            }
        }
        Ok(())
    }

    /// Close a run and bump the goal's spend in one transaction.
    fn record_run(
        &self,
        goal: &Goal,
        run: &Run,
        status: RunStatus,
        metrics: &RunMetrics,
        now_ms: u64,
    ) -> Result<(), SchedulerError> {
        let wall_minutes = metrics.wall_ms as f64 / 60_000.0;
        self.store.with_tx(|tx| -> Result<(), SchedulerError> {
            tx.complete_run(&run.id, status, metrics, now_ms)?;
            tx.add_goal_spend(&goal.id, metrics.tokens_used, wall_minutes, metrics.cost, now_ms)?;
            Ok(())
        })?;
        Ok(())
    }

    /// Terminal item failure: record, emit, escalate.
    fn fail_item(
        &self,
        goal: &Goal,
        item: &WorkItem,
        reason: &str,
        now_ms: u64,
    ) -> Result<(), SchedulerError> {
        self.store.with_tx(|tx| {
            self.manager.transition(tx, item, WorkItemStatus::Failed, now_ms, Some(reason))
        })?;
        self.emit_item_failure(goal, item, reason, now_ms);
        Ok(())
    }

    fn emit_item_failure(&self, goal: &Goal, item: &WorkItem, reason: &str, now_ms: u64) {
        self.emit(
            SchedulerEvent::work_item(EventKind::WorkItemFailed, goal.id, item.id, now_ms)
                .with_data(serde_json::json!({ "reason": reason })),
        );
        self.emit(
            SchedulerEvent::work_item(EventKind::EscalationCreated, goal.id, item.id, now_ms)
                .with_data(serde_json::json!({ "reason": reason })),
        );
        self.audit(
            AuditEntry::new(
                ActorKind::Daemon,
                "scheduler",
                "work_item.escalated",
                "work_item",
                item.id.as_str(),
                now_ms,
            )
            .goal_id(goal.id.as_str())
            .work_item_id(item.id.as_str())
            .meta(serde_json::json!({ "reason": reason })),
        );
    }

    /// One-shot warning when spend crosses the configured fraction.
    fn check_budget_warning(&self, goal_id: &drover_core::GoalId) -> Result<(), SchedulerError> {
        let Some(goal) = self.store.with_tx(|tx| tx.get_goal(goal_id))? else {
            return Ok(());
        };
        let Some(utilization) = goal.spent.utilization(&goal.budgets) else {
            return Ok(());
        };
        if utilization < self.config.budget_warn_fraction || utilization >= 1.0 {
            return Ok(());
        }
        let should_emit = {
            let mut inner = self.inner.lock();
            match inner.active.get_mut(goal_id) {
                Some(active) if !active.budget_warned => {
                    active.budget_warned = true;
                    true
                }
                _ => false,
            }
        };
        if should_emit {
            self.emit(
                SchedulerEvent::goal(EventKind::BudgetWarning, *goal_id, self.clock.epoch_ms())
                    .with_data(serde_json::json!({ "utilization": utilization })),
            );
        }
        Ok(())
    }
}
