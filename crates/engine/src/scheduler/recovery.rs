// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup recovery: re-admit surviving goals and repair work items
//! orphaned by a daemon death.

use super::{ActiveGoal, Scheduler};
use crate::error::SchedulerError;
use drover_core::{Clock, GoalStatus, RunStatus, WorkItemStatus};
use drover_store::RunMetrics;
use tokio_util::sync::CancellationToken;

impl<C: Clock> Scheduler<C> {
    /// Recover persisted state after a restart.
    ///
    /// - Goals in `queued` or `active` are re-admitted.
    /// - An in-progress item with no open run is reset to `ready` without
    ///   creating a run.
    /// - An in-progress item with a stale open run has that run closed
    ///   `aborted`, and the close is routed through the retry policy.
    ///
    /// Returns the number of goals re-admitted.
    pub async fn recover(&self) -> Result<usize, SchedulerError> {
        let goals = self.store.with_tx(|tx| tx.goals_to_recover())?;
        let mut admitted = 0;

        for goal in &goals {
            let now_ms = self.clock.epoch_ms();
            let items = self.store.with_tx(|tx| tx.list_work_items(&goal.id))?;

            for item in &items {
                if item.status != WorkItemStatus::InProgress {
                    continue;
                }
                let open = self.store.with_tx(|tx| tx.open_run(&item.id))?;
                match open {
                    None => {
                        // Dispatch never produced a run; eligible again.
                        self.store.with_tx(|tx| {
                            tx.update_work_item_status(&item.id, WorkItemStatus::Ready, now_ms)
                        })?;
                        self.manager.record(
                            item.id,
                            WorkItemStatus::InProgress,
                            WorkItemStatus::Ready,
                            now_ms,
                            Some("recovered without open run"),
                        );
                        tracing::info!(item = %item.id, "recovered in-progress item to ready");
                    }
                    Some(run) => {
                        // The executor died with the old daemon: close the
                        // run and treat it as a failed execution.
                        self.store.with_tx(|tx| -> Result<(), SchedulerError> {
                            tx.complete_run(
                                &run.id,
                                RunStatus::Aborted,
                                &RunMetrics {
                                    log: "daemon restarted mid-run".to_string(),
                                    ..RunMetrics::default()
                                },
                                now_ms,
                            )?;
                            self.manager.transition(
                                tx,
                                item,
                                WorkItemStatus::Failed,
                                now_ms,
                                Some("daemon restarted mid-run"),
                            )?;
                            if item.retries_remaining() {
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
                            }
                            Ok(())
                        })?;
                        tracing::info!(item = %item.id, run = %run.id, "closed stale run as aborted");
                    }
                }
            }

            match goal.status {
                GoalStatus::Queued => {
                    // Full admission path, including DAG validation.
                    if let Err(e) = self.submit_goal(&goal.id).await {
                        tracing::warn!(goal = %goal.id, error = %e, "re-admission failed");
                        continue;
                    }
                }
                GoalStatus::Active => {
                    self.inner.lock().active.insert(
                        goal.id,
                        ActiveGoal { cancel: CancellationToken::new(), budget_warned: false },
                    );
                }
                _ => continue,
            }
            admitted += 1;
        }

        if admitted > 0 {
            tracing::info!(admitted, "recovered goals");
        }
        Ok(admitted)
    }
}
