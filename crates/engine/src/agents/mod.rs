// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent (cron) scheduler: dispatches registered agents by creating
//! goals for them at the right times, at most once per logical firing.

pub mod schedule;

use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use drover_core::{
    cron::run_key, AgentDefinition, AgentKind, Clock, CronJob, CronRunStatus, Goal, GoalId,
    GoalStatus, WorkItem,
};
use drover_store::{ScheduleOutcome, Store};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct AgentSchedulerConfig {
    pub poll_interval_ms: u64,
    /// Claim lifetime; default is two poll intervals so a dead dispatcher
    /// frees its jobs quickly.
    pub claim_ttl_ms: u64,
    /// Identifies this daemon in claim rows.
    pub instance_id: String,
}

impl Default for AgentSchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            claim_ttl_ms: 10_000,
            instance_id: format!("droverd-{}", std::process::id()),
        }
    }
}

/// Periodic dispatcher for registered agents.
pub struct AgentScheduler<C: Clock> {
    store: Arc<Store>,
    scheduler: Arc<Scheduler<C>>,
    clock: C,
    config: AgentSchedulerConfig,
    definitions: Mutex<HashMap<String, AgentDefinition>>,
}

impl<C: Clock> AgentScheduler<C> {
    pub fn new(
        store: Arc<Store>,
        scheduler: Arc<Scheduler<C>>,
        clock: C,
        config: AgentSchedulerConfig,
    ) -> Self {
        Self { store, scheduler, clock, config, definitions: Mutex::new(HashMap::new()) }
    }

    /// Register (or refresh) an agent definition and its cron job row.
    pub fn register(&self, def: AgentDefinition) -> Result<CronJob, SchedulerError> {
        let now_ms = self.clock.epoch_ms();
        let fresh_next = schedule::first_next_run(&def.schedule, now_ms)?;
        let hash = def.definition_hash();
        let job = self.store.with_tx(|tx| -> Result<CronJob, SchedulerError> {
            let mut job =
                tx.upsert_cron_job(&def.agent_id, &def.schedule, &hash, fresh_next, now_ms)?;
            if job.enabled != def.enabled {
                tx.set_cron_enabled(&def.agent_id, def.enabled, now_ms)?;
                job.enabled = def.enabled;
            }
            Ok(job)
        })?;
        tracing::info!(agent = %def.agent_id, kind = %def.kind, "agent registered");
        self.definitions.lock().insert(def.agent_id.clone(), def);
        Ok(job)
    }

    /// Run the dispatch loop until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("agent scheduler stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.dispatch_once().await {
                        tracing::error!(error = %e, "agent dispatch failed");
                    }
                }
            }
        }
    }

    /// One dispatch round: settle finished leases, claim due jobs, fire
    /// them. Returns the number of goals created.
    pub async fn dispatch_once(&self) -> Result<usize, SchedulerError> {
        let now_ms = self.clock.epoch_ms();
        self.reconcile_in_flight(now_ms)?;

        let claimed = self.store.with_tx(|tx| {
            tx.claim_due_cron_jobs(&self.config.instance_id, now_ms, self.config.claim_ttl_ms)
        })?;

        let mut dispatched = 0;
        for job in claimed {
            match self.dispatch_job(&job, now_ms).await {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(agent = %job.agent_id, error = %e, "cron dispatch failed");
                    self.store
                        .with_tx(|tx| tx.release_cron_claim(&job.agent_id, now_ms))?;
                }
            }
        }
        Ok(dispatched)
    }

    /// Clear leases whose goal has reached a terminal status, recording
    /// the firing's outcome on its cron job run.
    fn reconcile_in_flight(&self, now_ms: u64) -> Result<(), SchedulerError> {
        let jobs = self.store.with_tx(|tx| tx.list_cron_jobs())?;
        for job in jobs {
            let Some(in_flight) = &job.in_flight else { continue };
            let Some(goal_id) = in_flight.goal_id else { continue };
            let Some(goal) = self.store.with_tx(|tx| tx.get_goal(&goal_id))? else {
                self.store.with_tx(|tx| tx.clear_cron_in_flight(&job.agent_id, now_ms))?;
                continue;
            };
            if !goal.status.is_terminal() {
                continue;
            }
            let status = match goal.status {
                GoalStatus::Completed => CronRunStatus::Success,
                _ => CronRunStatus::Failed,
            };
            let run_key = in_flight.run_key.clone();
            self.store.with_tx(|tx| -> Result<(), SchedulerError> {
                tx.set_cron_run_status(&job.agent_id, &run_key, status)?;
                tx.clear_cron_in_flight(&job.agent_id, now_ms)?;
                Ok(())
            })?;
            tracing::debug!(agent = %job.agent_id, goal = %goal_id, status = %status, "lease settled");
        }
        Ok(())
    }

    /// Fire one claimed job. Returns true when a new goal was created.
    async fn dispatch_job(&self, job: &CronJob, now_ms: u64) -> Result<bool, SchedulerError> {
        let def = self.definitions.lock().get(&job.agent_id).cloned();
        let Some(def) = def else {
            // Definition disappeared from this daemon's registry; stop
            // the job rather than spin on an unclaimable firing.
            tracing::warn!(agent = %job.agent_id, "no definition for claimed cron job, disabling");
            self.store.with_tx(|tx| -> Result<(), SchedulerError> {
                tx.set_cron_enabled(&job.agent_id, false, now_ms)?;
                tx.release_cron_claim(&job.agent_id, now_ms)?;
                Ok(())
            })?;
            return Ok(false);
        };

        let outcome =
            schedule::outcome_at(&job.schedule, job.last_run_at_ms, job.next_run_at_ms, now_ms)?;
        let Some(outcome) = outcome else {
            // Stale next_run_at: re-aim and release.
            let fresh_next = schedule::first_next_run(&job.schedule, now_ms)?;
            self.store.with_tx(|tx| -> Result<(), SchedulerError> {
                tx.set_cron_next_run(&job.agent_id, fresh_next, now_ms)?;
                tx.release_cron_claim(&job.agent_id, now_ms)?;
                Ok(())
            })?;
            return Ok(false);
        };

        let key = run_key(&job.agent_id, &job.definition_hash, outcome.scheduled_for_ms);
        let (row, inserted) = self.store.with_tx(|tx| {
            tx.insert_cron_run(
                &job.agent_id,
                &key,
                outcome.scheduled_for_ms,
                outcome.coalesced_count,
                now_ms,
            )
        })?;

        if !inserted {
            if let Some(goal_id) = row.goal_id {
                // This firing was fully dispatched by an earlier attempt.
                tracing::info!(
                    agent = %job.agent_id,
                    goal = %goal_id,
                    "run_already_linked_to_goal, skipping"
                );
                self.store.with_tx(|tx| {
                    tx.finish_cron_dispatch(&job.agent_id, &key, &goal_id, &outcome, now_ms)
                })?;
                if let Err(e) = self.scheduler.submit_goal(&goal_id).await {
                    tracing::debug!(goal = %goal_id, error = %e, "re-submit after link skipped");
                }
                return Ok(false);
            }
            // Pending but unlinked: a predecessor died between insert and
            // goal creation. Fall through and link it now.
            tracing::info!(agent = %job.agent_id, "linking orphaned pending cron run");
        }

        let goal_id = self.store.with_tx(|tx| -> Result<GoalId, SchedulerError> {
            let goal = build_goal(&def, now_ms);
            let item = initial_work_item(&def, goal.id, &key, &outcome, now_ms);
            tx.create_goal(&goal)?;
            tx.create_work_item(&item)?;
            tx.link_cron_run(&job.agent_id, &key, &goal.id)?;
            tx.finish_cron_dispatch(&job.agent_id, &key, &goal.id, &outcome, now_ms)?;
            Ok(goal.id)
        })?;

        self.scheduler.submit_goal(&goal_id).await?;
        tracing::info!(
            agent = %job.agent_id,
            goal = %goal_id,
            scheduled_for = outcome.scheduled_for_ms,
            coalesced = outcome.coalesced_count,
            "cron goal dispatched"
        );
        Ok(true)
    }
}

/// Goal shell for one agent firing.
fn build_goal(def: &AgentDefinition, now_ms: u64) -> Goal {
    let mut goal = Goal::new(def.title.clone(), now_ms);
    goal.description = def.description.clone();
    goal.priority = def.priority;
    goal.budgets = def.budgets;
    goal
}

/// The initial work item, shaped by the agent kind.
fn initial_work_item(
    def: &AgentDefinition,
    goal_id: GoalId,
    run_key: &str,
    outcome: &ScheduleOutcome,
    now_ms: u64,
) -> WorkItem {
    let (kind, title) = match def.kind {
        AgentKind::ReactGoal => ("react", format!("Run agent {}", def.agent_id)),
        AgentKind::MarketListener => ("listen", format!("Scan feed for {}", def.agent_id)),
    };
    let mut item = WorkItem::new(goal_id, title, now_ms);
    item.kind = kind.to_string();
    item.description = def.description.clone();
    item.max_retries = def.max_retries;
    item.model_hint = def.model_hint.clone();
    item.tool_allowlist = def.tool_allowlist.clone();
    item.context = serde_json::json!({
        "source": "scheduler.cron",
        "agent_id": def.agent_id,
        "agent_kind": def.kind.to_string(),
        "run_key": run_key,
        "scheduled_for_ms": outcome.scheduled_for_ms,
        "coalesced_count": outcome.coalesced_count,
    });
    item
}

#[cfg(test)]
#[path = "../agents_tests.rs"]
mod tests;
