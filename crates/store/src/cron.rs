// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron job persistence: upsert, claim, idempotent run insertion, leases.

use crate::error::StoreError;
use crate::Tx;
use drover_core::{
    Claim, CronJob, CronJobRun, CronRunStatus, CronSchedule, GoalId, InFlight,
};
use rusqlite::{params, Row};

/// Result of evaluating a schedule at dispatch time.
///
/// Computed by the agent scheduler, persisted here: `scheduled_for_ms` is
/// the latest fire ≤ now, `coalesced_count` the number of additional
/// skipped fires, `next_run_at_ms` the first fire after `scheduled_for_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub scheduled_for_ms: u64,
    pub coalesced_count: u32,
    pub next_run_at_ms: u64,
}

fn row_to_job(row: &Row<'_>) -> Result<CronJob, StoreError> {
    let schedule: String = row.get("schedule")?;
    let in_flight_run_key: Option<String> = row.get("in_flight_run_key")?;
    let claimed_by: Option<String> = row.get("claimed_by")?;
    Ok(CronJob {
        agent_id: row.get("agent_id")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        schedule: serde_json::from_str(&schedule)?,
        definition_hash: row.get("definition_hash")?,
        last_run_at_ms: row.get::<_, Option<i64>>("last_run_at_ms")?.map(|v| v as u64),
        next_run_at_ms: row.get::<_, Option<i64>>("next_run_at_ms")?.map(|v| v as u64),
        in_flight: match in_flight_run_key {
            Some(run_key) => Some(InFlight {
                run_key,
                goal_id: row
                    .get::<_, Option<String>>("in_flight_goal_id")?
                    .map(GoalId::from_string),
                started_at_ms: row
                    .get::<_, Option<i64>>("in_flight_started_at_ms")?
                    .unwrap_or(0) as u64,
            }),
            None => None,
        },
        claim: match claimed_by {
            Some(claimed_by) => Some(Claim {
                claimed_by,
                claimed_at_ms: row.get::<_, Option<i64>>("claimed_at_ms")?.unwrap_or(0) as u64,
                expires_at_ms: row.get::<_, Option<i64>>("claim_expires_at_ms")?.unwrap_or(0)
                    as u64,
            }),
            None => None,
        },
        created_at_ms: row.get::<_, i64>("created_at_ms")? as u64,
        updated_at_ms: row.get::<_, i64>("updated_at_ms")? as u64,
    })
}

fn row_to_cron_run(row: &Row<'_>) -> Result<CronJobRun, StoreError> {
    let status: String = row.get("status")?;
    Ok(CronJobRun {
        agent_id: row.get("agent_id")?,
        run_key: row.get("run_key")?,
        goal_id: row.get::<_, Option<String>>("goal_id")?.map(GoalId::from_string),
        scheduled_for_ms: row.get::<_, i64>("scheduled_for_ms")? as u64,
        coalesced_count: row.get::<_, i64>("coalesced_count")? as u32,
        status: serde_json::from_value(serde_json::Value::String(status.clone()))
            .map_err(|_| StoreError::Migration(format!("unknown cron run status {status:?}")))?,
        created_at_ms: row.get::<_, i64>("created_at_ms")? as u64,
    })
}

impl Tx<'_> {
    /// Register or refresh a cron job by agent id.
    ///
    /// Replaces the schedule and definition hash; `next_run_at_ms` is reset
    /// to `fresh_next_run_at_ms` only when the job is new or its schedule
    /// changed, so an unrelated definition edit does not shift the cadence.
    pub fn upsert_cron_job(
        &self,
        agent_id: &str,
        schedule: &CronSchedule,
        definition_hash: &str,
        fresh_next_run_at_ms: u64,
        now_ms: u64,
    ) -> Result<CronJob, StoreError> {
        let schedule_json = serde_json::to_string(schedule)?;
        self.conn.execute(
            "INSERT INTO cron_jobs (agent_id, enabled, schedule, definition_hash,
                next_run_at_ms, created_at_ms, updated_at_ms)
             VALUES (?1, 1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(agent_id) DO UPDATE SET
                definition_hash = excluded.definition_hash,
                next_run_at_ms = CASE
                    WHEN cron_jobs.schedule != excluded.schedule THEN excluded.next_run_at_ms
                    ELSE cron_jobs.next_run_at_ms
                END,
                schedule = excluded.schedule,
                updated_at_ms = excluded.updated_at_ms",
            params![agent_id, schedule_json, definition_hash, fresh_next_run_at_ms as i64, now_ms as i64],
        )?;
        self.get_cron_job(agent_id)?
            .ok_or_else(|| StoreError::not_found("cron job", agent_id))
    }

    pub fn get_cron_job(&self, agent_id: &str) -> Result<Option<CronJob>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT * FROM cron_jobs WHERE agent_id = ?1")?;
        let mut rows = stmt.query(params![agent_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_job(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_cron_jobs(&self) -> Result<Vec<CronJob>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT * FROM cron_jobs ORDER BY agent_id ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_job(row)?);
        }
        Ok(out)
    }

    pub fn set_cron_enabled(&self, agent_id: &str, enabled: bool, now_ms: u64) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE cron_jobs SET enabled = ?2, updated_at_ms = ?3 WHERE agent_id = ?1",
            params![agent_id, enabled as i64, now_ms as i64],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("cron job", agent_id));
        }
        Ok(())
    }

    /// Claim every due cron job in one atomic statement.
    ///
    /// Due means enabled, `next_run_at_ms ≤ now`, and either unclaimed or
    /// holding an expired claim. Only rows actually claimed are returned,
    /// so two competing dispatchers can never both claim one job.
    pub fn claim_due_cron_jobs(
        &self,
        claimed_by: &str,
        now_ms: u64,
        claim_ttl_ms: u64,
    ) -> Result<Vec<CronJob>, StoreError> {
        let mut stmt = self.conn.prepare(
            "UPDATE cron_jobs SET
                claimed_by = ?1,
                claimed_at_ms = ?2,
                claim_expires_at_ms = ?3,
                updated_at_ms = ?2
             WHERE agent_id IN (
                 SELECT agent_id FROM cron_jobs
                 WHERE enabled = 1
                   AND next_run_at_ms IS NOT NULL
                   AND next_run_at_ms <= ?2
                   AND (claimed_by IS NULL OR claim_expires_at_ms < ?2)
                 ORDER BY next_run_at_ms ASC
             )
             RETURNING *",
        )?;
        let mut rows = stmt.query(params![claimed_by, now_ms as i64, (now_ms + claim_ttl_ms) as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_job(row)?);
        }
        out.sort_by_key(|j| j.next_run_at_ms);
        Ok(out)
    }

    /// Re-aim a job whose stored next fire turned out to be stale.
    pub fn set_cron_next_run(
        &self,
        agent_id: &str,
        next_run_at_ms: u64,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE cron_jobs SET next_run_at_ms = ?2, updated_at_ms = ?3 WHERE agent_id = ?1",
            params![agent_id, next_run_at_ms as i64, now_ms as i64],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("cron job", agent_id));
        }
        Ok(())
    }

    /// Release a claim without recording a dispatch (error path).
    pub fn release_cron_claim(&self, agent_id: &str, now_ms: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE cron_jobs SET claimed_by = NULL, claimed_at_ms = NULL,
                claim_expires_at_ms = NULL, updated_at_ms = ?2
             WHERE agent_id = ?1",
            params![agent_id, now_ms as i64],
        )?;
        Ok(())
    }

    /// Record a completed dispatch: in-flight lease set, timestamps
    /// advanced, claim cleared — one statement.
    pub fn finish_cron_dispatch(
        &self,
        agent_id: &str,
        run_key: &str,
        goal_id: &GoalId,
        outcome: &ScheduleOutcome,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE cron_jobs SET
                in_flight_run_key = ?2,
                in_flight_goal_id = ?3,
                in_flight_started_at_ms = ?4,
                last_run_at_ms = ?5,
                next_run_at_ms = ?6,
                claimed_by = NULL,
                claimed_at_ms = NULL,
                claim_expires_at_ms = NULL,
                updated_at_ms = ?4
             WHERE agent_id = ?1",
            params![
                agent_id,
                run_key,
                goal_id.as_str(),
                now_ms as i64,
                outcome.scheduled_for_ms as i64,
                outcome.next_run_at_ms as i64,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("cron job", agent_id));
        }
        Ok(())
    }

    /// Clear the in-flight lease; all three fields drop together.
    pub fn clear_cron_in_flight(&self, agent_id: &str, now_ms: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE cron_jobs SET in_flight_run_key = NULL, in_flight_goal_id = NULL,
                in_flight_started_at_ms = NULL, updated_at_ms = ?2
             WHERE agent_id = ?1",
            params![agent_id, now_ms as i64],
        )?;
        Ok(())
    }

    /// Insert a cron job run; on `(agent_id, run_key)` conflict the
    /// existing row is returned untouched.
    ///
    /// Returns `(row, inserted)`.
    pub fn insert_cron_run(
        &self,
        agent_id: &str,
        run_key: &str,
        scheduled_for_ms: u64,
        coalesced_count: u32,
        now_ms: u64,
    ) -> Result<(CronJobRun, bool), StoreError> {
        let inserted = self.conn.execute(
            "INSERT INTO cron_job_runs
                (agent_id, run_key, scheduled_for_ms, coalesced_count, status, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
             ON CONFLICT(agent_id, run_key) DO NOTHING",
            params![agent_id, run_key, scheduled_for_ms as i64, coalesced_count as i64, now_ms as i64],
        )?;
        let run = self
            .get_cron_run(agent_id, run_key)?
            .ok_or_else(|| StoreError::not_found("cron job run", run_key))?;
        Ok((run, inserted > 0))
    }

    pub fn get_cron_run(
        &self,
        agent_id: &str,
        run_key: &str,
    ) -> Result<Option<CronJobRun>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM cron_job_runs WHERE agent_id = ?1 AND run_key = ?2")?;
        let mut rows = stmt.query(params![agent_id, run_key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_cron_run(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_cron_runs(&self, agent_id: &str) -> Result<Vec<CronJobRun>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM cron_job_runs WHERE agent_id = ?1 ORDER BY scheduled_for_ms ASC",
        )?;
        let mut rows = stmt.query(params![agent_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_cron_run(row)?);
        }
        Ok(out)
    }

    /// Link a pending cron run to its goal and mark it submitted.
    pub fn link_cron_run(
        &self,
        agent_id: &str,
        run_key: &str,
        goal_id: &GoalId,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE cron_job_runs SET goal_id = ?3, status = 'submitted'
             WHERE agent_id = ?1 AND run_key = ?2",
            params![agent_id, run_key, goal_id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("cron job run", run_key));
        }
        Ok(())
    }

    pub fn set_cron_run_status(
        &self,
        agent_id: &str,
        run_key: &str,
        status: CronRunStatus,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE cron_job_runs SET status = ?3 WHERE agent_id = ?1 AND run_key = ?2",
            params![agent_id, run_key, status.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("cron job run", run_key));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;
