// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run persistence: attempt records with gap-free sequence numbers.

use crate::error::StoreError;
use crate::Tx;
use drover_core::{GoalId, Run, RunId, RunStatus, WorkItemId};
use rusqlite::{params, Row};

/// Metrics recorded when a run completes.
#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub tokens_used: u64,
    pub wall_ms: u64,
    pub cost: f64,
    pub artifacts: Vec<String>,
    pub log: String,
}

fn row_to_run(row: &Row<'_>) -> Result<Run, StoreError> {
    let artifacts: String = row.get("artifacts")?;
    let status: String = row.get("status")?;
    Ok(Run {
        id: RunId::from_string(row.get::<_, String>("id")?),
        work_item_id: WorkItemId::from_string(row.get::<_, String>("work_item_id")?),
        goal_id: GoalId::from_string(row.get::<_, String>("goal_id")?),
        agent_kind: row.get("agent_kind")?,
        seq: row.get::<_, i64>("seq")? as u32,
        status: serde_json::from_value(serde_json::Value::String(status.clone()))
            .map_err(|_| StoreError::Migration(format!("unknown run status {status:?}")))?,
        tokens_used: row.get::<_, i64>("tokens_used")? as u64,
        wall_ms: row.get::<_, i64>("wall_ms")? as u64,
        cost: row.get("cost")?,
        artifacts: serde_json::from_str(&artifacts)?,
        log: row.get("log")?,
        created_at_ms: row.get::<_, i64>("created_at_ms")? as u64,
        updated_at_ms: row.get::<_, i64>("updated_at_ms")? as u64,
    })
}

impl Tx<'_> {
    /// Open a new run for a work item.
    ///
    /// Assigns the next sequence number (gap-free, starting at 1) and
    /// refuses while another run of the item is still open.
    pub fn create_run(
        &self,
        work_item_id: &WorkItemId,
        goal_id: &GoalId,
        agent_kind: &str,
        now_ms: u64,
    ) -> Result<Run, StoreError> {
        let open: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE work_item_id = ?1 AND status = 'running'",
            params![work_item_id.as_str()],
            |r| r.get(0),
        )?;
        if open > 0 {
            return Err(StoreError::OpenRunExists(work_item_id.as_str().to_string()));
        }

        let seq: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM runs WHERE work_item_id = ?1",
            params![work_item_id.as_str()],
            |r| r.get(0),
        )?;

        let run = Run {
            id: RunId::new(),
            work_item_id: *work_item_id,
            goal_id: *goal_id,
            agent_kind: agent_kind.to_string(),
            seq: seq as u32,
            status: RunStatus::Running,
            tokens_used: 0,
            wall_ms: 0,
            cost: 0.0,
            artifacts: Vec::new(),
            log: String::new(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        };
        self.conn.execute(
            "INSERT INTO runs (id, work_item_id, goal_id, agent_kind, seq, status,
                tokens_used, wall_ms, cost, artifacts, log, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, 'running', 0, 0, 0, '[]', '', ?6, ?6)",
            params![
                run.id.as_str(),
                run.work_item_id.as_str(),
                run.goal_id.as_str(),
                run.agent_kind,
                seq,
                now_ms as i64,
            ],
        )?;
        Ok(run)
    }

    /// Close a run: status and metrics set in one statement.
    pub fn complete_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        metrics: &RunMetrics,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?2, tokens_used = ?3, wall_ms = ?4, cost = ?5,
                artifacts = ?6, log = ?7, updated_at_ms = ?8
             WHERE id = ?1",
            params![
                run_id.as_str(),
                status.to_string(),
                metrics.tokens_used as i64,
                metrics.wall_ms as i64,
                metrics.cost,
                serde_json::to_string(&metrics.artifacts)?,
                metrics.log,
                now_ms as i64,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("run", run_id.as_str()));
        }
        Ok(())
    }

    pub fn list_runs(&self, work_item_id: &WorkItemId) -> Result<Vec<Run>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM runs WHERE work_item_id = ?1 ORDER BY seq ASC")?;
        let mut rows = stmt.query(params![work_item_id.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_run(row)?);
        }
        Ok(out)
    }

    /// The single non-terminal run of a work item, if any.
    pub fn open_run(&self, work_item_id: &WorkItemId) -> Result<Option<Run>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM runs WHERE work_item_id = ?1 AND status = 'running' LIMIT 1",
        )?;
        let mut rows = stmt.query(params![work_item_id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_run(row)?)),
            None => Ok(None),
        }
    }

    /// All non-terminal runs across the store (recovery scan).
    pub fn list_open_runs(&self) -> Result<Vec<Run>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM runs WHERE status = 'running' ORDER BY created_at_ms ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_run(row)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
#[path = "runs_tests.rs"]
mod tests;
