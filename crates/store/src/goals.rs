// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Goal persistence.

use crate::error::StoreError;
use crate::Tx;
use drover_core::{Budgets, Goal, GoalId, GoalStatus, Spend};
use rusqlite::{params, Row};

fn status_from_str(s: &str) -> Result<GoalStatus, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| StoreError::Migration(format!("unknown goal status {s:?}")))
}

fn row_to_goal(row: &Row<'_>) -> Result<Goal, StoreError> {
    let criteria: String = row.get("criteria")?;
    let status: String = row.get("status")?;
    Ok(Goal {
        id: GoalId::from_string(row.get::<_, String>("id")?),
        title: row.get("title")?,
        description: row.get("description")?,
        criteria: serde_json::from_str(&criteria)?,
        priority: row.get("priority")?,
        budgets: Budgets {
            tokens: row.get::<_, Option<i64>>("budget_tokens")?.map(|v| v as u64),
            wall_minutes: row.get("budget_wall_minutes")?,
            cost: row.get("budget_cost")?,
        },
        spent: Spend {
            tokens: row.get::<_, i64>("spent_tokens")? as u64,
            wall_minutes: row.get("spent_wall_minutes")?,
            cost: row.get("spent_cost")?,
        },
        status: status_from_str(&status)?,
        created_at_ms: row.get::<_, i64>("created_at_ms")? as u64,
        updated_at_ms: row.get::<_, i64>("updated_at_ms")? as u64,
    })
}

impl Tx<'_> {
    pub fn create_goal(&self, goal: &Goal) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO goals (id, title, description, criteria, priority,
                budget_tokens, budget_wall_minutes, budget_cost,
                spent_tokens, spent_wall_minutes, spent_cost,
                status, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                goal.id.as_str(),
                goal.title,
                goal.description,
                serde_json::to_string(&goal.criteria)?,
                goal.priority,
                goal.budgets.tokens.map(|v| v as i64),
                goal.budgets.wall_minutes,
                goal.budgets.cost,
                goal.spent.tokens as i64,
                goal.spent.wall_minutes,
                goal.spent.cost,
                goal.status.to_string(),
                goal.created_at_ms as i64,
                goal.updated_at_ms as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_goal(&self, id: &GoalId) -> Result<Option<Goal>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT * FROM goals WHERE id = ?1")?;
        let mut rows = stmt.query(params![id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_goal(row)?)),
            None => Ok(None),
        }
    }

    /// List goals newest-first, optionally filtered by status.
    pub fn list_goals(
        &self,
        status: Option<GoalStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Goal>, StoreError> {
        let (sql, args): (&str, Vec<Box<dyn rusqlite::ToSql>>) = match status {
            Some(s) => (
                "SELECT * FROM goals WHERE status = ?1
                 ORDER BY created_at_ms DESC, id ASC LIMIT ?2 OFFSET ?3",
                vec![Box::new(s.to_string()), Box::new(limit as i64), Box::new(offset as i64)],
            ),
            None => (
                "SELECT * FROM goals ORDER BY created_at_ms DESC, id ASC LIMIT ?1 OFFSET ?2",
                vec![Box::new(limit as i64), Box::new(offset as i64)],
            ),
        };
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_goal(row)?);
        }
        Ok(out)
    }

    /// Goals the scheduler re-admits on start.
    pub fn goals_to_recover(&self) -> Result<Vec<Goal>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM goals WHERE status IN ('queued', 'active')
             ORDER BY priority DESC, created_at_ms ASC, id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_goal(row)?);
        }
        Ok(out)
    }

    /// Set a goal's status, refusing to regress from a terminal status.
    ///
    /// Returns true when the row changed.
    pub fn update_goal_status(
        &self,
        id: &GoalId,
        to: GoalStatus,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE goals SET status = ?2, updated_at_ms = ?3
             WHERE id = ?1 AND status NOT IN ('completed', 'failed', 'cancelled')",
            params![id.as_str(), to.to_string(), now_ms as i64],
        )?;
        Ok(changed > 0)
    }

    /// Additively bump a goal's spent counters. Counters never decrease.
    pub fn add_goal_spend(
        &self,
        id: &GoalId,
        tokens: u64,
        wall_minutes: f64,
        cost: f64,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE goals SET
                spent_tokens = spent_tokens + ?2,
                spent_wall_minutes = spent_wall_minutes + ?3,
                spent_cost = spent_cost + ?4,
                updated_at_ms = ?5
             WHERE id = ?1",
            params![id.as_str(), tokens as i64, wall_minutes, cost, now_ms as i64],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("goal", id.as_str()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "goals_tests.rs"]
mod tests;
