// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work item persistence, including the conditional dependency promotion.

use crate::error::StoreError;
use crate::Tx;
use drover_core::{GoalId, VerifyStatus, WorkItem, WorkItemId, WorkItemStatus};
use rusqlite::{params, Row};

fn parse_tag<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| StoreError::Migration(format!("unknown {what} {s:?}")))
}

fn row_to_item(row: &Row<'_>) -> Result<WorkItem, StoreError> {
    let deps: String = row.get("deps")?;
    let verification: String = row.get("verification")?;
    let context: Option<String> = row.get("context")?;
    let tool_allowlist: Option<String> = row.get("tool_allowlist")?;
    let status: String = row.get("status")?;
    let verify_status: String = row.get("verify_status")?;
    let deps: Vec<String> = serde_json::from_str(&deps)?;
    Ok(WorkItem {
        id: WorkItemId::from_string(row.get::<_, String>("id")?),
        goal_id: GoalId::from_string(row.get::<_, String>("goal_id")?),
        title: row.get("title")?,
        description: row.get("description")?,
        kind: row.get("kind")?,
        priority: row.get("priority")?,
        deps: deps.iter().map(WorkItemId::from_string).collect(),
        verification: serde_json::from_str(&verification)?,
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        max_retries: row.get::<_, i64>("max_retries")? as u32,
        status: parse_tag(&status, "work item status")?,
        verify_status: parse_tag(&verify_status, "verify status")?,
        context: match context {
            Some(c) => serde_json::from_str(&c)?,
            None => serde_json::Value::Null,
        },
        model_hint: row.get("model_hint")?,
        tool_allowlist: match tool_allowlist {
            Some(t) => Some(serde_json::from_str(&t)?),
            None => None,
        },
        created_at_ms: row.get::<_, i64>("created_at_ms")? as u64,
        updated_at_ms: row.get::<_, i64>("updated_at_ms")? as u64,
    })
}

fn query_items(
    tx: &Tx<'_>,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<WorkItem>, StoreError> {
    let mut stmt = tx.conn.prepare(sql)?;
    let mut rows = stmt.query(rusqlite::params_from_iter(args.iter().copied()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row_to_item(row)?);
    }
    Ok(out)
}

impl Tx<'_> {
    pub fn create_work_item(&self, item: &WorkItem) -> Result<(), StoreError> {
        let deps: Vec<&str> = item.deps.iter().map(|d| d.as_str()).collect();
        self.conn.execute(
            "INSERT INTO work_items (id, goal_id, title, description, kind, priority,
                deps, verification, retry_count, max_retries, status, verify_status,
                context, model_hint, tool_allowlist, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                item.id.as_str(),
                item.goal_id.as_str(),
                item.title,
                item.description,
                item.kind,
                item.priority,
                serde_json::to_string(&deps)?,
                serde_json::to_string(&item.verification)?,
                item.retry_count as i64,
                item.max_retries as i64,
                item.status.to_string(),
                item.verify_status.to_string(),
                match &item.context {
                    serde_json::Value::Null => None,
                    other => Some(serde_json::to_string(other)?),
                },
                item.model_hint,
                match &item.tool_allowlist {
                    Some(t) => Some(serde_json::to_string(t)?),
                    None => None,
                },
                item.created_at_ms as i64,
                item.updated_at_ms as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_work_item(&self, id: &WorkItemId) -> Result<Option<WorkItem>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT * FROM work_items WHERE id = ?1")?;
        let mut rows = stmt.query(params![id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_item(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_work_items(&self, goal_id: &GoalId) -> Result<Vec<WorkItem>, StoreError> {
        query_items(
            self,
            "SELECT * FROM work_items WHERE goal_id = ?1
             ORDER BY created_at_ms ASC, id ASC",
            &[&goal_id.as_str()],
        )
    }

    /// Ready items of one goal, in dispatch order.
    pub fn list_ready_items(&self, goal_id: &GoalId) -> Result<Vec<WorkItem>, StoreError> {
        query_items(
            self,
            "SELECT * FROM work_items WHERE goal_id = ?1 AND status = 'ready'
             ORDER BY priority DESC, created_at_ms ASC, id ASC",
            &[&goal_id.as_str()],
        )
    }

    /// Ready items across all goals, in dispatch order.
    pub fn list_ready_items_all(&self) -> Result<Vec<WorkItem>, StoreError> {
        query_items(
            self,
            "SELECT * FROM work_items WHERE status = 'ready'
             ORDER BY priority DESC, created_at_ms ASC, id ASC",
            &[],
        )
    }

    /// Unconditionally set a work item's status.
    ///
    /// Transition legality is the work-item manager's concern; the store
    /// only records.
    pub fn update_work_item_status(
        &self,
        id: &WorkItemId,
        to: WorkItemStatus,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE work_items SET status = ?2, updated_at_ms = ?3 WHERE id = ?1",
            params![id.as_str(), to.to_string(), now_ms as i64],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("work item", id.as_str()));
        }
        Ok(())
    }

    /// Promote a queued item to ready iff every dependency is done.
    ///
    /// One atomic statement; a dependency id that resolves to no row
    /// counts as not-done. Returns true when the item was promoted.
    pub fn promote_if_deps_done(
        &self,
        id: &WorkItemId,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE work_items SET status = 'ready', updated_at_ms = ?2
             WHERE id = ?1 AND status = 'queued'
               AND NOT EXISTS (
                   SELECT 1 FROM json_each(work_items.deps) AS d
                   WHERE NOT EXISTS (
                       SELECT 1 FROM work_items dep
                       WHERE dep.id = d.value AND dep.status = 'done'
                   )
               )",
            params![id.as_str(), now_ms as i64],
        )?;
        Ok(changed > 0)
    }

    pub fn set_retry_count(
        &self,
        id: &WorkItemId,
        retry_count: u32,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE work_items SET retry_count = ?2, updated_at_ms = ?3 WHERE id = ?1",
            params![id.as_str(), retry_count as i64, now_ms as i64],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("work item", id.as_str()));
        }
        Ok(())
    }

    pub fn set_verify_status(
        &self,
        id: &WorkItemId,
        verify_status: VerifyStatus,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE work_items SET verify_status = ?2, updated_at_ms = ?3 WHERE id = ?1",
            params![id.as_str(), verify_status.to_string(), now_ms as i64],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("work item", id.as_str()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "work_items_tests.rs"]
mod tests;
