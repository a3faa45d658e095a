// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only audit log.

use crate::error::StoreError;
use crate::Tx;
use drover_core::AuditEntry;
use rusqlite::{params, Row};

fn row_to_entry(row: &Row<'_>) -> Result<AuditEntry, StoreError> {
    let actor_kind: String = row.get("actor_kind")?;
    let parse_json = |col: &str, row: &Row<'_>| -> Result<Option<serde_json::Value>, StoreError> {
        match row.get::<_, Option<String>>(col)? {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    };
    Ok(AuditEntry {
        actor: row.get("actor")?,
        actor_kind: serde_json::from_value(serde_json::Value::String(actor_kind.clone()))
            .map_err(|_| StoreError::Migration(format!("unknown actor kind {actor_kind:?}")))?,
        action: row.get("action")?,
        entity_kind: row.get("entity_kind")?,
        entity_id: row.get("entity_id")?,
        goal_id: row.get("goal_id")?,
        work_item_id: row.get("work_item_id")?,
        run_id: row.get("run_id")?,
        session_id: row.get("session_id")?,
        before: parse_json("before_json", row)?,
        after: parse_json("after_json", row)?,
        meta: parse_json("meta", row)?,
        at_ms: row.get::<_, i64>("at_ms")? as u64,
    })
}

impl Tx<'_> {
    pub fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let to_json = |v: &Option<serde_json::Value>| -> Result<Option<String>, StoreError> {
            match v {
                Some(v) => Ok(Some(serde_json::to_string(v)?)),
                None => Ok(None),
            }
        };
        self.conn.execute(
            "INSERT INTO audit_log (actor, actor_kind, action, entity_kind, entity_id,
                goal_id, work_item_id, run_id, session_id, before_json, after_json, meta, at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                entry.actor,
                entry.actor_kind.to_string(),
                entry.action,
                entry.entity_kind,
                entry.entity_id,
                entry.goal_id,
                entry.work_item_id,
                entry.run_id,
                entry.session_id,
                to_json(&entry.before)?,
                to_json(&entry.after)?,
                to_json(&entry.meta)?,
                entry.at_ms as i64,
            ],
        )?;
        Ok(())
    }

    /// Most recent entries, newest first.
    pub fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?1")?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_entry(row)?);
        }
        Ok(out)
    }

    /// Entries for a goal, oldest first (user-visible failure trail).
    pub fn list_audit_for_goal(&self, goal_id: &str) -> Result<Vec<AuditEntry>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM audit_log WHERE goal_id = ?1 ORDER BY id ASC")?;
        let mut rows = stmt.query(params![goal_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_entry(row)?);
        }
        Ok(out)
    }
}

impl crate::Store {
    /// One audit append in its own transaction.
    pub fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.with_tx(|tx| tx.append_audit(entry))
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
