// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection setup, schema creation, and versioned migrations.

use crate::error::StoreError;
use rusqlite::Connection;
use std::path::Path;

/// Current schema version. Bump when appending to [`MIGRATIONS`].
const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS goals (
    id                  TEXT PRIMARY KEY,
    title               TEXT NOT NULL,
    description         TEXT NOT NULL DEFAULT '',
    criteria            TEXT NOT NULL DEFAULT '[]',
    priority            INTEGER NOT NULL DEFAULT 0,
    budget_tokens       INTEGER,
    budget_wall_minutes REAL,
    budget_cost         REAL,
    spent_tokens        INTEGER NOT NULL DEFAULT 0,
    spent_wall_minutes  REAL NOT NULL DEFAULT 0,
    spent_cost          REAL NOT NULL DEFAULT 0,
    status              TEXT NOT NULL,
    created_at_ms       INTEGER NOT NULL,
    updated_at_ms       INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS work_items (
    id              TEXT PRIMARY KEY,
    goal_id         TEXT NOT NULL REFERENCES goals(id) ON DELETE CASCADE,
    title           TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    kind            TEXT NOT NULL DEFAULT 'code',
    priority        INTEGER NOT NULL DEFAULT 0,
    deps            TEXT NOT NULL DEFAULT '[]',
    verification    TEXT NOT NULL DEFAULT '[]',
    retry_count     INTEGER NOT NULL DEFAULT 0,
    max_retries     INTEGER NOT NULL DEFAULT 2,
    status          TEXT NOT NULL,
    verify_status   TEXT NOT NULL DEFAULT 'not_started',
    context         TEXT,
    model_hint      TEXT,
    tool_allowlist  TEXT,
    created_at_ms   INTEGER NOT NULL,
    updated_at_ms   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_work_items_goal ON work_items(goal_id);
CREATE INDEX IF NOT EXISTS idx_work_items_status
    ON work_items(status, priority DESC, created_at_ms ASC, id ASC);

CREATE TABLE IF NOT EXISTS runs (
    id            TEXT PRIMARY KEY,
    work_item_id  TEXT NOT NULL REFERENCES work_items(id) ON DELETE CASCADE,
    goal_id       TEXT NOT NULL,
    agent_kind    TEXT NOT NULL DEFAULT '',
    seq           INTEGER NOT NULL,
    status        TEXT NOT NULL,
    tokens_used   INTEGER NOT NULL DEFAULT 0,
    wall_ms       INTEGER NOT NULL DEFAULT 0,
    cost          REAL NOT NULL DEFAULT 0,
    artifacts     TEXT NOT NULL DEFAULT '[]',
    log           TEXT NOT NULL DEFAULT '',
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    UNIQUE (work_item_id, seq)
);
CREATE INDEX IF NOT EXISTS idx_runs_open ON runs(work_item_id, status);

CREATE TABLE IF NOT EXISTS cron_jobs (
    agent_id                TEXT PRIMARY KEY,
    enabled                 INTEGER NOT NULL DEFAULT 1,
    schedule                TEXT NOT NULL,
    definition_hash         TEXT NOT NULL,
    last_run_at_ms          INTEGER,
    next_run_at_ms          INTEGER,
    in_flight_run_key       TEXT,
    in_flight_goal_id       TEXT,
    in_flight_started_at_ms INTEGER,
    claimed_by              TEXT,
    claimed_at_ms           INTEGER,
    claim_expires_at_ms     INTEGER,
    created_at_ms           INTEGER NOT NULL,
    updated_at_ms           INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cron_job_runs (
    agent_id         TEXT NOT NULL,
    run_key          TEXT NOT NULL,
    goal_id          TEXT REFERENCES goals(id) ON DELETE CASCADE,
    scheduled_for_ms INTEGER NOT NULL,
    coalesced_count  INTEGER NOT NULL DEFAULT 0,
    status           TEXT NOT NULL DEFAULT 'pending',
    created_at_ms    INTEGER NOT NULL,
    PRIMARY KEY (agent_id, run_key)
);

CREATE TABLE IF NOT EXISTS audit_log (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    actor        TEXT NOT NULL,
    actor_kind   TEXT NOT NULL,
    action       TEXT NOT NULL,
    entity_kind  TEXT NOT NULL,
    entity_id    TEXT NOT NULL,
    goal_id      TEXT,
    work_item_id TEXT,
    run_id       TEXT,
    session_id   TEXT,
    before_json  TEXT,
    after_json   TEXT,
    meta         TEXT,
    at_ms        INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_at ON audit_log(at_ms);
"#;

/// Ordered migrations applied after the base schema, one entry per
/// version step above 1. Empty today.
const MIGRATIONS: &[&str] = &[];

pub(crate) fn open(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Migration(format!("create {}: {e}", parent.display())))?;
    }
    let conn = Connection::open(path)?;
    init(&conn)?;
    Ok(conn)
}

pub(crate) fn open_in_memory() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    init(&conn)?;
    Ok(conn)
}

fn init(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "wal")?;
    conn.pragma_update(None, "foreign_keys", "on")?;
    conn.pragma_update(None, "busy_timeout", 5_000)?;

    conn.execute_batch(SCHEMA)?;

    let version: Option<i64> =
        conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

    match version {
        None => {
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [SCHEMA_VERSION])?;
        }
        Some(v) if v < SCHEMA_VERSION => {
            for step in (v + 1)..=SCHEMA_VERSION {
                let Some(migration) = MIGRATIONS.get(step as usize - 2) else {
                    return Err(StoreError::Migration(format!(
                        "missing migration to version {step}"
                    )));
                };
                tracing::info!(to = step, "applying schema migration");
                conn.execute_batch(migration)?;
            }
            conn.execute("UPDATE schema_version SET version = ?1", [SCHEMA_VERSION])?;
        }
        Some(v) if v > SCHEMA_VERSION => {
            return Err(StoreError::Migration(format!(
                "database schema version {v} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        Some(_) => {}
    }

    Ok(())
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
