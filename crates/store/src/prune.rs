// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retention: delete old audit entries and old terminal goals.

use crate::error::StoreError;
use crate::Tx;
use rusqlite::params;

impl Tx<'_> {
    /// Delete audit entries recorded before `cutoff_ms`. Returns the count.
    pub fn prune_audit(&self, cutoff_ms: u64) -> Result<usize, StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM audit_log WHERE at_ms < ?1", params![cutoff_ms as i64])?;
        Ok(deleted)
    }

    /// Delete terminal goals last touched before `cutoff_ms`.
    ///
    /// Work items, runs, and cron job runs go with them via foreign-key
    /// cascade. Returns the number of goals removed.
    pub fn prune_terminal_goals(&self, cutoff_ms: u64) -> Result<usize, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM goals
             WHERE status IN ('completed', 'failed', 'cancelled')
               AND updated_at_ms < ?1",
            params![cutoff_ms as i64],
        )?;
        if deleted > 0 {
            tracing::info!(deleted, "pruned terminal goals");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
#[path = "prune_tests.rs"]
mod tests;
