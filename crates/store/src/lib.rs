// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-store: relational persistence for goals, work items, runs,
//! cron jobs, and the audit log.
//!
//! A [`Store`] owns one SQLite connection. Every operation runs inside a
//! transaction: single calls open their own, and [`Store::with_tx`] gives
//! callers an explicit transaction block over the same operation set
//! (exposed on [`Tx`]). Busy/locked errors are retried internally a few
//! times before surfacing as [`StoreError::Busy`].

mod audit;
mod cron;
mod db;
mod error;
mod goals;
mod prune;
mod runs;
mod work_items;

pub use cron::ScheduleOutcome;
pub use error::{MaybeBusy, StoreError};
pub use runs::RunMetrics;

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

const BUSY_RETRIES: u32 = 3;

/// Handle to the relational store.
pub struct Store {
    conn: Mutex<Connection>,
}

/// Operation set available inside a transaction.
///
/// All entity operations are implemented on this type (spread across the
/// per-entity modules); [`Store`] wraps each in its own transaction.
pub struct Tx<'a> {
    pub(crate) conn: &'a Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path` and apply pending
    /// migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = db::open(path)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = db::open_in_memory()?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Run `f` inside one transaction, retrying the whole block when
    /// SQLite reports the database busy.
    ///
    /// `f` may run more than once; it must not hold side effects outside
    /// the transaction. The error type is anything that can absorb a
    /// [`StoreError`], so callers may mix store operations with their own
    /// logic in one block.
    pub fn with_tx<T, E>(&self, mut f: impl FnMut(&Tx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError> + MaybeBusy,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut conn = self.conn.lock();
            let result: Result<T, E> = (|| {
                let tx = conn.transaction().map_err(StoreError::from)?;
                let out = f(&Tx { conn: &tx })?;
                tx.commit().map_err(StoreError::from)?;
                Ok(out)
            })();
            match result {
                Err(e) if e.is_busy() && attempt <= BUSY_RETRIES => {
                    drop(conn);
                    tracing::debug!(attempt, "store busy, retrying transaction");
                    std::thread::sleep(std::time::Duration::from_millis(10 * attempt as u64));
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::Store;

    pub fn store() -> Store {
        match Store::open_in_memory() {
            Ok(s) => s,
            Err(e) => panic!("open in-memory store: {e}"),
        }
    }
}
