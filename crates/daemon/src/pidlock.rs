// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-daemon PID lock.
//!
//! The lock file records `{pid, started_at_ms}`. Acquisition reads any
//! existing file and probes the recorded PID with signal 0; a live
//! process keeps the lock. A stale or unreadable file is overwritten.

use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PidLockError {
    #[error("another daemon is running (pid {0})")]
    Held(u32),

    #[error("lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct LockContents {
    pid: u32,
    started_at_ms: u64,
}

/// Held for the daemon's lifetime; releasing deletes the file.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    released: bool,
}

impl PidLock {
    pub fn acquire(path: PathBuf, now_ms: u64) -> Result<Self, PidLockError> {
        match std::fs::read(&path) {
            Ok(bytes) => {
                if let Ok(contents) = serde_json::from_slice::<LockContents>(&bytes) {
                    if contents.pid != std::process::id() && process_alive(contents.pid) {
                        return Err(PidLockError::Held(contents.pid));
                    }
                    tracing::info!(stale_pid = contents.pid, "replacing stale lock file");
                } else {
                    tracing::warn!(path = %path.display(), "unreadable lock file, replacing");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents =
            LockContents { pid: std::process::id(), started_at_ms: now_ms };
        let json = serde_json::to_vec(&contents).unwrap_or_default();
        std::fs::write(&path, json)?;
        Ok(Self { path, released: false })
    }

    /// Graceful release: delete the lock file.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
            self.released = true;
        }
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Signal-0 liveness probe. EPERM means the process exists but is not
/// ours; that still counts as alive.
fn process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
#[path = "pidlock_tests.rs"]
mod tests;
