// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: TOML file under the state directory, with
//! environment and CLI overrides.

use drover_core::{AgentDefinition, LaneCaps};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const STATE_DIR_ENV: &str = "DROVER_STATE_DIR";
pub const DB_PATH_ENV: &str = "DROVER_DB_PATH";

/// Well-known file locations inside the state directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub state_dir: PathBuf,
    pub db_path: PathBuf,
    pub lock_path: PathBuf,
    pub bridge_socket: PathBuf,
    pub control_socket: PathBuf,
    pub credentials: PathBuf,
    pub config_file: PathBuf,
    pub log_dir: PathBuf,
}

impl Paths {
    /// Resolve the state directory: explicit argument, then the
    /// environment, then `~/.drover`.
    pub fn resolve(state_dir: Option<PathBuf>, db_path: Option<PathBuf>) -> Self {
        let state_dir = state_dir
            .or_else(|| std::env::var_os(STATE_DIR_ENV).map(PathBuf::from))
            .or_else(|| dirs::home_dir().map(|home| home.join(".drover")))
            .unwrap_or_else(|| PathBuf::from(".drover"));
        let db_path = db_path
            .or_else(|| std::env::var_os(DB_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| state_dir.join("drover.db"));
        Self {
            db_path,
            lock_path: state_dir.join("droverd.lock"),
            bridge_socket: state_dir.join("sched.sock"),
            control_socket: state_dir.join("control.sock"),
            credentials: state_dir.join("credentials.json"),
            config_file: state_dir.join("config.toml"),
            log_dir: state_dir.join("logs"),
            state_dir,
        }
    }
}

/// `config.toml` contents. Every field has a default so an empty or
/// missing file works.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub tick_interval_ms: u64,
    pub lane_caps: LaneCaps,
    pub cancel_grace_ms: u64,
    pub agent_poll_interval_ms: u64,
    /// Claim lifetime; defaults to two tick intervals when absent.
    pub claim_ttl_ms: Option<u64>,
    pub auth_required: bool,
    pub session_idle_timeout_ms: u64,
    pub audit_retention_days: u32,
    pub goal_retention_days: u32,
    /// Scheduled agents registered at startup.
    pub agents: Vec<AgentDefinition>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            lane_caps: LaneCaps::default(),
            cancel_grace_ms: 30_000,
            agent_poll_interval_ms: 5_000,
            claim_ttl_ms: None,
            auth_required: true,
            session_idle_timeout_ms: 30 * 60 * 1_000,
            audit_retention_days: 30,
            goal_retention_days: 14,
            agents: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.into(), e))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(path.into(), e)),
        }
    }

    pub fn claim_ttl_ms(&self) -> u64 {
        self.claim_ttl_ms.unwrap_or(2 * self.tick_interval_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("parse {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
