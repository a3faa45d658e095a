// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron job records: scheduled agent definitions, leases, and run keys.

use crate::goal::Budgets;
use crate::id::GoalId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// When a cron job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CronSchedule {
    /// Every `every_ms` milliseconds, anchored at the last run
    Interval {
        every_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
    /// 5-field cron expression (minute hour dom month dow), evaluated in `tz`
    Cron { expr: String, tz: String },
}

/// Current in-flight firing of a cron job.
///
/// All three fields are set and cleared together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlight {
    pub run_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<GoalId>,
    pub started_at_ms: u64,
}

/// Short-lived exclusive reservation on a cron job by one dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub claimed_by: String,
    pub claimed_at_ms: u64,
    pub expires_at_ms: u64,
}

impl Claim {
    /// A claim only holds while unexpired.
    pub fn is_held(&self, now_ms: u64) -> bool {
        now_ms <= self.expires_at_ms
    }
}

/// A scheduled agent registered in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    /// Unique agent id this job dispatches
    pub agent_id: String,
    pub enabled: bool,
    pub schedule: CronSchedule,
    /// Stable hash of the agent's definition
    pub definition_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<InFlight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<Claim>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Status of a materialized cron firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronRunStatus {
    Pending,
    Submitted,
    Success,
    Failed,
}

crate::simple_display! {
    CronRunStatus {
        Pending => "pending",
        Submitted => "submitted",
        Success => "success",
        Failed => "failed",
    }
}

/// Materialization of one scheduled firing.
///
/// `(agent_id, run_key)` is unique; at most one row per agent is `pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJobRun {
    pub agent_id: String,
    pub run_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<GoalId>,
    pub scheduled_for_ms: u64,
    /// Additional fire times collapsed into this run
    pub coalesced_count: u32,
    pub status: CronRunStatus,
    pub created_at_ms: u64,
}

/// Deterministic key for one logical firing.
///
/// Repeated evaluation of the same firing produces the same key, which is
/// what makes cron dispatch idempotent across retries and competing
/// dispatchers.
pub fn run_key(agent_id: &str, definition_hash: &str, scheduled_for_ms: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    hasher.update([0]);
    hasher.update(definition_hash.as_bytes());
    hasher.update([0]);
    hasher.update(scheduled_for_ms.to_be_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Kind tag selecting the goal builder for a scheduled agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Plan-act loop toward a described objective
    ReactGoal,
    /// Watches an external feed and reacts to changes
    MarketListener,
}

crate::simple_display! {
    AgentKind {
        ReactGoal => "react_goal",
        MarketListener => "market_listener",
    }
}

/// A named, versioned agent definition registered with the cron scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub agent_id: String,
    pub kind: AgentKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub schedule: CronSchedule,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub budgets: Budgets,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_allowlist: Option<Vec<String>>,
}

fn default_enabled() -> bool {
    true
}

impl AgentDefinition {
    /// Stable hash over the canonical JSON encoding of the definition.
    ///
    /// Feeds the run key, so editing an agent's definition starts a fresh
    /// idempotency scope for subsequent firings.
    pub fn definition_hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(32);
        for b in digest.iter().take(16) {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;
