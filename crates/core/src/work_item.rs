// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work item: one executable unit within a goal, and its status state machine.

use crate::id::{GoalId, WorkItemId};
use serde::{Deserialize, Serialize};

/// Maximum transition-history entries kept in memory per work item.
pub const TRANSITION_HISTORY_CAP: usize = 32;

/// Status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// Waiting for dependencies
    Queued,
    /// All dependencies done, eligible for dispatch
    Ready,
    /// An open run exists
    InProgress,
    /// Execution succeeded, quality gates running
    Verify,
    /// Terminal success
    Done,
    /// Terminal failure (until explicit retry)
    Failed,
    /// Held back, will not be selected
    Blocked,
}

crate::simple_display! {
    WorkItemStatus {
        Queued => "queued",
        Ready => "ready",
        InProgress => "in_progress",
        Verify => "verify",
        Done => "done",
        Failed => "failed",
        Blocked => "blocked",
    }
}

impl WorkItemStatus {
    /// Whether a transition from `self` to `to` is allowed.
    ///
    /// `done` is terminal; `failed` may only re-enter the queue through
    /// the retry policy (`failed → queued | ready`).
    pub fn can_transition_to(self, to: WorkItemStatus) -> bool {
        use WorkItemStatus::*;
        matches!(
            (self, to),
            (Queued, Ready | Blocked | Failed)
                | (Ready, InProgress | Blocked | Failed)
                | (InProgress, Verify | Done | Failed | Blocked)
                | (Verify, Done | Failed | InProgress)
                | (Failed, Queued | Ready)
                | (Blocked, Queued | Ready | Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == WorkItemStatus::Done
    }

    /// Statuses that keep the owning goal active.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            WorkItemStatus::Ready
                | WorkItemStatus::InProgress
                | WorkItemStatus::Verify
                | WorkItemStatus::Blocked
        )
    }
}

/// Rejected work-item status transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} -> {to} for work item {item_id}")]
pub struct TransitionError {
    pub item_id: WorkItemId,
    pub from: WorkItemStatus,
    pub to: WorkItemStatus,
}

/// Verification progress of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    NotStarted,
    InProgress,
    Passed,
    Failed,
}

crate::simple_display! {
    VerifyStatus {
        NotStarted => "not_started",
        InProgress => "in_progress",
        Passed => "passed",
        Failed => "failed",
    }
}

/// Kind of a quality gate or success criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    /// Machine-checkable: runs a command, exit status decides
    Deterministic,
    /// Judgement call: a reviewer (human or model) answers pass/fail
    Review,
}

crate::simple_display! {
    GateKind {
        Deterministic => "deterministic",
        Review => "review",
    }
}

/// One quality gate in a work item's verification plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub name: String,
    pub kind: GateKind,
    /// Shell command for deterministic gates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Review prompt for review gates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// One recorded status transition. Kept in memory only, bounded per item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    pub from: WorkItemStatus,
    pub to: WorkItemStatus,
    pub at_ms: u64,
    pub reason: Option<String>,
}

/// One executable unit within a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub goal_id: GoalId,
    pub title: String,
    pub description: String,
    /// Free-form type tag ("analysis", "code", "test", ...)
    pub kind: String,
    /// Higher runs earlier
    pub priority: i32,
    /// Ids of sibling work items that must be `done` first
    #[serde(default)]
    pub deps: Vec<WorkItemId>,
    /// Quality gates that must pass before `done`
    #[serde(default)]
    pub verification: Vec<Gate>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: WorkItemStatus,
    pub verify_status: VerifyStatus,
    /// Opaque context map; the core validates only the fields it reads
    #[serde(default)]
    pub context: serde_json::Value,
    /// Agent-provided model hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
    /// Agent-provided tool allow-list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_allowlist: Option<Vec<String>>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl WorkItem {
    /// Create a queued work item with no dependencies or gates.
    pub fn new(goal_id: GoalId, title: impl Into<String>, now_ms: u64) -> Self {
        Self {
            id: WorkItemId::new(),
            goal_id,
            title: title.into(),
            description: String::new(),
            kind: "code".to_string(),
            priority: 0,
            deps: Vec::new(),
            verification: Vec::new(),
            retry_count: 0,
            max_retries: 2,
            status: WorkItemStatus::Queued,
            verify_status: VerifyStatus::NotStarted,
            context: serde_json::Value::Null,
            model_hint: None,
            tool_allowlist: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// True when at least one retry remains.
    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Whether this item has any quality gates to run after execution.
    pub fn has_verification(&self) -> bool {
        !self.verification.is_empty()
    }

    /// Read a string field from the opaque context map.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }
}

crate::builder! {
    pub struct WorkItemBuilder => WorkItem {
        into {
            title: String = "test item",
            description: String = "",
            kind: String = "code",
        }
        set {
            goal_id: GoalId = GoalId::from_string("goal-test"),
            priority: i32 = 0,
            deps: Vec<WorkItemId> = Vec::new(),
            verification: Vec<Gate> = Vec::new(),
            retry_count: u32 = 0,
            max_retries: u32 = 2,
            status: WorkItemStatus = WorkItemStatus::Queued,
            verify_status: VerifyStatus = VerifyStatus::NotStarted,
            context: serde_json::Value = serde_json::Value::Null,
            created_at_ms: u64 = 1_000_000,
            updated_at_ms: u64 = 1_000_000,
        }
        option {
            model_hint: String = None,
            tool_allowlist: Vec<String> = None,
        }
        computed {
            id: WorkItemId = WorkItemId::new(),
        }
    }
}

#[cfg(test)]
#[path = "work_item_tests.rs"]
mod tests;
