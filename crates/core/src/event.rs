// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler events observed by subscribed clients.

use crate::id::{GoalId, RunId, WorkItemId};
use serde::{Deserialize, Serialize};

/// What happened. Wire names use dotted form ("goal.started").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "goal.started")]
    GoalStarted,
    #[serde(rename = "goal.completed")]
    GoalCompleted,
    #[serde(rename = "goal.failed")]
    GoalFailed,
    #[serde(rename = "goal.cancelled")]
    GoalCancelled,
    #[serde(rename = "work_item.started")]
    WorkItemStarted,
    #[serde(rename = "work_item.completed")]
    WorkItemCompleted,
    #[serde(rename = "work_item.failed")]
    WorkItemFailed,
    #[serde(rename = "run.started")]
    RunStarted,
    #[serde(rename = "run.completed")]
    RunCompleted,
    #[serde(rename = "verification.started")]
    VerificationStarted,
    #[serde(rename = "verification.completed")]
    VerificationCompleted,
    #[serde(rename = "escalation.created")]
    EscalationCreated,
    #[serde(rename = "budget.warning")]
    BudgetWarning,
    #[serde(rename = "budget.exceeded")]
    BudgetExceeded,
}

crate::simple_display! {
    EventKind {
        GoalStarted => "goal.started",
        GoalCompleted => "goal.completed",
        GoalFailed => "goal.failed",
        GoalCancelled => "goal.cancelled",
        WorkItemStarted => "work_item.started",
        WorkItemCompleted => "work_item.completed",
        WorkItemFailed => "work_item.failed",
        RunStarted => "run.started",
        RunCompleted => "run.completed",
        VerificationStarted => "verification.started",
        VerificationCompleted => "verification.completed",
        EscalationCreated => "escalation.created",
        BudgetWarning => "budget.warning",
        BudgetExceeded => "budget.exceeded",
    }
}

/// One observable scheduler state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub at_ms: u64,
    pub goal_id: GoalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_item_id: Option<WorkItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Opaque extra payload, forwarded verbatim to clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl SchedulerEvent {
    pub fn goal(kind: EventKind, goal_id: GoalId, at_ms: u64) -> Self {
        Self { kind, at_ms, goal_id, work_item_id: None, run_id: None, data: None }
    }

    pub fn work_item(kind: EventKind, goal_id: GoalId, item_id: WorkItemId, at_ms: u64) -> Self {
        Self { kind, at_ms, goal_id, work_item_id: Some(item_id), run_id: None, data: None }
    }

    pub fn run(
        kind: EventKind,
        goal_id: GoalId,
        item_id: WorkItemId,
        run_id: RunId,
        at_ms: u64,
    ) -> Self {
        Self { kind, at_ms, goal_id, work_item_id: Some(item_id), run_id: Some(run_id), data: None }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
