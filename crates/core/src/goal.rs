// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Goal: a user-submitted objective with budgets and success criteria.

use crate::id::GoalId;
use crate::work_item::GateKind;
use serde::{Deserialize, Serialize};

/// Status of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Queued,
    Active,
    Completed,
    Failed,
    Cancelled,
}

crate::simple_display! {
    GoalStatus {
        Queued => "queued",
        Active => "active",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl GoalStatus {
    /// Terminal statuses never revert.
    pub fn is_terminal(self) -> bool {
        matches!(self, GoalStatus::Completed | GoalStatus::Failed | GoalStatus::Cancelled)
    }
}

/// Kind alias for success criteria; shares the gate vocabulary.
pub type CriterionKind = GateKind;

/// One entry in a goal's ordered success-criteria list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriterion {
    pub description: String,
    pub kind: CriterionKind,
    /// Optional criteria may fail without failing the goal
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Resource ceilings for a goal. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Budgets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Monotonically non-decreasing spend counters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Spend {
    pub tokens: u64,
    pub wall_minutes: f64,
    pub cost: f64,
}

impl Spend {
    /// Fraction of the tightest budget consumed, if any budget is set.
    pub fn utilization(&self, budgets: &Budgets) -> Option<f64> {
        let mut max: Option<f64> = None;
        let mut bump = |used: f64, limit: Option<f64>| {
            if let Some(limit) = limit {
                if limit > 0.0 {
                    let frac = used / limit;
                    max = Some(max.map_or(frac, |m: f64| m.max(frac)));
                }
            }
        };
        bump(self.tokens as f64, budgets.tokens.map(|t| t as f64));
        bump(self.wall_minutes, budgets.wall_minutes);
        bump(self.cost, budgets.cost);
        max
    }

    /// True when any budget has been met or exceeded.
    pub fn exhausted(&self, budgets: &Budgets) -> bool {
        self.utilization(budgets).is_some_and(|u| u >= 1.0)
    }
}

/// A user-submitted objective, decomposed into work items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub title: String,
    pub description: String,
    /// Ordered success criteria
    #[serde(default)]
    pub criteria: Vec<SuccessCriterion>,
    /// Higher runs earlier
    pub priority: i32,
    #[serde(default)]
    pub budgets: Budgets,
    #[serde(default)]
    pub spent: Spend,
    pub status: GoalStatus,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Goal {
    pub fn new(title: impl Into<String>, now_ms: u64) -> Self {
        Self {
            id: GoalId::new(),
            title: title.into(),
            description: String::new(),
            criteria: Vec::new(),
            priority: 0,
            budgets: Budgets::default(),
            spent: Spend::default(),
            status: GoalStatus::Queued,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }
}

crate::builder! {
    pub struct GoalBuilder => Goal {
        into {
            title: String = "test goal",
            description: String = "",
        }
        set {
            criteria: Vec<SuccessCriterion> = Vec::new(),
            priority: i32 = 0,
            budgets: Budgets = Budgets::default(),
            spent: Spend = Spend::default(),
            status: GoalStatus = GoalStatus::Queued,
            created_at_ms: u64 = 1_000_000,
            updated_at_ms: u64 = 1_000_000,
        }
        computed {
            id: GoalId = GoalId::new(),
        }
    }
}

#[cfg(test)]
#[path = "goal_tests.rs"]
mod tests;
