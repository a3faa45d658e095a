// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only audit records for state-changing actions.

use serde::{Deserialize, Serialize};

/// Who performed an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    User,
    System,
    Daemon,
    Agent,
}

crate::simple_display! {
    ActorKind {
        User => "user",
        System => "system",
        Daemon => "daemon",
        Agent => "agent",
    }
}

/// One append-only record of a state-changing action.
///
/// Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub actor_kind: ActorKind,
    /// Action name, e.g. "goal.submit" or "work_item.transition"
    pub action: String,
    pub entity_kind: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    pub at_ms: u64,
}

impl AuditEntry {
    pub fn new(
        actor_kind: ActorKind,
        actor: impl Into<String>,
        action: impl Into<String>,
        entity_kind: impl Into<String>,
        entity_id: impl Into<String>,
        at_ms: u64,
    ) -> Self {
        Self {
            actor: actor.into(),
            actor_kind,
            action: action.into(),
            entity_kind: entity_kind.into(),
            entity_id: entity_id.into(),
            goal_id: None,
            work_item_id: None,
            run_id: None,
            session_id: None,
            before: None,
            after: None,
            meta: None,
            at_ms,
        }
    }

    crate::setters! {
        option {
            goal_id: String,
            work_item_id: String,
            run_id: String,
            session_id: String,
            before: serde_json::Value,
            after: serde_json::Value,
            meta: serde_json::Value,
        }
    }
}
