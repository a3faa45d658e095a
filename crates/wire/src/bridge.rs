// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messages exchanged between the control plane and the execution daemon.

use drover_core::{GoalId, SchedulerEvent};
use serde::{Deserialize, Serialize};

/// One-time identity sent by a connecting peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloData {
    pub client: String,
    pub version: String,
    pub pid: u32,
}

/// A scheduler command forwarded from the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SchedulerCommand {
    SubmitGoal {
        #[serde(rename = "goalId")]
        goal_id: GoalId,
    },
    CancelGoal {
        #[serde(rename = "goalId")]
        goal_id: GoalId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl SchedulerCommand {
    pub fn goal_id(&self) -> &GoalId {
        match self {
            SchedulerCommand::SubmitGoal { goal_id } => goal_id,
            SchedulerCommand::CancelGoal { goal_id, .. } => goal_id,
        }
    }
}

/// Command request with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(flatten)]
    pub command: SchedulerCommand,
}

/// Daemon reply to a forwarded command; echoes the correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResult {
    pub fn ok(request_id: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), success: true, message: None }
    }

    pub fn err(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), success: false, message: Some(message.into()) }
    }
}

/// Envelope for every frame on the bridge socket.
///
/// Serializes as `{"type": "...", "timestamp": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    Hello { timestamp: u64, data: HelloData },
    SchedulerEvent { timestamp: u64, data: SchedulerEvent },
    DebugEvent { timestamp: u64, data: serde_json::Value },
    SchedulerCommand { timestamp: u64, data: CommandEnvelope },
    SchedulerCommandResult { timestamp: u64, data: CommandResult },
}

impl BridgeMessage {
    pub fn timestamp(&self) -> u64 {
        match self {
            BridgeMessage::Hello { timestamp, .. }
            | BridgeMessage::SchedulerEvent { timestamp, .. }
            | BridgeMessage::DebugEvent { timestamp, .. }
            | BridgeMessage::SchedulerCommand { timestamp, .. }
            | BridgeMessage::SchedulerCommandResult { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
