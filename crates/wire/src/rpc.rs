// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC surface between clients and the control plane.

use drover_core::SchedulerEvent;
use serde::{Deserialize, Serialize};

/// Request from a client. `params` is method-specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Error codes a failed RPC can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidParams,
    MethodNotFound,
    AuthRequired,
    PermissionDenied,
    GoalNotFound,
    InvalidStateTransition,
    GoalAlreadyCancelled,
    Internal,
}

drover_core::simple_display! {
    ErrorCode {
        InvalidParams => "invalid_params",
        MethodNotFound => "method_not_found",
        AuthRequired => "auth_required",
        PermissionDenied => "permission_denied",
        GoalNotFound => "goal_not_found",
        InvalidStateTransition => "invalid_state_transition",
        GoalAlreadyCancelled => "goal_already_cancelled",
        Internal => "internal",
    }
}

/// Error half of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }
}

/// Response to one request. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self { id, result: Some(result), error: None }
    }

    pub fn err(id: u64, error: RpcError) -> Self {
        Self { id, result: None, error: Some(error) }
    }
}

/// Frame pushed from the control plane to a client: either a reply to one
/// of its requests or a subscribed scheduler event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Response(RpcResponse),
    Event { event: SchedulerEvent },
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
