// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC method dispatch with permission checks.

use crate::bridge::BridgeClient;
use crate::session::{Permission, SessionRegistry};
use drover_core::{
    ActorKind, AuditEntry, Budgets, Gate, Goal, GoalId, GoalStatus, SessionId, SuccessCriterion,
    WorkItem, WorkItemId,
};
use drover_store::{Store, StoreError};
use drover_wire::{ErrorCode, RpcError, RpcRequest, RpcResponse, SchedulerCommand};
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 200;

/// Everything a method handler can reach.
pub struct RpcContext {
    pub store: Arc<Store>,
    pub sessions: Arc<SessionRegistry>,
    pub bridge: Arc<BridgeClient>,
}

#[derive(Debug, Deserialize)]
struct SubmitWorkItemParams {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(default)]
    priority: i32,
    /// Indices into this request's `work_items` list.
    #[serde(default)]
    deps: Vec<usize>,
    #[serde(default)]
    verification: Vec<Gate>,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default)]
    context: serde_json::Value,
}

fn default_kind() -> String {
    "code".to_string()
}

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize)]
struct SubmitGoalParams {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    budgets: Budgets,
    #[serde(default)]
    criteria: Vec<SuccessCriterion>,
    #[serde(default)]
    work_items: Vec<SubmitWorkItemParams>,
}

#[derive(Debug, Deserialize)]
struct GoalIdParams {
    #[serde(rename = "goalId")]
    goal_id: GoalId,
}

#[derive(Debug, Deserialize)]
struct CancelParams {
    #[serde(rename = "goalId")]
    goal_id: GoalId,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    status: Option<GoalStatus>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

impl RpcContext {
    /// Dispatch one request on behalf of a session.
    pub async fn dispatch(
        &self,
        session_id: &SessionId,
        req: RpcRequest,
        now_ms: u64,
    ) -> RpcResponse {
        let id = req.id;
        match self.dispatch_inner(session_id, req, now_ms).await {
            Ok(result) => RpcResponse::ok(id, result),
            Err(error) => RpcResponse::err(id, error),
        }
    }

    async fn dispatch_inner(
        &self,
        session_id: &SessionId,
        req: RpcRequest,
        now_ms: u64,
    ) -> Result<serde_json::Value, RpcError> {
        let required = match req.method.as_str() {
            "goal.submit" | "goal.cancel" => Permission::Write,
            "goal.status" | "goal.list" | "goal.subscribe" | "goal.unsubscribe" => {
                Permission::Read
            }
            _ => {
                return Err(RpcError::new(
                    ErrorCode::MethodNotFound,
                    format!("unknown method {:?}", req.method),
                ))
            }
        };

        let Some(permissions) = self.sessions.permissions(session_id) else {
            return Err(RpcError::new(ErrorCode::AuthRequired, "no session"));
        };
        if !permissions.allows(required) {
            return Err(RpcError::new(
                ErrorCode::PermissionDenied,
                format!("{} requires {required:?} permission", req.method),
            ));
        }
        self.sessions.touch(session_id, now_ms);

        match req.method.as_str() {
            "goal.submit" => self.goal_submit(session_id, req.params, now_ms).await,
            "goal.status" => self.goal_status(req.params),
            "goal.cancel" => self.goal_cancel(session_id, req.params, now_ms).await,
            "goal.list" => self.goal_list(req.params),
            "goal.subscribe" => self.goal_subscribe(session_id, req.params, true),
            "goal.unsubscribe" => self.goal_subscribe(session_id, req.params, false),
            _ => unreachable!("method checked above"),
        }
    }

    async fn goal_submit(
        &self,
        session_id: &SessionId,
        params: serde_json::Value,
        now_ms: u64,
    ) -> Result<serde_json::Value, RpcError> {
        let params: SubmitGoalParams = parse_params(params)?;

        let mut goal = Goal::new(params.title, now_ms);
        goal.description = params.description;
        goal.priority = params.priority;
        goal.budgets = params.budgets;
        goal.criteria = params.criteria;

        // Resolve index-based dependencies into generated item ids.
        let ids: Vec<WorkItemId> =
            params.work_items.iter().map(|_| WorkItemId::new()).collect();
        let mut items = Vec::with_capacity(params.work_items.len().max(1));
        for (idx, spec) in params.work_items.into_iter().enumerate() {
            let mut deps = Vec::with_capacity(spec.deps.len());
            for dep in spec.deps {
                if dep >= ids.len() || dep == idx {
                    return Err(RpcError::new(
                        ErrorCode::InvalidParams,
                        format!("work item {idx} has invalid dependency index {dep}"),
                    ));
                }
                deps.push(ids[dep]);
            }
            let mut item = WorkItem::new(goal.id, spec.title, now_ms);
            item.id = ids[idx];
            item.description = spec.description;
            item.kind = spec.kind;
            item.priority = spec.priority;
            item.deps = deps;
            item.verification = spec.verification;
            item.max_retries = spec.max_retries;
            item.context = spec.context;
            items.push(item);
        }
        if items.is_empty() {
            items.push(WorkItem::new(goal.id, goal.title.clone(), now_ms));
        }

        self.store
            .with_tx(|tx| -> Result<(), StoreError> {
                tx.create_goal(&goal)?;
                for item in &items {
                    tx.create_work_item(item)?;
                }
                tx.append_audit(
                    &AuditEntry::new(
                        ActorKind::User,
                        session_id.as_str(),
                        "goal.submit",
                        "goal",
                        goal.id.as_str(),
                        now_ms,
                    )
                    .goal_id(goal.id.as_str())
                    .session_id(session_id.as_str())
                    .after(serde_json::json!({ "title": goal.title, "items": items.len() })),
                )
            })
            .map_err(internal)?;

        // The daemon may be away; the goal stays queued in the store and
        // the caller learns the forward outcome.
        let (submitted, message) = match self
            .bridge
            .send_command(SchedulerCommand::SubmitGoal { goal_id: goal.id })
            .await
        {
            Ok(result) => (result.success, result.message),
            Err(e) => (false, Some(e.to_string())),
        };

        Ok(serde_json::json!({
            "goal": goal,
            "work_items": items,
            "scheduler": { "submitted": submitted, "message": message },
        }))
    }

    fn goal_status(&self, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
        let params: GoalIdParams = parse_params(params)?;
        let goal = self.load_goal(&params.goal_id)?;
        let items = self
            .store
            .with_tx(|tx| tx.list_work_items(&params.goal_id))
            .map_err(internal)?;
        Ok(serde_json::json!({ "goal": goal, "work_items": items }))
    }

    async fn goal_cancel(
        &self,
        session_id: &SessionId,
        params: serde_json::Value,
        now_ms: u64,
    ) -> Result<serde_json::Value, RpcError> {
        let params: CancelParams = parse_params(params)?;
        let goal = self.load_goal(&params.goal_id)?;
        match goal.status {
            GoalStatus::Cancelled => {
                return Err(RpcError::new(
                    ErrorCode::GoalAlreadyCancelled,
                    format!("goal {} is already cancelled", params.goal_id),
                ))
            }
            GoalStatus::Completed | GoalStatus::Failed => {
                return Err(RpcError::new(
                    ErrorCode::InvalidStateTransition,
                    format!("goal {} is {}", params.goal_id, goal.status),
                ))
            }
            GoalStatus::Queued | GoalStatus::Active => {}
        }

        let result = self
            .bridge
            .send_command(SchedulerCommand::CancelGoal {
                goal_id: params.goal_id,
                reason: params.reason.clone(),
            })
            .await
            .map_err(|e| RpcError::new(ErrorCode::Internal, e.to_string()))?;
        if !result.success {
            return Err(RpcError::new(
                ErrorCode::Internal,
                result.message.unwrap_or_else(|| "cancel failed".to_string()),
            ));
        }

        self.store
            .append_audit(
                &AuditEntry::new(
                    ActorKind::User,
                    session_id.as_str(),
                    "goal.cancel",
                    "goal",
                    params.goal_id.as_str(),
                    now_ms,
                )
                .goal_id(params.goal_id.as_str())
                .session_id(session_id.as_str())
                .meta(serde_json::json!({ "reason": params.reason })),
            )
            .map_err(internal)?;

        Ok(serde_json::json!({ "success": true }))
    }

    fn goal_list(&self, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
        let params: ListParams = parse_params(params)?;
        let limit = params.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
        let offset = params.offset.unwrap_or(0);
        let goals = self
            .store
            .with_tx(|tx| tx.list_goals(params.status, limit, offset))
            .map_err(internal)?;
        Ok(serde_json::json!({ "goals": goals }))
    }

    fn goal_subscribe(
        &self,
        session_id: &SessionId,
        params: serde_json::Value,
        subscribe: bool,
    ) -> Result<serde_json::Value, RpcError> {
        let params: GoalIdParams = parse_params(params)?;
        // Subscribing to a goal that does not exist is a client bug worth
        // surfacing.
        self.load_goal(&params.goal_id)?;
        let ok = if subscribe {
            self.sessions.subscribe(session_id, params.goal_id)
        } else {
            self.sessions.unsubscribe(session_id, &params.goal_id)
        };
        if !ok && subscribe {
            return Err(RpcError::new(ErrorCode::AuthRequired, "no session"));
        }
        Ok(serde_json::json!({ "success": true }))
    }

    fn load_goal(&self, goal_id: &GoalId) -> Result<Goal, RpcError> {
        self.store
            .with_tx(|tx| tx.get_goal(goal_id))
            .map_err(internal)?
            .ok_or_else(|| {
                RpcError::new(ErrorCode::GoalNotFound, format!("no goal {goal_id}"))
            })
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T, RpcError> {
    let params = if params.is_null() { serde_json::json!({}) } else { params };
    serde_json::from_value(params)
        .map_err(|e| RpcError::new(ErrorCode::InvalidParams, e.to_string()))
}

fn internal(e: impl std::fmt::Display) -> RpcError {
    RpcError::new(ErrorCode::Internal, e.to_string())
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
