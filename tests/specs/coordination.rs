// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-process coordination specs: control plane ↔ daemon bridge.

use crate::prelude::*;
use drover_control::{BridgeClient, RpcContext, SessionRegistry};
use drover_core::SessionId;
use drover_daemon::bridge::BridgeServer;
use drover_wire::RpcRequest;
use std::sync::Arc;

struct Stack {
    harness: crate::prelude::SpecHarness,
    ctx: RpcContext,
    bridge: Arc<BridgeClient>,
    session: SessionId,
    _events: tokio::sync::mpsc::UnboundedReceiver<drover_core::SchedulerEvent>,
}

/// Control plane over the shared store; the daemon side is optional.
fn stack() -> Stack {
    let harness = harness();
    let sessions = Arc::new(SessionRegistry::new());
    let bridge = Arc::new(BridgeClient::new(1_000));
    let (session, _events) =
        sessions.create("spec", drover_control::Permissions::read_write(), 1);
    let ctx = RpcContext {
        store: Arc::clone(&harness.store),
        sessions,
        bridge: Arc::clone(&bridge),
    };
    Stack { harness, ctx, bridge, session, _events }
}

/// Wire the control plane to an in-process daemon bridge server.
async fn attach_daemon(stack: &Stack) {
    let server = Arc::new(BridgeServer::new(
        Arc::clone(&stack.harness.scheduler),
        std::path::PathBuf::from("/unused.sock"),
    ));
    let (client_side, daemon_side) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move { server.handle_conn(daemon_side).await });
    stack.bridge.attach(client_side).await.expect("attach");
}

fn submit_params(title: &str) -> serde_json::Value {
    serde_json::json!({ "title": title })
}

#[tokio::test]
async fn submit_without_daemon_persists_but_reports_disconnect() {
    let s = stack();
    let response = s
        .ctx
        .dispatch(
            &s.session,
            RpcRequest { id: 1, method: "goal.submit".into(), params: submit_params("offline") },
            5,
        )
        .await;
    let result = response.result.expect("persisted");
    assert_eq!(result["scheduler"]["submitted"], false);
    assert_eq!(result["scheduler"]["message"], "Scheduler daemon is not connected");

    let goals = s.harness.store.with_tx(|tx| tx.list_goals(None, 10, 0)).expect("store");
    assert_eq!(goals.len(), 1);
    assert_eq!(goals[0].status, GoalStatus::Queued);
}

#[tokio::test]
async fn submit_with_daemon_forwards_and_admits() {
    let s = stack();
    attach_daemon(&s).await;

    let response = s
        .ctx
        .dispatch(
            &s.session,
            RpcRequest { id: 1, method: "goal.submit".into(), params: submit_params("online") },
            5,
        )
        .await;
    let result = response.result.expect("submitted");
    assert_eq!(result["scheduler"]["submitted"], true);

    let goal_id: GoalId = result["goal"]["id"].as_str().expect("id").into();
    assert!(s.harness.scheduler.active_goals().contains(&goal_id));
    assert_eq!(s.harness.goal(&goal_id).status, GoalStatus::Active);
}

#[tokio::test]
async fn cancel_round_trips_through_the_daemon() {
    let s = stack();
    attach_daemon(&s).await;

    let response = s
        .ctx
        .dispatch(
            &s.session,
            RpcRequest { id: 1, method: "goal.submit".into(), params: submit_params("doomed") },
            5,
        )
        .await;
    let goal_id = response.result.expect("goal")["goal"]["id"]
        .as_str()
        .expect("id")
        .to_string();

    let response = s
        .ctx
        .dispatch(
            &s.session,
            RpcRequest {
                id: 2,
                method: "goal.cancel".into(),
                params: serde_json::json!({ "goalId": goal_id, "reason": "spec" }),
            },
            6,
        )
        .await;
    assert_eq!(response.result.expect("cancelled")["success"], true);
    assert_eq!(s.harness.goal(&goal_id.as_str().into()).status, GoalStatus::Cancelled);

    // Idempotence check: the second cancel is refused by the store state.
    let response = s
        .ctx
        .dispatch(
            &s.session,
            RpcRequest {
                id: 3,
                method: "goal.cancel".into(),
                params: serde_json::json!({ "goalId": goal_id }),
            },
            7,
        )
        .await;
    assert_eq!(
        response.error.expect("already cancelled").code,
        drover_wire::ErrorCode::GoalAlreadyCancelled
    );
}

#[tokio::test]
async fn round_trip_submit_then_status_is_field_equal() {
    let s = stack();
    let params = serde_json::json!({
        "title": "byte equal",
        "description": "fields survive",
        "priority": 9,
        "budgets": { "tokens": 1234, "cost": 0.5 },
        "criteria": [ {"description": "ships", "kind": "review", "required": false} ],
    });
    let submitted = s
        .ctx
        .dispatch(&s.session, RpcRequest { id: 1, method: "goal.submit".into(), params }, 5)
        .await
        .result
        .expect("goal");
    let goal_id = submitted["goal"]["id"].as_str().expect("id");

    let fetched = s
        .ctx
        .dispatch(
            &s.session,
            RpcRequest {
                id: 2,
                method: "goal.status".into(),
                params: serde_json::json!({ "goalId": goal_id }),
            },
            6,
        )
        .await
        .result
        .expect("status");
    assert_eq!(fetched["goal"], submitted["goal"]);
}
