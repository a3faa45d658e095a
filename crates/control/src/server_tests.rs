// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bridge::BridgeClient;
use crate::session::SessionRegistry;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use drover_core::{EventKind, SchedulerEvent};
use drover_store::Store;
use ed25519_dalek::Signer;
use tempfile::TempDir;
use tokio::io::DuplexStream;

struct TestServer {
    server: Arc<ControlServer>,
    _tmp: TempDir,
}

fn server(auth_required: bool) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let sessions = Arc::new(SessionRegistry::new());
    let bridge = Arc::new(BridgeClient::default());
    let ctx = Arc::new(RpcContext { store, sessions, bridge });
    let auth = Arc::new(AuthService::open(tmp.path().join("credentials.json")).unwrap());
    let config = ControlServerConfig {
        socket_path: tmp.path().join("control.sock"),
        auth_required,
        idle_timeout_ms: 60_000,
    };
    TestServer { server: Arc::new(ControlServer::new(config, ctx, auth)), _tmp: tmp }
}

async fn connect(server: &Arc<ControlServer>) -> DuplexStream {
    let (client, serverside) = tokio::io::duplex(64 * 1024);
    let server = Arc::clone(server);
    tokio::spawn(async move { server.handle_conn(serverside).await });
    client
}

async fn call(
    stream: &mut DuplexStream,
    id: u64,
    method: &str,
    params: serde_json::Value,
) -> RpcResponse {
    let request = RpcRequest { id, method: method.to_string(), params };
    write_frame(stream, &request).await.unwrap();
    loop {
        let frame: ServerFrame = read_frame(stream).await.unwrap();
        if let ServerFrame::Response(response) = frame {
            return response;
        }
    }
}

#[tokio::test]
async fn hello_without_auth_opens_admin_session() {
    let t = server(false);
    let mut conn = connect(&t.server).await;
    let response = call(&mut conn, 1, "hello", serde_json::Value::Null).await;
    let result = response.result.unwrap();
    assert_eq!(result["authRequired"], false);
    assert!(result["sessionId"].as_str().unwrap().starts_with("sess-"));

    // The session works immediately.
    let response = call(&mut conn, 2, "goal.list", serde_json::Value::Null).await;
    assert!(response.result.is_some());
}

#[tokio::test]
async fn rpc_before_session_requires_auth() {
    let t = server(true);
    let mut conn = connect(&t.server).await;
    let response = call(&mut conn, 1, "goal.list", serde_json::Value::Null).await;
    assert_eq!(response.error.unwrap().code, ErrorCode::AuthRequired);
}

#[tokio::test]
async fn pair_then_challenge_login_flow() {
    let t = server(true);
    let signing = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
    let public = BASE64.encode(signing.verifying_key().to_bytes());
    let token = t
        .server
        .auth_for_tests()
        .issue_pairing_token(crate::session::Permissions::read_write(), 1)
        .unwrap();

    let mut conn = connect(&t.server).await;
    let response = call(
        &mut conn,
        1,
        "pair",
        serde_json::json!({"token": token, "publicKey": public}),
    )
    .await;
    assert_eq!(response.result.unwrap()["success"], true);

    let response = call(&mut conn, 2, "hello", serde_json::Value::Null).await;
    let result = response.result.unwrap();
    assert_eq!(result["authRequired"], true);
    let challenge = BASE64.decode(result["challenge"].as_str().unwrap()).unwrap();
    let signature = BASE64.encode(signing.sign(&challenge).to_bytes());

    let response = call(
        &mut conn,
        3,
        "authenticate",
        serde_json::json!({"publicKey": public, "signature": signature}),
    )
    .await;
    let result = response.result.unwrap();
    assert!(result["sessionId"].as_str().is_some());
    assert_eq!(result["permissions"]["write"], true);

    // Authenticated RPC now flows.
    let response = call(&mut conn, 4, "goal.submit", serde_json::json!({"title": "x"})).await;
    assert!(response.result.is_some());
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let t = server(true);
    let signing = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
    let public = BASE64.encode(signing.verifying_key().to_bytes());
    let token = t
        .server
        .auth_for_tests()
        .issue_pairing_token(crate::session::Permissions::read_only(), 1)
        .unwrap();
    t.server.auth_for_tests().complete_pairing(&token, &public).unwrap();

    let mut conn = connect(&t.server).await;
    call(&mut conn, 1, "hello", serde_json::Value::Null).await;
    let response = call(
        &mut conn,
        2,
        "authenticate",
        serde_json::json!({"publicKey": public, "signature": BASE64.encode([0u8; 64])}),
    )
    .await;
    assert_eq!(response.error.unwrap().code, ErrorCode::AuthRequired);
}

#[tokio::test]
async fn subscribed_sessions_receive_events() {
    let t = server(false);
    let mut conn = connect(&t.server).await;
    call(&mut conn, 1, "hello", serde_json::Value::Null).await;

    let submitted = call(&mut conn, 2, "goal.submit", serde_json::json!({"title": "watched"})).await;
    let goal_id = submitted.result.unwrap()["goal"]["id"].as_str().unwrap().to_string();
    call(&mut conn, 3, "goal.subscribe", serde_json::json!({"goalId": goal_id})).await;

    // An event arriving over the bridge fans out to this session.
    let event = SchedulerEvent::goal(EventKind::GoalStarted, goal_id.as_str().into(), 5);
    t.server.sessions_for_tests().fan_out(&event);

    let frame: ServerFrame = read_frame(&mut conn).await.unwrap();
    let ServerFrame::Event { event: received } = frame else {
        panic!("expected event frame, got {frame:?}");
    };
    assert_eq!(received, event);
}
