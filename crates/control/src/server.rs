// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-facing socket server for the control plane.
//!
//! Each connection speaks framed [`RpcRequest`]s and receives framed
//! [`ServerFrame`]s: responses to its own requests plus events for the
//! goals its session subscribed to.

use crate::auth::AuthService;
use crate::error::ControlError;
use crate::rpc::RpcContext;
use crate::session::Permissions;
use drover_core::SessionId;
use drover_wire::{
    read_frame, write_frame, ErrorCode, RpcError, RpcRequest, RpcResponse, ServerFrame,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ControlServerConfig {
    pub socket_path: PathBuf,
    pub auth_required: bool,
    pub idle_timeout_ms: u64,
}

impl ControlServerConfig {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path, auth_required: true, idle_timeout_ms: 30 * 60 * 1_000 }
    }
}

pub struct ControlServer {
    config: ControlServerConfig,
    ctx: Arc<RpcContext>,
    auth: Arc<AuthService>,
    next_conn_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct AuthenticateParams {
    #[serde(rename = "publicKey")]
    public_key: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct PairParams {
    token: String,
    #[serde(rename = "publicKey")]
    public_key: String,
}

impl ControlServer {
    pub fn new(config: ControlServerConfig, ctx: Arc<RpcContext>, auth: Arc<AuthService>) -> Self {
        Self { config, ctx, auth, next_conn_id: AtomicU64::new(1) }
    }

    /// Bind the control socket and serve until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), ControlError> {
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }
        if let Some(parent) = self.config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.config.socket_path)?;
        tracing::info!(path = %self.config.socket_path.display(), "control plane listening");

        // Scheduler events arriving over the bridge fan out to sessions.
        {
            let sessions = Arc::clone(&self.ctx.sessions);
            self.ctx.bridge.on_event(move |event| sessions.fan_out(&event));
        }

        // Idle sessions die in the background.
        {
            let sessions = Arc::clone(&self.ctx.sessions);
            let timeout_ms = self.config.idle_timeout_ms;
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = interval.tick() => {
                            let pruned = sessions.prune_idle(now_ms(), timeout_ms);
                            if pruned > 0 {
                                tracing::info!(pruned, "idle sessions dropped");
                            }
                        }
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("control plane stopping");
                    let _ = std::fs::remove_file(&self.config.socket_path);
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move { server.handle_conn(stream).await });
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
    }

    /// Serve one client connection (also used directly by tests over an
    /// in-memory stream).
    pub async fn handle_conn<S>(self: &Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (mut reader, mut writer) = tokio::io::split(stream);

        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<ServerFrame>();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                if write_frame(&mut writer, &frame).await.is_err() {
                    break;
                }
            }
        });

        let mut session_id: Option<SessionId> = None;
        loop {
            let request: RpcRequest = match read_frame(&mut reader).await {
                Ok(request) => request,
                Err(e) => {
                    tracing::debug!(conn = conn_id, error = %e, "connection closed");
                    break;
                }
            };

            let response = match request.method.as_str() {
                "hello" => self.handle_hello(conn_id, &mut session_id, request.id, &frames_tx),
                "authenticate" => {
                    self.handle_authenticate(conn_id, &mut session_id, request, &frames_tx)
                }
                "pair" => self.handle_pair(request),
                _ => match &session_id {
                    Some(session_id) => {
                        self.ctx.dispatch(session_id, request, now_ms()).await
                    }
                    None => RpcResponse::err(
                        request.id,
                        RpcError::new(ErrorCode::AuthRequired, "authenticate first"),
                    ),
                },
            };
            if frames_tx.send(ServerFrame::Response(response)).is_err() {
                break;
            }
        }

        self.auth.forget_challenge(conn_id);
        if let Some(session_id) = session_id {
            self.ctx.sessions.remove(&session_id);
        }
        writer_task.abort();
    }

    /// `hello`: with auth on, issue a challenge; with auth off, open an
    /// admin session right away.
    fn handle_hello(
        &self,
        conn_id: u64,
        session_id: &mut Option<SessionId>,
        request_id: u64,
        frames_tx: &mpsc::UnboundedSender<ServerFrame>,
    ) -> RpcResponse {
        if self.config.auth_required {
            let challenge = self.auth.issue_challenge(conn_id, now_ms());
            RpcResponse::ok(
                request_id,
                serde_json::json!({
                    "authRequired": true,
                    "challenge": challenge,
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )
        } else {
            let id = self.open_session("local", Permissions::admin(), frames_tx);
            *session_id = Some(id);
            RpcResponse::ok(
                request_id,
                serde_json::json!({
                    "authRequired": false,
                    "sessionId": id,
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )
        }
    }

    fn handle_authenticate(
        &self,
        conn_id: u64,
        session_id: &mut Option<SessionId>,
        request: RpcRequest,
        frames_tx: &mpsc::UnboundedSender<ServerFrame>,
    ) -> RpcResponse {
        if session_id.is_some() {
            return RpcResponse::err(
                request.id,
                RpcError::new(ErrorCode::InvalidParams, "already authenticated"),
            );
        }
        let params: AuthenticateParams = match serde_json::from_value(request.params) {
            Ok(params) => params,
            Err(e) => {
                return RpcResponse::err(
                    request.id,
                    RpcError::new(ErrorCode::InvalidParams, e.to_string()),
                )
            }
        };
        match self.auth.verify(conn_id, &params.public_key, &params.signature, now_ms()) {
            Ok(permissions) => {
                let id = self.open_session(&params.public_key, permissions, frames_tx);
                *session_id = Some(id);
                RpcResponse::ok(
                    request.id,
                    serde_json::json!({ "sessionId": id, "permissions": permissions }),
                )
            }
            Err(e) => RpcResponse::err(
                request.id,
                RpcError::new(ErrorCode::AuthRequired, e.to_string()),
            ),
        }
    }

    fn handle_pair(&self, request: RpcRequest) -> RpcResponse {
        let params: PairParams = match serde_json::from_value(request.params) {
            Ok(params) => params,
            Err(e) => {
                return RpcResponse::err(
                    request.id,
                    RpcError::new(ErrorCode::InvalidParams, e.to_string()),
                )
            }
        };
        match self.auth.complete_pairing(&params.token, &params.public_key) {
            Ok(permissions) => RpcResponse::ok(
                request.id,
                serde_json::json!({ "success": true, "permissions": permissions }),
            ),
            Err(e) => RpcResponse::err(
                request.id,
                RpcError::new(ErrorCode::AuthRequired, e.to_string()),
            ),
        }
    }

    #[cfg(test)]
    pub(crate) fn auth_for_tests(&self) -> &AuthService {
        &self.auth
    }

    #[cfg(test)]
    pub(crate) fn sessions_for_tests(&self) -> &crate::session::SessionRegistry {
        &self.ctx.sessions
    }

    /// Create a session and pump its subscribed events to the writer.
    fn open_session(
        &self,
        identity: &str,
        permissions: Permissions,
        frames_tx: &mpsc::UnboundedSender<ServerFrame>,
    ) -> SessionId {
        let (id, mut events_rx) = self.ctx.sessions.create(identity, permissions, now_ms());
        let frames_tx = frames_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if frames_tx.send(ServerFrame::Event { event }).is_err() {
                    break;
                }
            }
        });
        id
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
