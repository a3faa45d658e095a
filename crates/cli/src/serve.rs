// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `drover serve`: run the control plane in the foreground.

use anyhow::Context;
use drover_control::{AuthService, BridgeClient, ControlServer, ControlServerConfig, RpcContext, SessionRegistry};
use drover_daemon::{DaemonConfig, Paths};
use drover_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Keep trying the daemon's bridge socket; the control plane is useful
/// (persistence-only) even while the daemon is away.
fn spawn_bridge_reconnect(
    bridge: Arc<BridgeClient>,
    socket: std::path::PathBuf,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(2));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {
                    if bridge.is_connected() {
                        continue;
                    }
                    match bridge.connect(&socket).await {
                        Ok(()) => tracing::info!("connected to scheduler daemon"),
                        Err(e) => tracing::debug!(error = %e, "daemon not reachable yet"),
                    }
                }
            }
        }
    });
}

pub async fn run(paths: &Paths, config: &DaemonConfig) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(&paths.db_path).context("open database")?);
    let sessions = Arc::new(SessionRegistry::new());
    let bridge = Arc::new(BridgeClient::default());
    let auth = Arc::new(AuthService::open(paths.credentials.clone()).context("open credentials")?);
    let ctx = Arc::new(RpcContext {
        store,
        sessions,
        bridge: Arc::clone(&bridge),
    });

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    spawn_bridge_reconnect(bridge, paths.bridge_socket.clone(), shutdown.clone());

    let server = Arc::new(ControlServer::new(
        ControlServerConfig {
            socket_path: paths.control_socket.clone(),
            auth_required: config.auth_required,
            idle_timeout_ms: config.session_idle_timeout_ms,
        },
        ctx,
        auth,
    ));
    server.run(shutdown).await.context("control plane failed")?;
    Ok(())
}
