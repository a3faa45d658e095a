// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon side of the control-plane bridge.
//!
//! Serves the bridge socket: executes forwarded scheduler commands and
//! streams scheduler events to every connected peer.

use drover_core::{Clock, SchedulerEvent};
use drover_engine::Scheduler;
use drover_wire::{
    read_frame, write_frame, BridgeMessage, CommandEnvelope, CommandResult, SchedulerCommand,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct BridgeServer<C: Clock> {
    scheduler: Arc<Scheduler<C>>,
    socket_path: PathBuf,
}

/// Just enough of a command frame to answer one we cannot fully parse.
#[derive(Debug, Deserialize)]
struct RawCommand {
    #[serde(rename = "requestId")]
    request_id: String,
    #[serde(default)]
    command: Option<String>,
}

impl<C: Clock> BridgeServer<C> {
    pub fn new(scheduler: Arc<Scheduler<C>>, socket_path: PathBuf) -> Self {
        Self { scheduler, socket_path }
    }

    /// Bind the bridge socket and serve until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!(path = %self.socket_path.display(), "bridge listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("bridge stopping");
                    let _ = std::fs::remove_file(&self.socket_path);
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move { server.handle_conn(stream).await });
                        }
                        Err(e) => tracing::warn!(error = %e, "bridge accept failed"),
                    }
                }
            }
        }
    }

    /// Serve one control-plane connection.
    pub async fn handle_conn<S>(self: &Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<BridgeMessage>();

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                if write_frame(&mut writer, &frame).await.is_err() {
                    break;
                }
            }
        });

        // Every scheduler event streams to this peer while it lives.
        let events_tx = frames_tx.clone();
        let subscriber = self.scheduler.subscribe(move |event: &SchedulerEvent| {
            let _ = events_tx.send(BridgeMessage::SchedulerEvent {
                timestamp: event.at_ms,
                data: event.clone(),
            });
        });

        loop {
            // Two-phase read so a command we cannot parse still gets a
            // correlated failure reply.
            let raw: serde_json::Value = match read_frame(&mut reader).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::debug!(error = %e, "bridge peer gone");
                    break;
                }
            };

            match serde_json::from_value::<BridgeMessage>(raw.clone()) {
                Ok(BridgeMessage::Hello { data, .. }) => {
                    tracing::info!(client = %data.client, version = %data.version, pid = data.pid,
                        "control plane connected");
                }
                Ok(BridgeMessage::SchedulerCommand { data, .. }) => {
                    let result = self.execute(data).await;
                    let _ = frames_tx.send(BridgeMessage::SchedulerCommandResult {
                        timestamp: self.scheduler_clock_ms(),
                        data: result,
                    });
                }
                Ok(other) => {
                    tracing::debug!(timestamp = other.timestamp(), "ignoring bridge frame");
                }
                Err(_) => {
                    // Unknown command tag or malformed payload.
                    let reply = raw
                        .get("data")
                        .cloned()
                        .and_then(|data| serde_json::from_value::<RawCommand>(data).ok())
                        .map(|raw_cmd| {
                            CommandResult::err(
                                raw_cmd.request_id,
                                format!(
                                    "unknown command {:?}",
                                    raw_cmd.command.as_deref().unwrap_or("<missing>")
                                ),
                            )
                        });
                    match reply {
                        Some(result) => {
                            let _ = frames_tx.send(BridgeMessage::SchedulerCommandResult {
                                timestamp: self.scheduler_clock_ms(),
                                data: result,
                            });
                        }
                        None => tracing::warn!("undecodable bridge frame without requestId"),
                    }
                }
            }
        }

        self.scheduler.unsubscribe(subscriber);
        writer_task.abort();
    }

    async fn execute(&self, envelope: CommandEnvelope) -> CommandResult {
        let CommandEnvelope { request_id, command } = envelope;
        let outcome = match &command {
            SchedulerCommand::SubmitGoal { goal_id } => {
                self.scheduler.submit_goal(goal_id).await
            }
            SchedulerCommand::CancelGoal { goal_id, reason } => {
                self.scheduler.cancel_goal(goal_id, reason.as_deref()).await
            }
        };
        match outcome {
            Ok(()) => CommandResult::ok(request_id),
            Err(e) => {
                tracing::warn!(error = %e, "scheduler command failed");
                CommandResult::err(request_id, e.to_string())
            }
        }
    }

    fn scheduler_clock_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
