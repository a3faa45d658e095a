// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client side of the control-plane ↔ daemon bridge.
//!
//! Commands go out with a correlation id; replies resolve the matching
//! pending request. Scheduler events flowing the other way are handed to
//! the registered event handler.

use crate::error::ControlError;
use drover_core::SchedulerEvent;
use drover_wire::{read_frame, write_frame, BridgeMessage, CommandEnvelope, CommandResult, HelloData, SchedulerCommand};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

type EventHandler = Box<dyn Fn(SchedulerEvent) + Send + Sync>;

/// Correlated command client over the daemon socket.
pub struct BridgeClient {
    connected: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<BridgeMessage>>>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<CommandResult>>>>,
    event_handler: Arc<Mutex<Option<EventHandler>>>,
    command_timeout_ms: u64,
}

impl Default for BridgeClient {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT_MS)
    }
}

impl BridgeClient {
    pub fn new(command_timeout_ms: u64) -> Self {
        Self {
            connected: AtomicBool::new(false),
            outbound: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            event_handler: Arc::new(Mutex::new(None)),
            command_timeout_ms,
        }
    }

    /// Install the callback invoked for every scheduler event the daemon
    /// pushes.
    pub fn on_event(&self, handler: impl Fn(SchedulerEvent) + Send + Sync + 'static) {
        *self.event_handler.lock() = Some(Box::new(handler));
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connect to the daemon's bridge socket and start the pump tasks.
    pub async fn connect(self: &Arc<Self>, path: &Path) -> Result<(), ControlError> {
        let stream = tokio::net::UnixStream::connect(path).await?;
        self.attach(stream).await
    }

    /// Attach to an established stream (used directly by tests).
    pub async fn attach<S>(self: &Arc<Self>, stream: S) -> Result<(), ControlError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        let hello = BridgeMessage::Hello {
            timestamp: epoch_ms_now(),
            data: HelloData {
                client: "drover-control".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                pid: std::process::id(),
            },
        };
        write_frame(&mut writer, &hello).await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<BridgeMessage>();
        *self.outbound.lock() = Some(tx);
        self.connected.store(true, Ordering::SeqCst);

        // Writer pump.
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &msg).await {
                    tracing::warn!(error = %e, "bridge write failed");
                    break;
                }
            }
        });

        // Reader pump.
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match read_frame::<_, BridgeMessage>(&mut reader).await {
                    Ok(BridgeMessage::SchedulerEvent { data, .. }) => {
                        let handler = this.event_handler.lock();
                        if let Some(handler) = handler.as_ref() {
                            handler(data);
                        }
                    }
                    Ok(BridgeMessage::SchedulerCommandResult { data, .. }) => {
                        // A duplicate or unsolicited reply has no pending
                        // entry and is discarded here.
                        let waiter = this.pending.lock().remove(&data.request_id);
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(data);
                        }
                    }
                    Ok(other) => {
                        tracing::debug!(timestamp = other.timestamp(), "unexpected bridge frame");
                    }
                    Err(e) => {
                        tracing::info!(error = %e, "bridge connection closed");
                        break;
                    }
                }
            }
            this.mark_disconnected();
        });

        Ok(())
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.outbound.lock() = None;
        // Fail everything still waiting for a reply.
        let waiters: Vec<_> = self.pending.lock().drain().collect();
        for (request_id, waiter) in waiters {
            let _ = waiter.send(CommandResult::err(request_id, "Scheduler daemon is not connected"));
        }
    }

    /// Forward one scheduler command and await its correlated reply.
    pub async fn send_command(
        &self,
        command: SchedulerCommand,
    ) -> Result<CommandResult, ControlError> {
        let sender = {
            let outbound = self.outbound.lock();
            match outbound.as_ref() {
                Some(sender) if self.is_connected() => sender.clone(),
                _ => return Err(ControlError::DaemonNotConnected),
            }
        };

        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        let envelope = CommandEnvelope { request_id: request_id.clone(), command };
        if sender
            .send(BridgeMessage::SchedulerCommand { timestamp: epoch_ms_now(), data: envelope })
            .is_err()
        {
            self.pending.lock().remove(&request_id);
            return Err(ControlError::DaemonNotConnected);
        }

        match tokio::time::timeout(Duration::from_millis(self.command_timeout_ms), rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(ControlError::DaemonNotConnected),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(ControlError::CommandTimeout)
            }
        }
    }
}

fn epoch_ms_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
