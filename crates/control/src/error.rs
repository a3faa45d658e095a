// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("persistence fault: {0}")]
    Store(#[from] drover_store::StoreError),

    #[error(transparent)]
    Protocol(#[from] drover_wire::ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scheduler daemon is not connected")]
    DaemonNotConnected,

    #[error("scheduler command timed out")]
    CommandTimeout,

    #[error("authentication failed: {0}")]
    Auth(String),
}
