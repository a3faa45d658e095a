// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol between the control plane, the execution daemon, and clients.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod bridge;
mod frame;
mod rpc;

pub use bridge::{BridgeMessage, CommandEnvelope, CommandResult, HelloData, SchedulerCommand};
pub use frame::{decode, encode, read_frame, write_frame, ProtocolError, MAX_FRAME_LEN};
pub use rpc::{ErrorCode, RpcError, RpcRequest, RpcResponse, ServerFrame};

#[cfg(test)]
mod property_tests;
