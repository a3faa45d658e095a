// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-control: the control plane.
//!
//! Accepts client connections over a local socket, authenticates them
//! into permissioned sessions, records goals through the store, forwards
//! scheduler commands to the execution daemon over the bridge, and fans
//! scheduler events out to subscribed sessions.

pub mod auth;
pub mod bridge;
pub mod error;
pub mod rpc;
pub mod server;
pub mod session;

pub use auth::AuthService;
pub use bridge::BridgeClient;
pub use error::ControlError;
pub use rpc::RpcContext;
pub use server::{ControlServer, ControlServerConfig};
pub use session::{Permission, Permissions, SessionRegistry};
