// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds carried through the scheduling core.

use drover_core::TransitionError;
use drover_store::{MaybeBusy, StoreError};
use thiserror::Error;

/// Errors surfaced by the scheduler, manager, and agent scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// I/O or constraint error from the store; aborts the enclosing tick.
    #[error("persistence fault: {0}")]
    Store(#[from] StoreError),

    /// Logic error; fatal to the current operation, never retried.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// Missing or cyclic dependency found at goal admission.
    #[error("dependency violation: {0}")]
    DependencyViolation(String),

    #[error("goal not found: {0}")]
    GoalNotFound(String),

    #[error("goal already cancelled: {0}")]
    GoalAlreadyCancelled(String),

    /// The goal's status does not admit the requested operation.
    #[error("invalid goal state: {0}")]
    InvalidGoalState(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl MaybeBusy for SchedulerError {
    fn is_busy(&self) -> bool {
        matches!(self, SchedulerError::Store(e) if e.is_busy())
    }
}
