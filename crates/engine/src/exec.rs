// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boundary to the execution layer.
//!
//! The scheduler hands a work item to an [`ExecutionService`] and gets a
//! run outcome back; everything about transports, models, and prompts
//! lives behind this trait.

use async_trait::async_trait;
use drover_core::{Goal, RunId, WorkItem};
use drover_store::RunMetrics;
use tokio_util::sync::CancellationToken;

/// One execution assignment.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub goal: Goal,
    pub item: WorkItem,
    pub run_id: RunId,
    /// Cancelled when the owning goal is cancelled; executors are expected
    /// to unwind and report within the grace period.
    pub cancel: CancellationToken,
}

/// What came back from executing a work item.
#[derive(Debug, Clone)]
pub enum ExecOutcome {
    Success { metrics: RunMetrics },
    Failure { error: String, metrics: RunMetrics },
}

impl ExecOutcome {
    pub fn metrics(&self) -> &RunMetrics {
        match self {
            ExecOutcome::Success { metrics } | ExecOutcome::Failure { metrics, .. } => metrics,
        }
    }
}

/// Executes work items. Implementations must not panic on execution
/// faults; report them as [`ExecOutcome::Failure`] instead.
#[async_trait]
pub trait ExecutionService: Send + Sync + 'static {
    async fn execute(&self, req: ExecRequest) -> ExecOutcome;
}

/// Scripted execution stub for tests.
///
/// Responds per work-item title when scripted, otherwise with the default
/// outcome. Records every request it saw.
#[cfg(any(test, feature = "test-support"))]
pub struct StubExecutionService {
    default: parking_lot::Mutex<ExecOutcome>,
    scripted: parking_lot::Mutex<std::collections::HashMap<String, Vec<ExecOutcome>>>,
    pub seen: parking_lot::Mutex<Vec<ExecRequest>>,
    /// When set, executions block until the request's cancel token fires,
    /// then report failure (exercises the cancellation path).
    pub hang_until_cancelled: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-support"))]
impl StubExecutionService {
    pub fn success_with(tokens: u64) -> Self {
        Self::new(ExecOutcome::Success {
            metrics: RunMetrics { tokens_used: tokens, ..RunMetrics::default() },
        })
    }

    pub fn new(default: ExecOutcome) -> Self {
        Self {
            default: parking_lot::Mutex::new(default),
            scripted: parking_lot::Mutex::new(std::collections::HashMap::new()),
            seen: parking_lot::Mutex::new(Vec::new()),
            hang_until_cancelled: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Queue an outcome for the next execution of the item with `title`.
    pub fn script(&self, title: &str, outcome: ExecOutcome) {
        self.scripted.lock().entry(title.to_string()).or_default().push(outcome);
    }

    pub fn executed_titles(&self) -> Vec<String> {
        self.seen.lock().iter().map(|r| r.item.title.clone()).collect()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl ExecutionService for StubExecutionService {
    async fn execute(&self, req: ExecRequest) -> ExecOutcome {
        self.seen.lock().push(req.clone());
        if self.hang_until_cancelled.load(std::sync::atomic::Ordering::SeqCst) {
            req.cancel.cancelled().await;
            return ExecOutcome::Failure {
                error: "cancelled".to_string(),
                metrics: RunMetrics::default(),
            };
        }
        let scripted = {
            let mut scripted = self.scripted.lock();
            match scripted.get_mut(&req.item.title) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        };
        scripted.unwrap_or_else(|| self.default.lock().clone())
    }
}
