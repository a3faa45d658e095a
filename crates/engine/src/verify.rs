// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Quality-gate verification.
//!
//! Deterministic gates run their command and judge by exit status; review
//! gates consult a [`ReviewService`]. Deterministic gates always run
//! first, and a failing one is final: review gates are not consulted at
//! all once a deterministic gate has failed, so a review pass can never
//! override a deterministic failure.

use async_trait::async_trait;
use drover_core::{Gate, GateKind, WorkItem};
use std::time::Duration;

/// Verdict from a review gate.
#[derive(Debug, Clone)]
pub struct ReviewVerdict {
    pub passed: bool,
    pub reason: Option<String>,
}

/// Answers review gates. The real implementation lives with the
/// execution layer; the scheduler only consumes verdicts.
#[async_trait]
pub trait ReviewService: Send + Sync + 'static {
    async fn review(&self, item: &WorkItem, gate: &Gate) -> ReviewVerdict;
}

/// Passes every review gate. Stands in until a reviewer integration is
/// wired; deterministic gates still decide on their own.
pub struct AutoApproveReview;

#[async_trait]
impl ReviewService for AutoApproveReview {
    async fn review(&self, _item: &WorkItem, _gate: &Gate) -> ReviewVerdict {
        ReviewVerdict { passed: true, reason: None }
    }
}

/// The gate that sank a work item, with its reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateFailure {
    pub gate: String,
    pub reason: String,
}

const GATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Run a work item's verification plan.
///
/// Returns `Ok(())` when every gate passes, `Err(GateFailure)` on the
/// first failing gate.
pub async fn run_gates(
    item: &WorkItem,
    review: &dyn ReviewService,
) -> Result<(), GateFailure> {
    let deterministic = item.verification.iter().filter(|g| g.kind == GateKind::Deterministic);
    for gate in deterministic {
        run_deterministic(gate).await?;
    }
    let reviews = item.verification.iter().filter(|g| g.kind == GateKind::Review);
    for gate in reviews {
        let verdict = review.review(item, gate).await;
        if !verdict.passed {
            return Err(GateFailure {
                gate: gate.name.clone(),
                reason: verdict.reason.unwrap_or_else(|| "review rejected".to_string()),
            });
        }
    }
    Ok(())
}

async fn run_deterministic(gate: &Gate) -> Result<(), GateFailure> {
    let Some(command) = gate.command.as_deref() else {
        return Err(GateFailure {
            gate: gate.name.clone(),
            reason: "deterministic gate has no command".to_string(),
        });
    };

    let output = tokio::time::timeout(
        GATE_TIMEOUT,
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match output {
        Err(_) => Err(GateFailure {
            gate: gate.name.clone(),
            reason: format!("timed out after {}s", GATE_TIMEOUT.as_secs()),
        }),
        Ok(Err(e)) => Err(GateFailure {
            gate: gate.name.clone(),
            reason: format!("failed to spawn: {e}"),
        }),
        Ok(Ok(out)) if out.status.success() => Ok(()),
        Ok(Ok(out)) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            Err(GateFailure {
                gate: gate.name.clone(),
                reason: if tail.is_empty() {
                    format!("exit status {}", out.status.code().unwrap_or(-1))
                } else {
                    tail
                },
            })
        }
    }
}

#[cfg(test)]
#[path = "verify_tests.rs"]
mod tests;
