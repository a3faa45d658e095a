// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell-command execution backend.
//!
//! Runs the command named in a work item's context. Items without a
//! command fail their run; richer backends (model-driven agents) plug in
//! behind the same trait.

use async_trait::async_trait;
use drover_engine::{ExecOutcome, ExecRequest, ExecutionService};
use drover_store::RunMetrics;
use std::time::Instant;

pub struct ShellExecutionService;

const LOG_TAIL_BYTES: usize = 8 * 1024;

#[async_trait]
impl ExecutionService for ShellExecutionService {
    async fn execute(&self, req: ExecRequest) -> ExecOutcome {
        let Some(command) = req.item.context_str("command").map(str::to_string) else {
            return ExecOutcome::Failure {
                error: format!("work item {} has no command to execute", req.item.id),
                metrics: RunMetrics::default(),
            };
        };

        let started = Instant::now();
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            output = child => output,
            _ = req.cancel.cancelled() => {
                return ExecOutcome::Failure {
                    error: "cancelled".to_string(),
                    metrics: RunMetrics {
                        wall_ms: started.elapsed().as_millis() as u64,
                        ..RunMetrics::default()
                    },
                };
            }
        };

        let wall_ms = started.elapsed().as_millis() as u64;
        match output {
            Ok(output) => {
                let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
                log.push_str(&String::from_utf8_lossy(&output.stderr));
                if log.len() > LOG_TAIL_BYTES {
                    log = log[log.len() - LOG_TAIL_BYTES..].to_string();
                }
                let metrics = RunMetrics { wall_ms, log, ..RunMetrics::default() };
                if output.status.success() {
                    ExecOutcome::Success { metrics }
                } else {
                    ExecOutcome::Failure {
                        error: format!("command exited with {}", output.status),
                        metrics,
                    }
                }
            }
            Err(e) => ExecOutcome::Failure {
                error: format!("spawn failed: {e}"),
                metrics: RunMetrics { wall_ms, ..RunMetrics::default() },
            },
        }
    }
}

#[cfg(test)]
#[path = "exec_shell_tests.rs"]
mod tests;
