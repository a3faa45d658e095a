// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_core::{Goal, RunId, WorkItem};
use tokio_util::sync::CancellationToken;

fn request(context: serde_json::Value) -> ExecRequest {
    let goal = Goal::builder().build();
    ExecRequest {
        item: WorkItem::builder().goal_id(goal.id).context(context).build(),
        goal,
        run_id: RunId::new(),
        cancel: CancellationToken::new(),
    }
}

#[tokio::test]
async fn successful_command_captures_output() {
    let outcome = ShellExecutionService
        .execute(request(serde_json::json!({"command": "echo hello"})))
        .await;
    let ExecOutcome::Success { metrics } = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert!(metrics.log.contains("hello"));
}

#[tokio::test]
async fn failing_command_reports_exit_status() {
    let outcome = ShellExecutionService
        .execute(request(serde_json::json!({"command": "exit 3"})))
        .await;
    let ExecOutcome::Failure { error, .. } = outcome else {
        panic!("expected failure");
    };
    assert!(error.contains("exit"));
}

#[tokio::test]
async fn missing_command_fails() {
    let outcome = ShellExecutionService.execute(request(serde_json::Value::Null)).await;
    assert!(matches!(outcome, ExecOutcome::Failure { .. }));
}

#[tokio::test]
async fn cancellation_interrupts_the_run() {
    let mut req = request(serde_json::json!({"command": "sleep 30"}));
    req.cancel = CancellationToken::new();
    let cancel = req.cancel.clone();
    let task = tokio::spawn(async move { ShellExecutionService.execute(req).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    cancel.cancel();
    let outcome = task.await.unwrap();
    let ExecOutcome::Failure { error, .. } = outcome else {
        panic!("expected failure");
    };
    assert_eq!(error, "cancelled");
}
