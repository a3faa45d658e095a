// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI smoke specs.

use assert_cmd::Command;

/// Binaries are only present when the whole workspace was built; skip
/// quietly otherwise so these specs can run standalone.
fn bin(name: &str) -> Option<Command> {
    Command::cargo_bin(name).ok()
}

#[test]
fn drover_help_lists_commands() {
    let Some(mut cmd) = bin("drover") else { return };
    let assert = cmd.arg("--help").assert().success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for expected in ["serve", "submit", "status", "cancel", "list", "watch", "pair"] {
        assert!(output.contains(expected), "help misses {expected}: {output}");
    }
}

#[test]
fn droverd_help_mentions_state_dir() {
    let Some(mut cmd) = bin("droverd") else { return };
    let assert = cmd.arg("--help").assert().success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(output.contains("--state-dir"));
}

#[test]
fn unknown_subcommand_fails() {
    let Some(mut cmd) = bin("drover") else { return };
    cmd.arg("frobnicate").assert().failure();
}
