// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concurrency lanes: every work item executes in exactly one lane.

use crate::work_item::WorkItem;
use serde::{Deserialize, Serialize};

/// Concurrency bucket with a fixed cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Main,
    Subagent,
    Cron,
    Session,
}

crate::simple_display! {
    Lane {
        Main => "main",
        Subagent => "subagent",
        Cron => "cron",
        Session => "session",
    }
}

pub const ALL_LANES: [Lane; 4] = [Lane::Main, Lane::Subagent, Lane::Cron, Lane::Session];

impl Lane {
    /// Classify a work item by its context map.
    ///
    /// Order matters: cron origin wins over the child marker, which wins
    /// over the session marker.
    pub fn for_item(item: &WorkItem) -> Lane {
        if item.context_str("source") == Some("scheduler.cron") {
            return Lane::Cron;
        }
        if item.context_str("parent_item").is_some() {
            return Lane::Subagent;
        }
        if item.context_str("session_id").is_some() {
            return Lane::Session;
        }
        Lane::Main
    }
}

/// Per-lane maximum active work item counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneCaps {
    #[serde(default = "default_main")]
    pub main: usize,
    #[serde(default = "default_subagent")]
    pub subagent: usize,
    #[serde(default = "default_cron")]
    pub cron: usize,
    #[serde(default = "default_session")]
    pub session: usize,
}

fn default_main() -> usize {
    2
}
fn default_subagent() -> usize {
    4
}
fn default_cron() -> usize {
    2
}
fn default_session() -> usize {
    2
}

impl Default for LaneCaps {
    fn default() -> Self {
        Self {
            main: default_main(),
            subagent: default_subagent(),
            cron: default_cron(),
            session: default_session(),
        }
    }
}

impl LaneCaps {
    pub fn cap(&self, lane: Lane) -> usize {
        match lane {
            Lane::Main => self.main,
            Lane::Subagent => self.subagent,
            Lane::Cron => self.cron,
            Lane::Session => self.session,
        }
    }
}

#[cfg(test)]
#[path = "lane_tests.rs"]
mod tests;
