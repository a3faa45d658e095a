// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work-item manager: the single authority on the work-item state
//! machine and dependency semantics.

use crate::error::SchedulerError;
use drover_core::{
    Clock, GoalId, TransitionError, TransitionRecord, WorkItem, WorkItemId, WorkItemStatus,
    TRANSITION_HISTORY_CAP,
};
use drover_store::Tx;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

/// Owns transitions, ready selection, DAG validation, and the completion
/// check. Transition histories live in memory only.
pub struct WorkItemManager {
    history: Mutex<HashMap<WorkItemId, VecDeque<TransitionRecord>>>,
}

impl Default for WorkItemManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkItemManager {
    pub fn new() -> Self {
        Self { history: Mutex::new(HashMap::new()) }
    }

    /// Apply a status transition, enforcing the state machine.
    ///
    /// Persists through the given transaction and records a history entry.
    pub fn transition(
        &self,
        tx: &Tx<'_>,
        item: &WorkItem,
        to: WorkItemStatus,
        now_ms: u64,
        reason: Option<&str>,
    ) -> Result<(), SchedulerError> {
        if !item.status.can_transition_to(to) {
            return Err(TransitionError { item_id: item.id, from: item.status, to }.into());
        }
        tx.update_work_item_status(&item.id, to, now_ms)?;
        self.record(item.id, item.status, to, now_ms, reason);
        tracing::debug!(item = %item.id, from = %item.status, to = %to, "work item transition");
        Ok(())
    }

    /// Record a transition made outside the state machine (recovery).
    pub fn record(
        &self,
        item_id: WorkItemId,
        from: WorkItemStatus,
        to: WorkItemStatus,
        at_ms: u64,
        reason: Option<&str>,
    ) {
        let mut history = self.history.lock();
        let entries = history.entry(item_id).or_default();
        entries.push_back(TransitionRecord {
            from,
            to,
            at_ms,
            reason: reason.map(str::to_string),
        });
        while entries.len() > TRANSITION_HISTORY_CAP {
            entries.pop_front();
        }
    }

    /// Snapshot of an item's transition history.
    pub fn history(&self, item_id: &WorkItemId) -> Vec<TransitionRecord> {
        self.history
            .lock()
            .get(item_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop history for pruned items.
    pub fn forget(&self, item_id: &WorkItemId) {
        self.history.lock().remove(item_id);
    }

    /// Promote eligible queued items, then return the goal's ready items
    /// in dispatch order (priority desc, created asc, id asc).
    pub fn ready_items(
        &self,
        tx: &Tx<'_>,
        goal_id: &GoalId,
        clock: &impl Clock,
    ) -> Result<Vec<WorkItem>, SchedulerError> {
        let now_ms = clock.epoch_ms();
        let items = tx.list_work_items(goal_id)?;
        for item in &items {
            if item.status == WorkItemStatus::Queued {
                let promoted = tx.promote_if_deps_done(&item.id, now_ms)?;
                if promoted {
                    self.record(item.id, WorkItemStatus::Queued, WorkItemStatus::Ready, now_ms, None);
                }
            }
        }
        Ok(tx.list_ready_items(goal_id)?)
    }

    /// A goal is all-complete iff every work item is `done`.
    pub fn all_complete(items: &[WorkItem]) -> bool {
        items.iter().all(|i| i.status == WorkItemStatus::Done)
    }

    /// Validate a goal's dependency graph before admission.
    ///
    /// Every dependency must resolve to a sibling work item, and the graph
    /// must be acyclic. The returned error names either the unresolved
    /// edge or the vertex sequence of a detected cycle.
    pub fn validate_dag(items: &[WorkItem]) -> Result<(), SchedulerError> {
        let by_id: HashMap<&str, &WorkItem> =
            items.iter().map(|i| (i.id.as_str(), i)).collect();

        for item in items {
            for dep in &item.deps {
                if !by_id.contains_key(dep.as_str()) {
                    return Err(SchedulerError::DependencyViolation(format!(
                        "work item {} depends on unknown item {}",
                        item.id, dep
                    )));
                }
            }
        }

        // Depth-first traversal with gray/black coloring; a gray hit is a
        // back edge and therefore a cycle.
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            Gray,
            Black,
        }
        let mut colors: HashMap<&str, Color> = HashMap::new();
        let mut stack: Vec<&str> = Vec::new();

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a WorkItem>,
            colors: &mut HashMap<&'a str, Color>,
            stack: &mut Vec<&'a str>,
        ) -> Result<(), SchedulerError> {
            colors.insert(id, Color::Gray);
            stack.push(id);
            if let Some(item) = by_id.get(id) {
                for dep in &item.deps {
                    match colors.get(dep.as_str()) {
                        Some(Color::Black) => {}
                        Some(Color::Gray) => {
                            let from = stack
                                .iter()
                                .position(|v| *v == dep.as_str())
                                .unwrap_or(0);
                            let mut cycle: Vec<&str> = stack[from..].to_vec();
                            cycle.push(dep.as_str());
                            return Err(SchedulerError::DependencyViolation(format!(
                                "Cycle detected: {}",
                                cycle.join(" -> ")
                            )));
                        }
                        None => {
                            let dep_id = by_id
                                .get_key_value(dep.as_str())
                                .map(|(k, _)| *k)
                                .unwrap_or(dep.as_str());
                            visit(dep_id, by_id, colors, stack)?;
                        }
                    }
                }
            }
            stack.pop();
            colors.insert(id, Color::Black);
            Ok(())
        }

        for item in items {
            if !colors.contains_key(item.id.as_str()) {
                visit(item.id.as_str(), &by_id, &mut colors, &mut stack)?;
            }
        }

        Ok(())
    }

    /// Ids of items whose status keeps the goal active.
    pub fn live_items(items: &[WorkItem]) -> HashSet<WorkItemId> {
        items.iter().filter(|i| i.status.is_live()).map(|i| i.id).collect()
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
