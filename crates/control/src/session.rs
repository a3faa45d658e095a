// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated client sessions and event fan-out.

use drover_core::{GoalId, SchedulerEvent, SessionId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

/// One grantable capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

/// A session's capability set. `admin` implies the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub admin: bool,
}

impl Permissions {
    pub fn admin() -> Self {
        Self { read: true, write: true, admin: true }
    }

    pub fn read_only() -> Self {
        Self { read: true, write: false, admin: false }
    }

    pub fn read_write() -> Self {
        Self { read: true, write: true, admin: false }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        if self.admin {
            return true;
        }
        match permission {
            Permission::Read => self.read,
            Permission::Write => self.write,
            Permission::Admin => false,
        }
    }
}

/// State of one connected client.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Client public identity (base64 key, or "local" when auth is off)
    pub identity: String,
    pub permissions: Permissions,
    pub connected_at_ms: u64,
    pub last_activity_ms: u64,
    pub subscriptions: HashSet<GoalId>,
}

struct Entry {
    session: Session,
    events: mpsc::UnboundedSender<SchedulerEvent>,
}

/// Registry of live sessions; owned by the control plane task.
#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<SessionId, Entry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session and return the receiver its connection drains
    /// subscribed events from.
    pub fn create(
        &self,
        identity: impl Into<String>,
        permissions: Permissions,
        now_ms: u64,
    ) -> (SessionId, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let id = SessionId::new();
        let (events, rx) = mpsc::unbounded_channel();
        let session = Session {
            id,
            identity: identity.into(),
            permissions,
            connected_at_ms: now_ms,
            last_activity_ms: now_ms,
            subscriptions: HashSet::new(),
        };
        self.entries.lock().insert(id, Entry { session, events });
        tracing::info!(session = %id, "session created");
        (id, rx)
    }

    pub fn remove(&self, id: &SessionId) {
        if self.entries.lock().remove(id).is_some() {
            tracing::info!(session = %id, "session destroyed");
        }
    }

    pub fn touch(&self, id: &SessionId, now_ms: u64) {
        if let Some(entry) = self.entries.lock().get_mut(id) {
            entry.session.last_activity_ms = now_ms;
        }
    }

    pub fn permissions(&self, id: &SessionId) -> Option<Permissions> {
        self.entries.lock().get(id).map(|e| e.session.permissions)
    }

    pub fn subscribe(&self, id: &SessionId, goal_id: GoalId) -> bool {
        match self.entries.lock().get_mut(id) {
            Some(entry) => {
                entry.session.subscriptions.insert(goal_id);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, id: &SessionId, goal_id: &GoalId) -> bool {
        match self.entries.lock().get_mut(id) {
            Some(entry) => entry.session.subscriptions.remove(goal_id),
            None => false,
        }
    }

    /// Deliver an event to every session subscribed to its goal.
    ///
    /// A session whose receiver is gone is dropped from the registry on
    /// the spot, so fan-out never accumulates dead subscribers.
    pub fn fan_out(&self, event: &SchedulerEvent) {
        let mut dead = Vec::new();
        {
            let entries = self.entries.lock();
            for (id, entry) in entries.iter() {
                if !entry.session.subscriptions.contains(&event.goal_id) {
                    continue;
                }
                if entry.events.send(event.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            self.remove(&id);
        }
    }

    /// Drop sessions idle beyond `timeout_ms`. Returns how many died.
    pub fn prune_idle(&self, now_ms: u64, timeout_ms: u64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now_ms.saturating_sub(e.session.last_activity_ms) <= timeout_ms);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
