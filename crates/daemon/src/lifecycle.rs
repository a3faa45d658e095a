// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup, supervision, and graceful shutdown.

use crate::bridge::BridgeServer;
use crate::config::{ConfigError, DaemonConfig, Paths};
use crate::pidlock::{PidLock, PidLockError};
use drover_core::{Clock, SystemClock};
use drover_engine::{
    AgentScheduler, AgentSchedulerConfig, AutoApproveReview, ExecutionService, Scheduler,
    SchedulerConfig, SchedulerDeps,
};
use drover_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Lock(#[from] PidLockError),

    #[error("database open failed: {0}")]
    DbOpen(drover_store::StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("startup error: {0}")]
    Startup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleError::Lock(_) => 2,
            LifecycleError::DbOpen(_) => 3,
            _ => 1,
        }
    }
}

const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);
const MS_PER_DAY: u64 = 24 * 60 * 60 * 1_000;

/// Bring the daemon up and run until `shutdown` fires.
///
/// `exec` is the execution layer the scheduler drives; the daemon itself
/// is agnostic to what actually runs work items.
pub async fn run_daemon(
    paths: &Paths,
    config: DaemonConfig,
    exec: Arc<dyn ExecutionService>,
    shutdown: CancellationToken,
) -> Result<(), LifecycleError> {
    let clock = SystemClock;
    std::fs::create_dir_all(&paths.state_dir)?;

    // 1. The lock decides whether this daemon runs at all.
    let lock = PidLock::acquire(paths.lock_path.clone(), clock.epoch_ms())?;

    // 2. Open the database and apply migrations.
    let store = Arc::new(Store::open(&paths.db_path).map_err(LifecycleError::DbOpen)?);

    // 3. Build the scheduler and the agent dispatcher.
    let scheduler = Arc::new(Scheduler::new(
        SchedulerDeps {
            store: Arc::clone(&store),
            exec,
            review: Arc::new(AutoApproveReview),
        },
        clock.clone(),
        SchedulerConfig {
            tick_interval_ms: config.tick_interval_ms,
            lane_caps: config.lane_caps,
            cancel_grace_ms: config.cancel_grace_ms,
            ..SchedulerConfig::default()
        },
    ));
    let agents = Arc::new(AgentScheduler::new(
        Arc::clone(&store),
        Arc::clone(&scheduler),
        clock.clone(),
        AgentSchedulerConfig {
            poll_interval_ms: config.agent_poll_interval_ms,
            claim_ttl_ms: config.claim_ttl_ms(),
            ..AgentSchedulerConfig::default()
        },
    ));
    for def in &config.agents {
        if let Err(e) = agents.register(def.clone()) {
            tracing::error!(agent = %def.agent_id, error = %e, "agent registration failed");
        }
    }

    // 4. Recover surviving state before accepting any commands.
    scheduler
        .recover()
        .await
        .map_err(|e| LifecycleError::Startup(format!("recovery failed: {e}")))?;

    // 5. Serve.
    let bridge = Arc::new(BridgeServer::new(
        Arc::clone(&scheduler),
        paths.bridge_socket.clone(),
    ));
    let bridge_task = tokio::spawn(Arc::clone(&bridge).run(shutdown.child_token()));
    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run(shutdown.child_token()));
    let agents_task = tokio::spawn(Arc::clone(&agents).run(shutdown.child_token()));
    let prune_task = tokio::spawn(prune_loop(
        Arc::clone(&store),
        clock.clone(),
        config.audit_retention_days,
        config.goal_retention_days,
        shutdown.child_token(),
    ));

    tracing::info!(
        db = %paths.db_path.display(),
        agents = config.agents.len(),
        "daemon started"
    );

    shutdown.cancelled().await;
    tracing::info!("daemon shutting down");

    bridge_task.abort();
    scheduler_task.abort();
    agents_task.abort();
    prune_task.abort();
    let _ = std::fs::remove_file(&paths.bridge_socket);
    lock.release();
    Ok(())
}

/// Hourly retention sweep.
async fn prune_loop<C: Clock>(
    store: Arc<Store>,
    clock: C,
    audit_retention_days: u32,
    goal_retention_days: u32,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(PRUNE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {
                let now_ms = clock.epoch_ms();
                let audit_cutoff = now_ms.saturating_sub(audit_retention_days as u64 * MS_PER_DAY);
                let goal_cutoff = now_ms.saturating_sub(goal_retention_days as u64 * MS_PER_DAY);
                let result = store.with_tx(|tx| {
                    let audit = tx.prune_audit(audit_cutoff)?;
                    let goals = tx.prune_terminal_goals(goal_cutoff)?;
                    Ok::<_, drover_store::StoreError>((audit, goals))
                });
                match result {
                    Ok((audit, goals)) if audit > 0 || goals > 0 => {
                        tracing::info!(audit, goals, "retention sweep");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
                }
            }
        }
    }
}
