// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `droverd`: the execution daemon.

use clap::Parser;
use drover_daemon::{run_daemon, DaemonConfig, Paths, ShellExecutionService};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "droverd", about = "Drover execution daemon", version)]
struct Args {
    /// State directory (lock, sockets, database, logs)
    #[arg(long, env = "DROVER_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Database file path
    #[arg(long, env = "DROVER_DB_PATH")]
    db: Option<PathBuf>,

    /// Configuration file (defaults to config.toml in the state dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log to stderr instead of the state-dir log file
    #[arg(long)]
    stderr_log: bool,
}

fn init_tracing(
    log_dir: &std::path::Path,
    stderr_log: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if stderr_log {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        None
    } else {
        let appender = tracing_appender::rolling::daily(log_dir, "droverd.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).with_ansi(false).init();
        Some(guard)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let paths = Paths::resolve(args.state_dir, args.db);

    if let Err(e) = std::fs::create_dir_all(&paths.log_dir) {
        eprintln!("droverd: cannot create {}: {e}", paths.log_dir.display());
        std::process::exit(1);
    }
    let _log_guard = init_tracing(&paths.log_dir, args.stderr_log);

    let config_path = args.config.unwrap_or_else(|| paths.config_file.clone());
    let config = match DaemonConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("droverd: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
                shutdown.cancel();
            }
        });
    }

    match run_daemon(&paths, config, Arc::new(ShellExecutionService), shutdown).await {
        Ok(()) => {}
        Err(e) => {
            tracing::error!(error = %e, "daemon failed");
            eprintln!("droverd: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
