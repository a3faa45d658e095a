// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `drover`: client CLI and control-plane server for the Drover
//! orchestration platform.

mod client;
mod serve;

use anyhow::Context;
use clap::{Parser, Subcommand};
use client::Client;
use drover_daemon::{DaemonConfig, Paths};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "drover", about = "Autonomous-agent orchestration", version)]
struct Args {
    /// State directory (shared with droverd)
    #[arg(long, env = "DROVER_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    /// Client key file (default: client_key.json in the state dir)
    #[arg(long, global = true)]
    key: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the control plane in the foreground
    Serve,

    /// Submit a goal
    Submit {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Token budget
        #[arg(long)]
        budget_tokens: Option<u64>,
        /// Work item titles; without any, the goal gets one item
        #[arg(long = "item")]
        items: Vec<String>,
        /// Make each item depend on the previous one
        #[arg(long)]
        chain: bool,
    },

    /// Show a goal and its work items
    Status { goal_id: String },

    /// Cancel a goal
    Cancel {
        goal_id: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// List goals
    List {
        #[arg(long)]
        status: Option<String>,
    },

    /// Stream a goal's events until it reaches a terminal state
    Watch { goal_id: String },

    /// Mint a pairing token (operator side, writes the credentials file)
    PairToken {
        /// Grant read-only instead of read/write
        #[arg(long)]
        read_only: bool,
        /// Grant admin
        #[arg(long)]
        admin: bool,
    },

    /// Pair this client's key using a token
    Pair { token: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let paths = Paths::resolve(args.state_dir, None);
    let key_path = args.key.unwrap_or_else(|| paths.state_dir.join("client_key.json"));

    match args.command {
        Command::Serve => {
            let config = DaemonConfig::load(&paths.config_file)?;
            serve::run(&paths, &config).await
        }
        Command::Submit { title, description, priority, budget_tokens, items, chain } => {
            let work_items: Vec<serde_json::Value> = items
                .iter()
                .enumerate()
                .map(|(idx, item_title)| {
                    let deps: Vec<usize> =
                        if chain && idx > 0 { vec![idx - 1] } else { Vec::new() };
                    serde_json::json!({ "title": item_title, "deps": deps })
                })
                .collect();
            let mut params = serde_json::json!({
                "title": title,
                "description": description,
                "priority": priority,
                "work_items": work_items,
            });
            if let Some(tokens) = budget_tokens {
                params["budgets"] = serde_json::json!({ "tokens": tokens });
            }

            let mut client = Client::connect(&paths.control_socket, &key_path).await?;
            let result = client.call("goal.submit", params).await?;
            let goal_id = result["goal"]["id"].as_str().unwrap_or("?");
            println!("goal {goal_id} submitted");
            if result["scheduler"]["submitted"] != serde_json::Value::Bool(true) {
                let message = result["scheduler"]["message"].as_str().unwrap_or("unknown");
                eprintln!("warning: not scheduled yet: {message}");
            }
            Ok(())
        }
        Command::Status { goal_id } => {
            let mut client = Client::connect(&paths.control_socket, &key_path).await?;
            let result =
                client.call("goal.status", serde_json::json!({ "goalId": goal_id })).await?;
            let goal = &result["goal"];
            println!(
                "{} [{}] {}",
                goal["id"].as_str().unwrap_or("?"),
                goal["status"].as_str().unwrap_or("?"),
                goal["title"].as_str().unwrap_or(""),
            );
            println!(
                "  spent: {} tokens, {:.1} min, ${:.4}",
                goal["spent"]["tokens"],
                goal["spent"]["wall_minutes"].as_f64().unwrap_or(0.0),
                goal["spent"]["cost"].as_f64().unwrap_or(0.0),
            );
            for item in result["work_items"].as_array().into_iter().flatten() {
                println!(
                    "  - {} [{}] {}",
                    item["id"].as_str().unwrap_or("?"),
                    item["status"].as_str().unwrap_or("?"),
                    item["title"].as_str().unwrap_or(""),
                );
            }
            Ok(())
        }
        Command::Cancel { goal_id, reason } => {
            let mut client = Client::connect(&paths.control_socket, &key_path).await?;
            client
                .call(
                    "goal.cancel",
                    serde_json::json!({ "goalId": goal_id, "reason": reason }),
                )
                .await?;
            println!("goal {goal_id} cancelled");
            Ok(())
        }
        Command::List { status } => {
            let mut client = Client::connect(&paths.control_socket, &key_path).await?;
            let mut params = serde_json::json!({});
            if let Some(status) = status {
                params["status"] = serde_json::Value::String(status);
            }
            let result = client.call("goal.list", params).await?;
            for goal in result["goals"].as_array().into_iter().flatten() {
                println!(
                    "{} [{}] {}",
                    goal["id"].as_str().unwrap_or("?"),
                    goal["status"].as_str().unwrap_or("?"),
                    goal["title"].as_str().unwrap_or(""),
                );
            }
            Ok(())
        }
        Command::Watch { goal_id } => {
            let mut client = Client::connect(&paths.control_socket, &key_path).await?;
            client.call("goal.subscribe", serde_json::json!({ "goalId": goal_id })).await?;
            println!("watching {goal_id} (ctrl-c to stop)");
            client
                .watch_events(|event| {
                    println!("{} {}", event.at_ms, event.kind);
                    !matches!(
                        event.kind,
                        drover_core::EventKind::GoalCompleted
                            | drover_core::EventKind::GoalFailed
                            | drover_core::EventKind::GoalCancelled
                    )
                })
                .await
        }
        Command::PairToken { read_only, admin } => {
            use drover_control::{AuthService, Permissions};
            let auth = AuthService::open(paths.credentials.clone()).context("open credentials")?;
            let permissions = if admin {
                Permissions::admin()
            } else if read_only {
                Permissions::read_only()
            } else {
                Permissions::read_write()
            };
            let now_ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            let token = auth.issue_pairing_token(permissions, now_ms)?;
            println!("{token}");
            Ok(())
        }
        Command::Pair { token } => {
            let key = client::load_or_create_key(&key_path)?;
            let mut client = Client::connect_raw(&paths.control_socket).await?;
            client
                .call(
                    "pair",
                    serde_json::json!({
                        "token": token,
                        "publicKey": client::public_key_b64(&key),
                    }),
                )
                .await?;
            println!("paired");
            Ok(())
        }
    }
}
