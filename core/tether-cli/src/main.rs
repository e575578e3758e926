//! tether: terminal client for conversational agent sessions.
//!
//! Keeps one conversation consistent across restarts, dropped connections
//! and rollbacks. State lives in `~/.tether/state.json`, configuration in
//! `~/.tether/config.toml`, logs in `~/.tether/logs/`.
//!
//! ## Subcommands
//!
//! - `chat`: interactive session (default)
//! - `status`: current session, stream and baseline
//! - `sessions`, `switch`, `rename`, `delete`: session management
//! - `rollback --to N`: truncate history at message N
//! - `tasks`: quick-action tasks still awaiting a result

mod chat;
mod commands;
mod error;
mod http;
mod logging;
mod render;
mod ws;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tether_core::StorageConfig;

use crate::commands::Context;
use crate::error::CliResult;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Resilient client for conversational agent sessions")]
#[command(version)]
struct Cli {
    /// Config file (default: $TETHER_CONFIG or ~/.tether/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Act as this user instead of the configured one
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat in the current session
    Chat,

    /// Show the current session and stream state
    Status,

    /// List sessions, most recently updated first
    Sessions,

    /// Make another session current
    Switch {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,
    },

    /// Remove message N and everything after it
    Rollback {
        #[arg(long = "to", value_name = "N")]
        message_index: u64,
    },

    /// Set a session's title
    Rename {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,

        #[arg(value_name = "TITLE")]
        title: String,
    },

    /// Delete a session (the current one is replaced by a fresh session)
    Delete {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,
    },

    /// Quick-action tasks awaiting a result
    Tasks {
        #[command(subcommand)]
        command: TaskCommands,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Remember a task started elsewhere
    Track {
        #[arg(value_name = "TASK_ID")]
        task_id: String,

        #[arg(value_name = "TEXT")]
        text: String,
    },

    /// List tasks that have not expired
    List,

    /// Poll the backend and drop tasks that finished
    Reconcile,
}

fn main() {
    let cli = Cli::parse();

    let storage = match StorageConfig::from_home() {
        Ok(storage) => storage,
        Err(err) => {
            eprintln!("tether: {}", err);
            std::process::exit(1);
        }
    };
    let _logging_guard = logging::init(&storage);

    if let Err(err) = run(cli, storage) {
        tracing::error!(error = %err, "tether failed");
        eprintln!("tether: {}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli, storage: StorageConfig) -> CliResult<()> {
    let context = Context::load(storage, cli.config.as_deref(), cli.user)?;

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => chat::run(context.client()?),
        Commands::Status => commands::status(&context),
        Commands::Sessions => commands::sessions(&context),
        Commands::Switch { session_id } => commands::switch(&context, &session_id),
        Commands::Rollback { message_index } => commands::rollback(&context, message_index),
        Commands::Rename { session_id, title } => commands::rename(&context, &session_id, &title),
        Commands::Delete { session_id } => commands::delete(&context, &session_id),
        Commands::Tasks { command } => match command {
            TaskCommands::Track { task_id, text } => {
                commands::track_task(&context, &task_id, &text)
            }
            TaskCommands::List => commands::list_tasks(&context),
            TaskCommands::Reconcile => commands::reconcile_tasks(&context),
        },
    }
}
