//! One-shot subcommands. Each builds a client from config and exits; none of
//! them open the session channel.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tether_core::durable::load_json;
use tether_core::stream::StreamRecord;
use tether_core::{
    load_client_config, ClientConfig, ClientNotice, ClientOptions, DurableStore, FileStore,
    PendingTasks, SessionClient, StorageConfig, StoreKey, SystemClock,
};
use tracing::info;

use crate::error::{CliError, CliResult};
use crate::http::HttpApi;
use crate::render::render;
use crate::ws::WsTransport;

/// Resolved configuration plus where state lives.
pub struct Context {
    pub config: ClientConfig,
    pub storage: StorageConfig,
}

impl Context {
    pub fn load(
        storage: StorageConfig,
        config_path: Option<&Path>,
        user: Option<String>,
    ) -> CliResult<Self> {
        let mut config = load_client_config(config_path)?;
        if let Some(user) = user {
            config.user_id = user;
        }
        if config.user_id.trim().is_empty() {
            return Err(CliError::Usage("user_id must not be empty".to_string()));
        }
        Ok(Self { config, storage })
    }

    pub fn store(&self) -> Arc<dyn DurableStore> {
        Arc::new(FileStore::new(&self.storage.state_file()))
    }

    pub fn api(&self) -> CliResult<HttpApi> {
        Ok(HttpApi::new(&self.config.server)?)
    }

    pub fn client(&self) -> CliResult<SessionClient> {
        let client = SessionClient::new(
            ClientOptions::from_config(&self.config),
            Box::new(WsTransport::new(&self.config.server.channel_url)),
            Box::new(self.api()?),
            self.store(),
            Box::new(SystemClock),
        )?;
        Ok(client)
    }

    fn pending_tasks(&self) -> PendingTasks {
        PendingTasks::new(self.store(), &self.config.user_id, self.config.tasks.ttl())
    }
}

pub fn status(context: &Context) -> CliResult<()> {
    let mut client = context.client()?;
    // A history failure is reported in the snapshot's counts, not as an error.
    let _ = client.refresh_history();
    print_notices(&mut client);

    let snapshot = serde_json::to_string_pretty(&client.snapshot())
        .map_err(|err| CliError::Usage(format!("rendering status: {}", err)))?;
    println!("{}", snapshot);

    let key = StoreKey::stream_state(client.user_id(), client.session_id());
    let store = context.store();
    match load_json::<StreamRecord>(store.as_ref(), &key)? {
        Some(record) if record.active => println!(
            "interrupted reply on disk ({} chars, {}s old)",
            record.buffer.chars().count(),
            record.age(Utc::now()).num_seconds()
        ),
        _ => {}
    }
    Ok(())
}

pub fn sessions(context: &Context) -> CliResult<()> {
    let client = context.client()?;
    for session in client.list_sessions()? {
        let marker = if session.session_id == client.session_id() {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}  {:>4} messages  {}  {}",
            marker,
            session.session_id,
            session.message_count,
            session.updated_at.as_deref().unwrap_or("-"),
            session.title.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub fn rollback(context: &Context, message_index: u64) -> CliResult<()> {
    let mut client = context.client()?;
    client.refresh_history()?;
    client.rollback_to(message_index)?;
    print_notices(&mut client);
    Ok(())
}

pub fn switch(context: &Context, session_id: &str) -> CliResult<()> {
    let mut client = context.client()?;
    client.switch_session(session_id)?;
    client.close();
    println!("current session: {}", client.session_id());
    Ok(())
}

pub fn rename(context: &Context, session_id: &str, title: &str) -> CliResult<()> {
    let mut client = context.client()?;
    client.rename_session(session_id, title)?;
    println!("renamed {}", session_id);
    Ok(())
}

pub fn delete(context: &Context, session_id: &str) -> CliResult<()> {
    let mut client = context.client()?;
    client.delete_session(session_id)?;
    client.close();
    println!("deleted {}; current session: {}", session_id, client.session_id());
    Ok(())
}

pub fn track_task(context: &Context, task_id: &str, text: &str) -> CliResult<()> {
    context.pending_tasks().add(task_id, text, Utc::now())?;
    info!(task_id = %task_id, "Tracking quick-action task");
    Ok(())
}

pub fn list_tasks(context: &Context) -> CliResult<()> {
    let now = Utc::now();
    for task in context.pending_tasks().live(now)? {
        let age_mins = (now.timestamp_millis() - task.timestamp) / 60_000;
        println!("{}  {}  ({}m ago)", task.task_id, task.text, age_mins);
    }
    Ok(())
}

pub fn reconcile_tasks(context: &Context) -> CliResult<()> {
    let api = context.api()?;
    let notices = context.pending_tasks().reconcile(&api, Utc::now())?;
    if notices.is_empty() {
        println!("no tasks finished");
    }
    for notice in &notices {
        print_notice(notice);
    }
    Ok(())
}

fn print_notices(client: &mut SessionClient) {
    for notice in client.drain_notices() {
        print_notice(&notice);
    }
}

fn print_notice(notice: &ClientNotice) {
    if let Some(text) = render(notice) {
        print!("{}", text);
    }
}
