//! Interactive chat loop.
//!
//! stdin is read on a helper thread and handed over a channel, so the main
//! thread stays the only owner of the [`SessionClient`]: it alternates between
//! `poll` (bounded, so timers keep firing), rendering notices, and handling at
//! most one input line per turn.

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use tether_core::SessionClient;
use tracing::{debug, info};

use crate::error::{CliError, CliResult};
use crate::render::{connection_label, render};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

const HELP: &str = "\
Commands:
  /stop              stop the current reply
  /rollback N        drop message N and everything after it
  /new               start a new session
  /switch ID         switch to another session
  /sessions          list sessions
  /tools a,b         set active tools (reconnects)
  /confirm yes|no    answer an action preview
  /continue          resume after a recursion limit
  /history           reload history from the server
  /status            show connection and stream state
  /reconnect         reconnect now
  /quit              leave (an unfinished reply resumes next time)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Stop,
    Rollback(u64),
    New,
    Switch(String),
    Sessions,
    Tools(Vec<String>),
    Confirm(bool),
    Continue,
    History,
    Status,
    Reconnect,
    Help,
    Quit,
}

/// `Ok(None)` for a blank line; `Err` carries a usage hint.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "stop" => Command::Stop,
        "rollback" => {
            let index = arg
                .parse::<u64>()
                .map_err(|_| "usage: /rollback N".to_string())?;
            Command::Rollback(index)
        }
        "new" => Command::New,
        "switch" if !arg.is_empty() => Command::Switch(arg.to_string()),
        "switch" => return Err("usage: /switch SESSION_ID".to_string()),
        "sessions" => Command::Sessions,
        "tools" => Command::Tools(
            arg.split(',')
                .map(str::trim)
                .filter(|tool| !tool.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        "confirm" => match arg {
            "yes" | "y" => Command::Confirm(true),
            "no" | "n" => Command::Confirm(false),
            _ => return Err("usage: /confirm yes|no".to_string()),
        },
        "continue" => Command::Continue,
        "history" => Command::History,
        "status" => Command::Status,
        "reconnect" => Command::Reconnect,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command /{} (try /help)", other)),
    };
    Ok(Some(command))
}

pub fn run(mut client: SessionClient) -> CliResult<()> {
    let mut out = io::stdout();
    writeln!(
        out,
        "tether: user {} session {} (/help for commands)",
        client.user_id(),
        client.session_id()
    )?;

    client.open()?;
    let lines = spawn_stdin_reader();

    loop {
        client.poll(POLL_INTERVAL)?;
        flush_notices(&mut client, &mut out)?;

        match lines.try_recv() {
            Ok(line) => match parse_line(&line) {
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => {
                    if let Err(err) = execute(&mut client, command, &mut out) {
                        writeln!(out, "error: {}", err)?;
                    }
                }
                Ok(None) => {}
                Err(usage) => writeln!(out, "{}", usage)?,
            },
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                debug!("stdin closed");
                break;
            }
        }
    }

    client.close();
    flush_notices(&mut client, &mut out)?;
    info!(session_id = %client.session_id(), "Chat ended");
    Ok(())
}

fn execute(client: &mut SessionClient, command: Command, out: &mut impl Write) -> CliResult<()> {
    match command {
        Command::Say(text) => client.send_message(&text)?,
        Command::Stop => client.stop()?,
        Command::Rollback(index) => client.rollback_to(index)?,
        Command::New => {
            client.new_session()?;
        }
        Command::Switch(session_id) => client.switch_session(&session_id)?,
        Command::Sessions => {
            for session in client.list_sessions()? {
                let marker = if session.session_id == client.session_id() {
                    "*"
                } else {
                    " "
                };
                writeln!(
                    out,
                    "{} {}  {} messages  {}",
                    marker,
                    session.session_id,
                    session.message_count,
                    session.title.as_deref().unwrap_or("")
                )?;
            }
        }
        Command::Tools(tools) => client.set_active_tools(tools),
        Command::Confirm(confirm) => client.confirm_actions(confirm)?,
        Command::Continue => client.continue_turn()?,
        Command::History => {
            client.refresh_history()?;
            for entry in client.transcript().entries() {
                writeln!(out, "{:>4} {}: {}", entry.index, entry.role.as_str(), entry.content)?;
            }
        }
        Command::Status => {
            let snapshot = client.snapshot();
            writeln!(
                out,
                "{} | {} | {} messages | baseline {}{}",
                connection_label(&snapshot.connection),
                snapshot.phase.as_str(),
                snapshot.message_count,
                snapshot.rollback_baseline,
                if snapshot.recovering { " | recovering" } else { "" }
            )?;
        }
        Command::Reconnect => client.reconnect(),
        Command::Help => writeln!(out, "{}", HELP)?,
        Command::Quit => {}
    }
    Ok(())
}

fn flush_notices(client: &mut SessionClient, out: &mut impl Write) -> CliResult<()> {
    for notice in client.drain_notices() {
        if let Some(text) = render(&notice) {
            out.write_all(text.as_bytes())?;
        }
    }
    out.flush().map_err(CliError::from)
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(
            parse_line("  hello there "),
            Ok(Some(Command::Say("hello there".to_string())))
        );
        assert_eq!(parse_line("   "), Ok(None));
    }

    #[test]
    fn slash_commands_parse_arguments() {
        assert_eq!(parse_line("/rollback 3"), Ok(Some(Command::Rollback(3))));
        assert_eq!(
            parse_line("/tools todo, calendar ,"),
            Ok(Some(Command::Tools(vec![
                "todo".to_string(),
                "calendar".to_string()
            ])))
        );
        assert_eq!(parse_line("/confirm no"), Ok(Some(Command::Confirm(false))));
        assert_eq!(
            parse_line("/switch session_1_abc"),
            Ok(Some(Command::Switch("session_1_abc".to_string())))
        );
    }

    #[test]
    fn bad_arguments_yield_usage() {
        assert!(parse_line("/rollback three").is_err());
        assert!(parse_line("/confirm maybe").is_err());
        assert!(parse_line("/switch").is_err());
        assert!(parse_line("/bogus").is_err());
    }
}
