//! Turns client notices into terminal text.
//!
//! Stream deltas are written inline with no newline so the reply grows in
//! place; everything else is a complete line.

use tether_core::{ClientNotice, ConnectionStatus};

pub fn render(notice: &ClientNotice) -> Option<String> {
    let text = match notice {
        ClientNotice::Connection { status } => format!("[{}]\n", connection_label(status)),
        ClientNotice::Processing => "[thinking...]\n".to_string(),
        ClientNotice::StreamStarted { .. } => "assistant: ".to_string(),
        ClientNotice::StreamDelta { content } => content.clone(),
        ClientNotice::StreamResumed { buffer } => format!("[resumed]\nassistant: {}", buffer),
        ClientNotice::StreamFinished { .. } => "\n".to_string(),
        ClientNotice::AssistantMessage { content } => format!("assistant: {}\n", content),
        ClientNotice::StreamSynced => "\n[synced]\n".to_string(),
        ClientNotice::ToolCall { name, args } => format!("[tool {} {}]\n", name, args),
        ClientNotice::ToolResult { name, .. } => format!("[tool {} done]\n", name),
        ClientNotice::ActionPreview { actions } => {
            let mut text = format!("[{} action(s) proposed]\n", actions.len());
            for (position, action) in actions.iter().enumerate() {
                text.push_str(&format!("  {}. {}\n", position + 1, action));
            }
            text.push_str("Confirm with /confirm yes or /confirm no\n");
            text
        }
        ClientNotice::ActionsExecuted { results, .. } => {
            format!("[{} action(s) executed]\n", results.len())
        }
        ClientNotice::RecursionLimit { message } => {
            format!("[paused: {}] Use /continue to keep going\n", message)
        }
        ClientNotice::BackendError { message } => format!("error: {}\n", message),
        ClientNotice::Stopped => "\n[stopped]\n".to_string(),
        ClientNotice::HistoryLoaded { total_messages } => {
            format!("[history: {} messages]\n", total_messages)
        }
        ClientNotice::HistoryUnavailable { reason } => {
            format!("[history unavailable: {}]\n", reason)
        }
        ClientNotice::RolledBack {
            message_index,
            rolled_back_messages,
            rolled_back_transactions,
        } => format!(
            "[rolled back to message {}: {} messages, {} transactions undone]\n",
            message_index, rolled_back_messages, rolled_back_transactions
        ),
        ClientNotice::SessionChanged { session_id } => format!("[session {}]\n", session_id),
        ClientNotice::TaskCompleted { task_id, .. } => format!("[task {} completed]\n", task_id),
        ClientNotice::TaskFailed { task_id, error } => format!(
            "[task {} failed: {}]\n",
            task_id,
            error.as_deref().unwrap_or("unknown error")
        ),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn connection_label(status: &ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Disconnected => "disconnected".to_string(),
        ConnectionStatus::Connecting => "connecting".to_string(),
        ConnectionStatus::Connected => "connected".to_string(),
        ConnectionStatus::Reconnecting { attempt } => format!("reconnecting (attempt {})", attempt),
        ConnectionStatus::Exhausted => "disconnected; use /reconnect".to_string(),
    }
}
