//! User-visible notices emitted by the session client.
//!
//! The core never renders anything. Whatever a UI would show (streamed text,
//! the reconnecting indicator, tool activity, rollback results) is queued as a
//! [`ClientNotice`] and drained by the renderer.

use serde::Serialize;
use serde_json::Value;

use crate::connection::ConnectionStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum ClientNotice {
    Connection {
        status: ConnectionStatus,
    },
    Processing,
    StreamStarted {
        synthesized: bool,
    },
    StreamDelta {
        content: String,
    },
    /// A partial response rebuilt from durable state after a restart.
    StreamResumed {
        buffer: String,
    },
    StreamFinished {
        content: String,
    },
    AssistantMessage {
        content: String,
    },
    /// The stream was force-terminated and history is being resynced.
    StreamSynced,
    ToolCall {
        name: String,
        args: Value,
    },
    ToolResult {
        name: String,
        result: Value,
    },
    ActionPreview {
        actions: Vec<Value>,
    },
    ActionsExecuted {
        results: Vec<Value>,
        refresh: Vec<String>,
    },
    RecursionLimit {
        message: String,
    },
    BackendError {
        message: String,
    },
    Stopped,
    HistoryLoaded {
        total_messages: u64,
    },
    /// History could not be fetched; the transcript may be behind the server.
    HistoryUnavailable {
        reason: String,
    },
    RolledBack {
        message_index: u64,
        rolled_back_messages: u64,
        rolled_back_transactions: u64,
    },
    SessionChanged {
        session_id: String,
    },
    TaskCompleted {
        task_id: String,
        result: Option<Value>,
    },
    TaskFailed {
        task_id: String,
        error: Option<String>,
    },
}
