//! Wire types for the tether session channel and its REST collaborators.
//!
//! This crate is shared by the client core and any backend or test harness
//! that needs to speak the same protocol, to prevent schema drift. The backend
//! remains the authority on message indices; the client only validates what it
//! needs to stay consistent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames larger than this are rejected before JSON parsing.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024; // 1MB

/// Every inbound `type` the client understands. Anything else is logged and ignored.
pub const INBOUND_TYPES: &[&str] = &[
    "connected",
    "processing",
    "message",
    "response",
    "stream_start",
    "stream_chunk",
    "token",
    "stream_end",
    "tool_call",
    "tool_result",
    "finished",
    "action_preview",
    "action_executed",
    "error",
    "pong",
    "stopped",
    "recursion_limit",
    "status_response",
];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Channel: client → backend
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Message { content: String },
    Stop,
    ConfirmActions { confirm: bool },
    Continue,
    CheckStatus { session_id: String },
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Message { .. } => "message",
            OutboundMessage::Stop => "stop",
            OutboundMessage::ConfirmActions { .. } => "confirm_actions",
            OutboundMessage::Continue => "continue",
            OutboundMessage::CheckStatus { .. } => "check_status",
        }
    }

    pub fn to_frame(&self) -> Result<String, ErrorInfo> {
        serde_json::to_string(self).map_err(|err| {
            ErrorInfo::new(
                "serialization_error",
                format!("failed to serialize {}: {}", self.kind(), err),
            )
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Channel: backend → client
// ═══════════════════════════════════════════════════════════════════════════════

/// Reply to `check_status`. Idempotent on the backend side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub is_processing: bool,
    #[serde(default)]
    pub has_pending_messages: bool,
    #[serde(default)]
    pub last_message_role: Option<String>,
    #[serde(default)]
    pub should_sync_immediately: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Connected {
        #[serde(default)]
        message_count: Option<u64>,
    },
    Processing,
    #[serde(alias = "response")]
    Message {
        #[serde(default)]
        content: String,
        #[serde(default)]
        metadata: Option<Value>,
    },
    StreamStart,
    #[serde(alias = "token")]
    StreamChunk {
        #[serde(default)]
        content: String,
    },
    StreamEnd {
        #[serde(default)]
        metadata: Option<Value>,
    },
    ToolCall {
        name: String,
        #[serde(default)]
        args: Value,
    },
    ToolResult {
        name: String,
        #[serde(default)]
        result: Value,
    },
    Finished {
        #[serde(default)]
        message_count: Option<u64>,
        #[serde(default)]
        metadata: Option<Value>,
    },
    ActionPreview {
        #[serde(default)]
        actions: Vec<Value>,
    },
    ActionExecuted {
        #[serde(default)]
        results: Vec<Value>,
        #[serde(default)]
        refresh: Vec<String>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Pong,
    Stopped,
    RecursionLimit {
        #[serde(default)]
        message: String,
    },
    StatusResponse(StatusReport),
    /// Well-formed frame with a `type` this client does not know.
    #[serde(skip)]
    Unrecognized { kind: String },
}

impl InboundMessage {
    pub fn kind(&self) -> &str {
        match self {
            InboundMessage::Connected { .. } => "connected",
            InboundMessage::Processing => "processing",
            InboundMessage::Message { .. } => "message",
            InboundMessage::StreamStart => "stream_start",
            InboundMessage::StreamChunk { .. } => "stream_chunk",
            InboundMessage::StreamEnd { .. } => "stream_end",
            InboundMessage::ToolCall { .. } => "tool_call",
            InboundMessage::ToolResult { .. } => "tool_result",
            InboundMessage::Finished { .. } => "finished",
            InboundMessage::ActionPreview { .. } => "action_preview",
            InboundMessage::ActionExecuted { .. } => "action_executed",
            InboundMessage::Error { .. } => "error",
            InboundMessage::Pong => "pong",
            InboundMessage::Stopped => "stopped",
            InboundMessage::RecursionLimit { .. } => "recursion_limit",
            InboundMessage::StatusResponse(_) => "status_response",
            InboundMessage::Unrecognized { kind } => kind.as_str(),
        }
    }

    /// Signals after which no stream may be considered in flight.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InboundMessage::StreamEnd { .. }
                | InboundMessage::Finished { .. }
                | InboundMessage::Message { .. }
                | InboundMessage::Error { .. }
                | InboundMessage::Stopped
                | InboundMessage::RecursionLimit { .. }
        )
    }

    /// Server-reported message count, from the explicit field or from metadata.
    pub fn reported_message_count(&self) -> Option<u64> {
        match self {
            InboundMessage::Connected { message_count } => *message_count,
            InboundMessage::Finished {
                message_count,
                metadata,
            } => message_count.or_else(|| metadata_message_count(metadata.as_ref())),
            InboundMessage::StreamEnd { metadata } | InboundMessage::Message { metadata, .. } => {
                metadata_message_count(metadata.as_ref())
            }
            _ => None,
        }
    }
}

fn metadata_message_count(metadata: Option<&Value>) -> Option<u64> {
    metadata
        .and_then(|value| value.get("message_count"))
        .and_then(Value::as_u64)
}

/// Parses one channel frame.
///
/// Frames with an unknown `type` are returned as [`InboundMessage::Unrecognized`]
/// rather than an error so callers can log and move on.
pub fn parse_inbound(frame: &str) -> Result<InboundMessage, ErrorInfo> {
    if frame.len() > MAX_FRAME_BYTES {
        return Err(ErrorInfo::new(
            "frame_too_large",
            "frame exceeded maximum size",
        ));
    }
    if frame.trim().is_empty() {
        return Err(ErrorInfo::new("empty_frame", "frame body was empty"));
    }

    let value: Value = serde_json::from_str(frame)
        .map_err(|err| ErrorInfo::new("invalid_json", format!("frame was not valid JSON: {}", err)))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ErrorInfo::new("missing_type", "frame has no string `type` field"))?;

    if !INBOUND_TYPES.contains(&kind.as_str()) {
        return Ok(InboundMessage::Unrecognized { kind });
    }

    serde_json::from_value(value).map_err(|err| {
        ErrorInfo::new(
            "invalid_payload",
            format!("{} payload is invalid: {}", kind, err),
        )
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Connection parameters
// ═══════════════════════════════════════════════════════════════════════════════

/// Negotiated once per connection; changing either field requires a reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub session_id: String,
    pub active_tools: Vec<String>,
}

impl ConnectParams {
    pub fn channel_url(&self, base: &str) -> Result<String, ErrorInfo> {
        let mut url = url::Url::parse(base)
            .map_err(|err| ErrorInfo::new("invalid_url", format!("{}: {}", base, err)))?;
        url.query_pairs_mut()
            .append_pair("session_id", &self.session_id)
            .append_pair("active_tools", &self.active_tools.join(","));
        Ok(url.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REST collaborators
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
    #[serde(other)]
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
            Role::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    pub index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
}

impl HistoryMessage {
    /// An assistant turn with visible content and nothing left to execute.
    pub fn is_complete_assistant_turn(&self) -> bool {
        let has_content = self
            .content
            .as_deref()
            .map(|content| !content.trim().is_empty())
            .unwrap_or(false);
        let has_pending_tools = self
            .tool_calls
            .as_ref()
            .map(|calls| !calls.is_empty())
            .unwrap_or(false);
        self.role == Role::Assistant && has_content && !has_pending_tools
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
    #[serde(default)]
    pub total_messages: u64,
}

impl HistoryResponse {
    pub fn last_message(&self) -> Option<&HistoryMessage> {
        self.messages.iter().max_by_key(|message| message.index)
    }

    pub fn ends_with_complete_assistant_turn(&self) -> bool {
        self.last_message()
            .map(HistoryMessage::is_complete_assistant_turn)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub session_id: String,
    pub message_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResponse {
    pub success: bool,
    #[serde(default)]
    pub rolled_back_messages: u64,
    #[serde(default)]
    pub rolled_back_transactions: u64,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl SessionSummary {
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
            .as_deref()
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameSessionRequest {
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_messages_use_type_tag() {
        let frame = OutboundMessage::CheckStatus {
            session_id: "s1".to_string(),
        }
        .to_frame()
        .expect("serialize");
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "check_status", "session_id": "s1"}));

        let stop: Value = serde_json::from_str(&OutboundMessage::Stop.to_frame().unwrap()).unwrap();
        assert_eq!(stop, json!({"type": "stop"}));

        let cont: Value =
            serde_json::from_str(&OutboundMessage::Continue.to_frame().unwrap()).unwrap();
        assert_eq!(cont, json!({"type": "continue"}));
    }

    #[test]
    fn parses_aliases() {
        let token = parse_inbound(r#"{"type":"token","content":"Hi"}"#).unwrap();
        assert_eq!(
            token,
            InboundMessage::StreamChunk {
                content: "Hi".to_string()
            }
        );

        let response = parse_inbound(r#"{"type":"response","content":"Done"}"#).unwrap();
        assert!(matches!(response, InboundMessage::Message { ref content, .. } if content == "Done"));
    }

    #[test]
    fn unit_signals_tolerate_extra_fields() {
        let stopped = parse_inbound(r#"{"type":"stopped","reason":"user"}"#).unwrap();
        assert_eq!(stopped, InboundMessage::Stopped);
        let processing = parse_inbound(r#"{"type":"processing"}"#).unwrap();
        assert_eq!(processing, InboundMessage::Processing);
    }

    #[test]
    fn unknown_type_is_unrecognized_not_error() {
        let parsed = parse_inbound(r#"{"type":"telemetry","x":1}"#).unwrap();
        assert_eq!(
            parsed,
            InboundMessage::Unrecognized {
                kind: "telemetry".to_string()
            }
        );
        assert_eq!(parsed.kind(), "telemetry");
    }

    #[test]
    fn rejects_frames_without_type() {
        let err = parse_inbound(r#"{"content":"x"}"#).unwrap_err();
        assert_eq!(err.code, "missing_type");
        let err = parse_inbound("not json").unwrap_err();
        assert_eq!(err.code, "invalid_json");
        let err = parse_inbound("   ").unwrap_err();
        assert_eq!(err.code, "empty_frame");
    }

    #[test]
    fn status_response_defaults_missing_flags() {
        let parsed =
            parse_inbound(r#"{"type":"status_response","is_processing":true}"#).unwrap();
        assert_eq!(
            parsed,
            InboundMessage::StatusResponse(StatusReport {
                is_processing: true,
                has_pending_messages: false,
                last_message_role: None,
                should_sync_immediately: false,
            })
        );
    }

    #[test]
    fn reported_count_prefers_field_then_metadata() {
        let finished = parse_inbound(
            r#"{"type":"finished","message_count":6,"metadata":{"message_count":2}}"#,
        )
        .unwrap();
        assert_eq!(finished.reported_message_count(), Some(6));

        let end = parse_inbound(r#"{"type":"stream_end","metadata":{"message_count":4}}"#).unwrap();
        assert_eq!(end.reported_message_count(), Some(4));

        let bare = parse_inbound(r#"{"type":"stream_end"}"#).unwrap();
        assert_eq!(bare.reported_message_count(), None);
    }

    #[test]
    fn channel_url_carries_session_and_tools() {
        let params = ConnectParams {
            session_id: "session_1_abc".to_string(),
            active_tools: vec!["todo".to_string(), "calendar".to_string()],
        };
        let url = params.channel_url("ws://localhost:8000/ws/chat").unwrap();
        assert_eq!(
            url,
            "ws://localhost:8000/ws/chat?session_id=session_1_abc&active_tools=todo%2Ccalendar"
        );
        assert!(params.channel_url("not a url").is_err());
    }

    #[test]
    fn complete_assistant_turn_requires_content_and_no_tool_calls() {
        let history: HistoryResponse = serde_json::from_value(json!({
            "messages": [
                {"role": "user", "content": "hi", "index": 0},
                {"role": "assistant", "content": "hello", "index": 1}
            ],
            "total_messages": 2
        }))
        .unwrap();
        assert!(history.ends_with_complete_assistant_turn());

        let pending: HistoryResponse = serde_json::from_value(json!({
            "messages": [
                {"role": "user", "content": "hi", "index": 0},
                {"role": "assistant", "content": "", "index": 1, "tool_calls": [{"name": "todo"}]}
            ],
            "total_messages": 2
        }))
        .unwrap();
        assert!(!pending.ends_with_complete_assistant_turn());

        let user_last: HistoryResponse = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi", "index": 0}],
            "total_messages": 1
        }))
        .unwrap();
        assert!(!user_last.ends_with_complete_assistant_turn());
        assert!(!HistoryResponse::default().ends_with_complete_assistant_turn());
    }

    #[test]
    fn unknown_roles_and_task_statuses_degrade() {
        let message: HistoryMessage =
            serde_json::from_value(json!({"role": "function", "content": null, "index": 3}))
                .unwrap();
        assert_eq!(message.role, Role::Other);

        let status: TaskStatusResponse =
            serde_json::from_value(json!({"task_id": "t1", "status": "queued"})).unwrap();
        assert_eq!(status.status, TaskStatus::Unknown);
        assert!(!status.status.is_terminal());
    }

    #[test]
    fn session_summary_parses_updated_at() {
        let summary: SessionSummary = serde_json::from_value(json!({
            "session_id": "s1",
            "message_count": 4,
            "updated_at": "2026-01-30T12:00:00Z"
        }))
        .unwrap();
        assert!(summary.updated_at().is_some());
        assert_eq!(summary.title, None);
    }
}
