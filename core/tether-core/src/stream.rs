//! Stream state machine.
//!
//! `reduce` is a pure function from the current [`StreamState`] and one
//! [`StreamEvent`] to a [`Transition`]. It never touches storage or timers;
//! the client applies `persist` to the durable store and cancels stream timers
//! when `terminal` is set.
//!
//! ```text
//! Idle ──send──▶ Processing ──stream_start / chunk──▶ Streaming
//!   ▲                 │                                    │
//!   └──── stream_end / finished / message / error / stop ──┘
//! ```
//!
//! Terminal signals arriving in `Idle` are absorbed: they may adopt a
//! server-reported count but never resurrect streaming state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tether_protocol::InboundMessage;

use crate::notice::ClientNotice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPhase {
    #[default]
    Idle,
    Processing,
    Streaming,
}

impl StreamPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamPhase::Idle => "idle",
            StreamPhase::Processing => "processing",
            StreamPhase::Streaming => "streaming",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamState {
    pub phase: StreamPhase,
    pub buffer: String,
    /// Advisory; reconciled from server-reported counts.
    pub message_count: u64,
    /// Rebuilt from durable state rather than observed live.
    pub resumed: bool,
}

impl StreamState {
    pub fn with_count(message_count: u64) -> Self {
        StreamState {
            message_count,
            ..StreamState::default()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == StreamPhase::Idle
    }

    pub fn is_streaming(&self) -> bool {
        self.phase == StreamPhase::Streaming
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamEvent<'a> {
    /// User sent a message.
    Send,
    /// User asked the agent to continue after a recursion limit.
    Continue,
    /// User answered an action preview.
    ConfirmActions,
    /// User pressed stop.
    Stop,
    Inbound(&'a InboundMessage),
    /// Partial output recovered from durable state.
    Resume { buffer: &'a str },
    /// Recovery gave up waiting; terminate and resync.
    ForceFinish,
    /// Session switch, new session, or rollback.
    Reset { message_count: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persist {
    Write,
    Clear,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: StreamState,
    pub persist: Persist,
    /// A stream that was in flight has ended.
    pub terminal: bool,
    pub notices: Vec<ClientNotice>,
    /// Final assistant content produced by this transition, if any.
    pub completed: Option<String>,
}

impl Transition {
    fn unchanged(state: &StreamState) -> Self {
        Transition {
            state: state.clone(),
            persist: Persist::Unchanged,
            terminal: false,
            notices: Vec::new(),
            completed: None,
        }
    }

    fn with_notice(mut self, notice: ClientNotice) -> Self {
        self.notices.push(notice);
        self
    }
}

pub fn reduce(current: &StreamState, event: StreamEvent<'_>) -> Transition {
    match event {
        StreamEvent::Send => {
            if !current.is_idle() {
                return Transition::unchanged(current);
            }
            let state = StreamState {
                phase: StreamPhase::Processing,
                buffer: String::new(),
                message_count: current.message_count + 1,
                resumed: false,
            };
            Transition {
                state,
                ..Transition::unchanged(current)
            }
            .with_notice(ClientNotice::Processing)
        }
        StreamEvent::Continue | StreamEvent::ConfirmActions => start_processing(current),
        StreamEvent::Stop => {
            let mut transition = finish(current, None, false);
            if !current.is_idle() {
                transition.notices.push(ClientNotice::Stopped);
            }
            transition
        }
        StreamEvent::Resume { buffer } => {
            let state = StreamState {
                phase: StreamPhase::Streaming,
                buffer: buffer.to_string(),
                message_count: current.message_count,
                resumed: true,
            };
            // The stored record keeps its original timestamp so staleness
            // still measures time since the last real chunk.
            Transition {
                state,
                ..Transition::unchanged(current)
            }
            .with_notice(ClientNotice::StreamResumed {
                buffer: buffer.to_string(),
            })
        }
        StreamEvent::ForceFinish => {
            let was_active = !current.is_idle();
            let mut transition = finish(current, None, true);
            if was_active {
                transition.notices.push(ClientNotice::StreamSynced);
            }
            transition
        }
        StreamEvent::Reset { message_count } => {
            let mut transition = finish(current, Some(message_count), false);
            transition.completed = None;
            transition
        }
        StreamEvent::Inbound(message) => reduce_inbound(current, message),
    }
}

fn reduce_inbound(current: &StreamState, message: &InboundMessage) -> Transition {
    match message {
        InboundMessage::Connected { message_count } => {
            let mut transition = Transition::unchanged(current);
            if let Some(count) = message_count {
                transition.state.message_count = *count;
            }
            transition
        }
        InboundMessage::Processing => start_processing(current),
        InboundMessage::StreamStart => {
            if current.is_streaming() {
                return Transition::unchanged(current);
            }
            begin_streaming(current, false)
        }
        InboundMessage::StreamChunk { content } => {
            let mut transition = if current.is_streaming() {
                Transition::unchanged(current)
            } else {
                begin_streaming(current, true)
            };
            transition.state.buffer.push_str(content);
            transition.persist = Persist::Write;
            transition.notices.push(ClientNotice::StreamDelta {
                content: content.clone(),
            });
            transition
        }
        InboundMessage::StreamEnd { .. } | InboundMessage::Finished { .. } => {
            if current.is_idle() {
                return absorb(current, message);
            }
            let mut transition = finish(current, message.reported_message_count(), true);
            let content = transition.completed.clone().unwrap_or_default();
            transition
                .notices
                .push(ClientNotice::StreamFinished { content });
            transition
        }
        InboundMessage::Message { content, .. } => {
            let mut transition = if current.is_idle() {
                absorb(current, message)
            } else {
                finish(current, message.reported_message_count(), false)
            };
            if content.trim().is_empty() {
                return transition;
            }
            if !current.is_idle() && message.reported_message_count().is_none() {
                transition.state.message_count += 1;
            }
            transition.completed = Some(content.clone());
            transition.notices.push(ClientNotice::AssistantMessage {
                content: content.clone(),
            });
            transition
        }
        InboundMessage::Error { message: text } => {
            finish(current, None, false).with_notice(ClientNotice::BackendError {
                message: text.clone(),
            })
        }
        InboundMessage::Stopped => {
            let was_active = !current.is_idle();
            let transition = finish(current, None, false);
            if was_active {
                transition.with_notice(ClientNotice::Stopped)
            } else {
                transition
            }
        }
        InboundMessage::RecursionLimit { message: text } => {
            finish(current, None, false).with_notice(ClientNotice::RecursionLimit {
                message: text.clone(),
            })
        }
        InboundMessage::ToolCall { name, args } => {
            start_processing(current).with_notice(ClientNotice::ToolCall {
                name: name.clone(),
                args: args.clone(),
            })
        }
        InboundMessage::ToolResult { name, result } => {
            start_processing(current).with_notice(ClientNotice::ToolResult {
                name: name.clone(),
                result: result.clone(),
            })
        }
        InboundMessage::ActionPreview { actions } => {
            Transition::unchanged(current).with_notice(ClientNotice::ActionPreview {
                actions: actions.clone(),
            })
        }
        InboundMessage::ActionExecuted { results, refresh } => {
            Transition::unchanged(current).with_notice(ClientNotice::ActionsExecuted {
                results: results.clone(),
                refresh: refresh.clone(),
            })
        }
        InboundMessage::Pong
        | InboundMessage::StatusResponse(_)
        | InboundMessage::Unrecognized { .. } => Transition::unchanged(current),
    }
}

/// Idle → Processing without touching the counter; other phases unchanged.
fn start_processing(current: &StreamState) -> Transition {
    if !current.is_idle() {
        return Transition::unchanged(current);
    }
    let mut transition = Transition::unchanged(current);
    transition.state.phase = StreamPhase::Processing;
    transition.state.resumed = false;
    transition.with_notice(ClientNotice::Processing)
}

fn begin_streaming(current: &StreamState, synthesized: bool) -> Transition {
    let state = StreamState {
        phase: StreamPhase::Streaming,
        buffer: String::new(),
        message_count: current.message_count,
        resumed: false,
    };
    Transition {
        state,
        persist: Persist::Write,
        terminal: false,
        notices: vec![ClientNotice::StreamStarted { synthesized }],
        completed: None,
    }
}

/// Collapses to Idle and clears the persisted record.
///
/// With `count_completion`, a non-empty buffer becomes the completed assistant
/// message and, absent a reported count, bumps the counter for it.
fn finish(current: &StreamState, reported_count: Option<u64>, count_completion: bool) -> Transition {
    let completed = if count_completion && !current.buffer.is_empty() {
        Some(current.buffer.clone())
    } else {
        None
    };
    let message_count = match reported_count {
        Some(count) => count,
        None if completed.is_some() => current.message_count + 1,
        None => current.message_count,
    };
    Transition {
        state: StreamState::with_count(message_count),
        persist: Persist::Clear,
        terminal: !current.is_idle(),
        notices: Vec::new(),
        completed,
    }
}

/// A terminal signal observed while already Idle.
fn absorb(current: &StreamState, message: &InboundMessage) -> Transition {
    let mut transition = Transition::unchanged(current);
    transition.persist = Persist::Clear;
    if let Some(count) = message.reported_message_count() {
        transition.state.message_count = count;
    }
    transition
}

// ─────────────────────────────────────────────────────────────────────────────
// Persisted stream record
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub active: bool,
    pub buffer: String,
    /// Unix millis of the last mutation.
    pub timestamp: i64,
    pub session_id: String,
}

impl StreamRecord {
    pub fn capture(state: &StreamState, session_id: &str, now: DateTime<Utc>) -> Self {
        StreamRecord {
            active: !state.is_idle(),
            buffer: state.buffer.clone(),
            timestamp: now.timestamp_millis(),
            session_id: session_id.to_string(),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        Duration::milliseconds(now.timestamp_millis() - self.timestamp)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}
