//! In-memory fakes for driving a [`SessionClient`](crate::SessionClient)
//! deterministically: no sockets, no HTTP, no sleeping.
//!
//! Each fake is a cheap handle over shared state. Hand one clone to the client
//! and keep another to script inbound frames and inspect what was sent.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tether_protocol::{
    ConnectParams, HistoryMessage, HistoryResponse, InboundMessage, OutboundMessage, Role,
    RollbackRequest, RollbackResponse, SessionSummary, TaskStatus, TaskStatusResponse,
};

use crate::client::{ClientOptions, SessionClient};
use crate::clock::Clock;
use crate::durable::{save_json, DurableStore, MemoryStore, StoreKey};
use crate::error::{Result, TetherError};
use crate::notice::ClientNotice;
use crate::registry::SessionRegistry;
use crate::stream::StreamRecord;
use crate::transport::{BackendApi, Channel, ChannelEvent, Transport};

pub use crate::clock::ManualClock;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transport
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct NetState {
    connects: Vec<ConnectParams>,
    fail_next: usize,
    refuse_all: bool,
    /// Bumped per connect; older channels read as closed.
    generation: u64,
    open: bool,
    inbound: VecDeque<ChannelEvent>,
    sent: Vec<OutboundMessage>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<NetState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_connects(&self, count: usize) {
        lock(&self.state).fail_next = count;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.state).refuse_all = refuse;
    }

    /// Queues a raw text frame for the live channel.
    pub fn push_frame(&self, frame: &str) {
        lock(&self.state)
            .inbound
            .push_back(ChannelEvent::Text(frame.to_string()));
    }

    pub fn push_json(&self, value: Value) {
        self.push_frame(&value.to_string());
    }

    pub fn push_inbound(&self, message: &InboundMessage) {
        let frame = serde_json::to_string(message).unwrap_or_default();
        self.push_frame(&frame);
    }

    /// The server drops the connection.
    pub fn drop_connection(&self, reason: &str) {
        lock(&self.state).inbound.push_back(ChannelEvent::Closed {
            reason: reason.to_string(),
        });
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn pending_inbound(&self) -> usize {
        lock(&self.state).inbound.len()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        lock(&self.state).sent.clone()
    }

    pub fn take_sent(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut lock(&self.state).sent)
    }

    pub fn connects(&self) -> Vec<ConnectParams> {
        lock(&self.state).connects.clone()
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects.len()
    }
}

impl Transport for FakeTransport {
    fn connect(&mut self, params: &ConnectParams) -> Result<Box<dyn Channel>> {
        let mut state = lock(&self.state);
        state.connects.push(params.clone());
        if state.refuse_all {
            return Err(TetherError::Transport("connection refused".to_string()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TetherError::Transport("connection refused".to_string()));
        }
        state.generation += 1;
        state.open = true;
        Ok(Box::new(FakeChannel {
            state: Arc::clone(&self.state),
            generation: state.generation,
        }))
    }
}

struct FakeChannel {
    state: Arc<Mutex<NetState>>,
    generation: u64,
}

impl FakeChannel {
    fn is_current(state: &NetState, generation: u64) -> bool {
        state.open && state.generation == generation
    }
}

impl Channel for FakeChannel {
    fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        let mut state = lock(&self.state);
        if !Self::is_current(&state, self.generation) {
            return Err(TetherError::Transport("channel closed".to_string()));
        }
        state.sent.push(message.clone());
        Ok(())
    }

    fn recv(&mut self, _timeout: StdDuration) -> Result<ChannelEvent> {
        let mut state = lock(&self.state);
        if !Self::is_current(&state, self.generation) {
            return Ok(ChannelEvent::Closed {
                reason: "channel closed".to_string(),
            });
        }
        match state.inbound.pop_front() {
            Some(ChannelEvent::Closed { reason }) => {
                state.open = false;
                Ok(ChannelEvent::Closed { reason })
            }
            Some(event) => Ok(event),
            None => Ok(ChannelEvent::Idle),
        }
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        if state.generation == self.generation {
            state.open = false;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backend API
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct ApiState {
    histories: HashMap<String, HistoryResponse>,
    history_failures: usize,
    history_requests: Vec<String>,
    rollback_response: Option<RollbackResponse>,
    rollback_fails: bool,
    rollback_requests: Vec<RollbackRequest>,
    sessions: Vec<SessionSummary>,
    renamed: Vec<(String, String)>,
    deleted: Vec<String>,
    tasks: HashMap<String, TaskStatusResponse>,
    task_requests: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<ApiState>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_history(&self, session_id: &str, history: HistoryResponse) {
        lock(&self.state)
            .histories
            .insert(session_id.to_string(), history);
    }

    /// The next `count` history fetches fail with a transport error.
    pub fn fail_history(&self, count: usize) {
        lock(&self.state).history_failures = count;
    }

    pub fn history_requests(&self) -> Vec<String> {
        lock(&self.state).history_requests.clone()
    }

    pub fn set_rollback_response(&self, response: RollbackResponse) {
        let mut state = lock(&self.state);
        state.rollback_response = Some(response);
        state.rollback_fails = false;
    }

    pub fn fail_rollback(&self) {
        lock(&self.state).rollback_fails = true;
    }

    pub fn rollback_requests(&self) -> Vec<RollbackRequest> {
        lock(&self.state).rollback_requests.clone()
    }

    pub fn set_sessions(&self, sessions: Vec<SessionSummary>) {
        lock(&self.state).sessions = sessions;
    }

    pub fn renamed(&self) -> Vec<(String, String)> {
        lock(&self.state).renamed.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }

    pub fn set_task_status(&self, task_id: &str, status: TaskStatus) {
        lock(&self.state).tasks.insert(
            task_id.to_string(),
            TaskStatusResponse {
                task_id: task_id.to_string(),
                status,
                result: None,
                error: None,
            },
        );
    }

    pub fn task_requests(&self) -> Vec<String> {
        lock(&self.state).task_requests.clone()
    }
}

impl BackendApi for FakeApi {
    fn fetch_history(&self, session_id: &str) -> Result<HistoryResponse> {
        let mut state = lock(&self.state);
        state.history_requests.push(session_id.to_string());
        if state.history_failures > 0 {
            state.history_failures -= 1;
            return Err(TetherError::api("/history", "service unavailable"));
        }
        Ok(state.histories.get(session_id).cloned().unwrap_or_default())
    }

    fn rollback_to_message(&self, request: &RollbackRequest) -> Result<RollbackResponse> {
        let mut state = lock(&self.state);
        state.rollback_requests.push(request.clone());
        if state.rollback_fails {
            return Err(TetherError::api("/rollback/to-message", "service unavailable"));
        }
        let response = state.rollback_response.clone().unwrap_or(RollbackResponse {
            success: true,
            rolled_back_messages: 0,
            rolled_back_transactions: 0,
            message: None,
        });
        if response.success {
            if let Some(history) = state.histories.get_mut(&request.session_id) {
                history
                    .messages
                    .retain(|message| message.index < request.message_index);
                history.total_messages = request.message_index;
            }
        }
        Ok(response)
    }

    fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        Ok(lock(&self.state).sessions.clone())
    }

    fn rename_session(&self, session_id: &str, title: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state
            .renamed
            .push((session_id.to_string(), title.to_string()));
        if let Some(summary) = state
            .sessions
            .iter_mut()
            .find(|summary| summary.session_id == session_id)
        {
            summary.title = Some(title.to_string());
        }
        Ok(())
    }

    fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.deleted.push(session_id.to_string());
        state
            .sessions
            .retain(|summary| summary.session_id != session_id);
        state.histories.remove(session_id);
        Ok(())
    }

    fn task_status(&self, task_id: &str) -> Result<TaskStatusResponse> {
        let mut state = lock(&self.state);
        state.task_requests.push(task_id.to_string());
        state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| TetherError::api("/quick-action/status", format!("unknown task {}", task_id)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Builders
// ═══════════════════════════════════════════════════════════════════════════════

/// History of alternating user/assistant turns, `count` messages long.
pub fn conversation(count: u64) -> HistoryResponse {
    let messages = (0..count)
        .map(|index| {
            if index % 2 == 0 {
                history_message(index, Role::User, &format!("question {}", index))
            } else {
                history_message(index, Role::Assistant, &format!("answer {}", index))
            }
        })
        .collect();
    HistoryResponse {
        messages,
        total_messages: count,
    }
}

pub fn history_message(index: u64, role: Role, content: &str) -> HistoryMessage {
    HistoryMessage {
        role,
        content: Some(content.to_string()),
        index,
        tool_calls: None,
    }
}

/// Binds `session_id` as the user's current session, as a previous run would have.
pub fn seed_session(
    store: &Arc<MemoryStore>,
    user_id: &str,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let store: Arc<dyn DurableStore> = store.clone();
    SessionRegistry::new(store).activate(user_id, session_id, now)
}

/// Leaves an active stream record behind, as a run killed mid-stream would.
pub fn seed_stream_record(
    store: &MemoryStore,
    user_id: &str,
    session_id: &str,
    buffer: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    let record = StreamRecord {
        active: true,
        buffer: buffer.to_string(),
        timestamp: at.timestamp_millis(),
        session_id: session_id.to_string(),
    };
    save_json(store, &StoreKey::stream_state(user_id, session_id), &record)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Client rig
// ═══════════════════════════════════════════════════════════════════════════════

/// A [`SessionClient`] wired to fakes, with handles kept for scripting.
pub struct ClientRig {
    pub client: SessionClient,
    pub transport: FakeTransport,
    pub api: FakeApi,
    pub store: Arc<MemoryStore>,
    pub clock: ManualClock,
}

impl ClientRig {
    pub fn new(user_id: &str) -> Result<Self> {
        Self::with_store(
            ClientOptions::new(user_id),
            Arc::new(MemoryStore::new()),
            ManualClock::new(Utc::now()),
            FakeApi::new(),
        )
    }

    /// Builds a client over existing state: pass the store and clock of a
    /// previous rig to simulate a restart.
    pub fn with_store(
        options: ClientOptions,
        store: Arc<MemoryStore>,
        clock: ManualClock,
        api: FakeApi,
    ) -> Result<Self> {
        let transport = FakeTransport::new();
        let client = SessionClient::new(
            options,
            Box::new(transport.clone()),
            Box::new(api.clone()),
            store.clone(),
            Box::new(clock.clone()),
        )?;
        Ok(Self {
            client,
            transport,
            api,
            store,
            clock,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Delivers every scripted inbound event while the channel stays up.
    pub fn pump(&mut self) -> Result<()> {
        while self.transport.pending_inbound() > 0 && self.client.is_connected() {
            self.client.poll(StdDuration::ZERO)?;
        }
        Ok(())
    }

    /// Moves time forward and fires whatever came due.
    pub fn advance(&mut self, by: Duration) -> Result<()> {
        self.clock.advance(by);
        self.client.fire_due_timers()
    }

    pub fn notices(&mut self) -> Vec<ClientNotice> {
        self.client.drain_notices()
    }
}
