//! The session client: one explicit owner for a user's live conversation.
//!
//! # Layers
//!
//! ```text
//! Transport ─▶ ConnectionManager ─▶ frames ─▶ reduce() ─▶ StreamState ─▶ DurableStore
//!                                                │
//! BackendApi ◀── history / rollback / sessions ──┘
//! ```
//!
//! The client is synchronous and single-threaded. A driver loop calls
//! [`SessionClient::poll`] (bounded by [`SessionClient::next_deadline`]) and
//! drains [`ClientNotice`]s for display. User actions are plain method calls
//! between polls. Time comes from the injected [`Clock`]; nothing sleeps.
//!
//! # Module Structure
//!
//! - this module: construction, user actions, session management
//! - [`events`]: inbound frames, timers and the recovery protocol

mod events;


use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tether_protocol::{ConnectParams, OutboundMessage, Role, SessionSummary};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{ClientConfig, ReconnectConfig, RecoveryConfig};
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::durable::{DurableStore, StoreKey};
use crate::error::{Result, TetherError};
use crate::notice::ClientNotice;
use crate::registry::SessionRegistry;
use crate::rollback::RollbackController;
use crate::stream::{reduce, StreamEvent, StreamPhase, StreamState};
use crate::timers::{TimerKind, TimerQueue};
use crate::transcript::Transcript;
use crate::transport::{BackendApi, Transport};

#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub user_id: String,
    pub active_tools: Vec<String>,
    pub reconnect: ReconnectConfig,
    pub recovery: RecoveryConfig,
}

impl ClientOptions {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            active_tools: Vec::new(),
            reconnect: ReconnectConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            user_id: config.user_id.clone(),
            active_tools: config.active_tools.clone(),
            reconnect: config.reconnect,
            recovery: config.recovery,
        }
    }
}

/// Point-in-time view for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSnapshot {
    pub user_id: String,
    pub session_id: String,
    pub connection: ConnectionStatus,
    pub phase: StreamPhase,
    pub buffer: String,
    pub message_count: u64,
    pub rollback_baseline: u64,
    pub recovering: bool,
    pub active_tools: Vec<String>,
    pub transcript_len: usize,
}

pub struct SessionClient {
    user_id: String,
    session_id: String,
    active_tools: Vec<String>,
    store: Arc<dyn DurableStore>,
    clock: Box<dyn Clock>,
    api: Box<dyn BackendApi>,
    connection: ConnectionManager,
    registry: SessionRegistry,
    rollback: RollbackController,
    recovery: RecoveryConfig,
    stream: StreamState,
    /// Set while the stream was rebuilt or lost sight of and is being reconciled.
    recovering: bool,
    /// Bumped on every terminal transition; stream timers from older epochs are stale.
    stream_epoch: u64,
    timers: TimerQueue,
    transcript: Transcript,
    baseline: u64,
    notices: VecDeque<ClientNotice>,
    closed: bool,
}

impl SessionClient {
    /// Resolves the user's session but does not touch the network; call
    /// [`open`](Self::open) next.
    pub fn new(
        options: ClientOptions,
        transport: Box<dyn Transport>,
        api: Box<dyn BackendApi>,
        store: Arc<dyn DurableStore>,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let now = clock.now();
        let registry = SessionRegistry::new(Arc::clone(&store));
        let rollback = RollbackController::new(Arc::clone(&store), &options.user_id);
        let session_id = registry.resolve_session(&options.user_id, now)?;
        let baseline = rollback.advance_baseline(&session_id, 0)?;

        info!(
            user_id = %options.user_id,
            session_id = %session_id,
            baseline,
            "Session client ready"
        );

        Ok(Self {
            user_id: options.user_id,
            session_id,
            active_tools: options.active_tools,
            store,
            clock,
            api,
            connection: ConnectionManager::new(transport, options.reconnect),
            registry,
            rollback,
            recovery: options.recovery,
            stream: StreamState::default(),
            recovering: false,
            stream_epoch: 0,
            timers: TimerQueue::new(),
            transcript: Transcript::new(),
            baseline,
            notices: VecDeque::new(),
            closed: false,
        })
    }

    /// Loads history, reconciles any stream that was in flight before the
    /// restart, then connects.
    pub fn open(&mut self) -> Result<()> {
        self.closed = false;
        let history = self.api.fetch_history(&self.session_id);
        self.restore(history)?;
        self.connect_now();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn active_tools(&self) -> &[String] {
        &self.active_tools
    }

    pub fn stream(&self) -> &StreamState {
        &self.stream
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    pub fn rollback_baseline(&self) -> u64 {
        self.baseline
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            connection: self.connection.status(),
            phase: self.stream.phase,
            buffer: self.stream.buffer.clone(),
            message_count: self.stream.message_count,
            rollback_baseline: self.baseline,
            recovering: self.recovering,
            active_tools: self.active_tools.clone(),
            transcript_len: self.transcript.len(),
        }
    }

    pub fn drain_notices(&mut self) -> Vec<ClientNotice> {
        self.notices.drain(..).collect()
    }

    fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            session_id: self.session_id.clone(),
            active_tools: self.active_tools.clone(),
        }
    }

    fn stream_key(&self) -> StoreKey {
        StoreKey::stream_state(&self.user_id, &self.session_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // User actions
    // ─────────────────────────────────────────────────────────────────────

    pub fn send_message(&mut self, content: &str) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Err(TetherError::EmptyMessage);
        }
        self.ensure_idle()?;

        self.connection.send(&OutboundMessage::Message {
            content: content.to_string(),
        })?;

        let index = self.stream.message_count;
        let transition = reduce(&self.stream, StreamEvent::Send);
        self.apply(transition)?;
        self.transcript.push(index, Role::User, content);
        debug!(session_id = %self.session_id, index, "Sent user message");
        Ok(())
    }

    /// Collapses to idle immediately; the stop frame is best-effort.
    pub fn stop(&mut self) -> Result<()> {
        let transition = reduce(&self.stream, StreamEvent::Stop);
        self.apply(transition)?;
        if self.connection.is_connected() {
            if let Err(err) = self.connection.send(&OutboundMessage::Stop) {
                warn!(error = %err, "Failed to deliver stop");
            }
        }
        Ok(())
    }

    pub fn confirm_actions(&mut self, confirm: bool) -> Result<()> {
        self.connection
            .send(&OutboundMessage::ConfirmActions { confirm })?;
        if confirm {
            let transition = reduce(&self.stream, StreamEvent::ConfirmActions);
            self.apply(transition)?;
        }
        Ok(())
    }

    /// Resumes the agent after a recursion limit.
    pub fn continue_turn(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.connection.send(&OutboundMessage::Continue)?;
        let transition = reduce(&self.stream, StreamEvent::Continue);
        self.apply(transition)
    }

    /// Capabilities are connect-time parameters, so a change forces a reconnect.
    pub fn set_active_tools(&mut self, tools: Vec<String>) {
        if tools == self.active_tools {
            return;
        }
        info!(active_tools = ?tools, "Active tools changed");
        self.active_tools = tools;
        self.reconnect();
    }

    /// Hard reset: drop the channel and retry budget, reopen after the settle delay.
    pub fn reconnect(&mut self) {
        self.timers.cancel_connection_timers();
        let settle = self.connection.reset();
        let deadline = self.clock.now() + settle;
        self.timers.arm(TimerKind::Settle, deadline);
        self.notify_connection();
        if !self.stream.is_idle() {
            self.begin_recovery();
        }
    }

    pub fn rollback_to(&mut self, message_index: u64) -> Result<()> {
        let response = self
            .rollback
            .request(self.api.as_ref(), &self.session_id, message_index)?;

        let removed = self.transcript.truncate_from(message_index);
        let transition = reduce(&self.stream, StreamEvent::Reset { message_count: message_index });
        self.apply(transition)?;
        self.timers.cancel_stream_timers();
        self.recovering = false;

        debug!(message_index, removed, "Truncated local transcript");
        self.notices.push_back(ClientNotice::RolledBack {
            message_index,
            rolled_back_messages: response.rolled_back_messages,
            rolled_back_transactions: response.rolled_back_transactions,
        });
        Ok(())
    }

    pub fn refresh_history(&mut self) -> Result<()> {
        match self.api.fetch_history(&self.session_id) {
            Ok(history) => {
                self.adopt_history(&history);
                Ok(())
            }
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "History fetch failed");
                self.notices.push_back(ClientNotice::HistoryUnavailable {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.stream.is_idle() {
            Ok(())
        } else {
            Err(TetherError::Busy {
                phase: self.stream.phase.as_str(),
            })
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    pub fn new_session(&mut self) -> Result<String> {
        self.leave_current()?;

        let now = self.clock.now();
        let session_id = self.registry.create_session(&self.user_id, now)?;
        self.rollback.start_fresh(&session_id)?;
        self.baseline = 0;
        self.session_id = session_id.clone();
        self.transcript.clear();
        let transition = reduce(&self.stream, StreamEvent::Reset { message_count: 0 });
        self.apply(transition)?;

        self.notices.push_back(ClientNotice::SessionChanged {
            session_id: session_id.clone(),
        });
        self.reconnect();
        Ok(session_id)
    }

    /// History is fetched before anything changes, so a failed fetch leaves the
    /// current session untouched.
    pub fn switch_session(&mut self, session_id: &str) -> Result<()> {
        if session_id == self.session_id {
            return Ok(());
        }
        let history = self.api.fetch_history(session_id)?;

        self.leave_current()?;
        let now = self.clock.now();
        self.registry.activate(&self.user_id, session_id, now)?;
        self.baseline = self.rollback.enter(session_id, history.total_messages)?;
        self.session_id = session_id.to_string();
        self.transcript.clear();
        // The new session's stream record must survive until restore() reads it.
        self.stream = StreamState::with_count(history.total_messages);

        self.notices.push_back(ClientNotice::SessionChanged {
            session_id: session_id.to_string(),
        });
        self.restore(Ok(history))?;
        self.reconnect();
        Ok(())
    }

    pub fn delete_session(&mut self, session_id: &str) -> Result<()> {
        self.api.delete_session(session_id)?;
        info!(session_id = %session_id, "Deleted session");

        if session_id == self.session_id {
            self.new_session()?;
        }
        self.rollback.forget(session_id)?;
        self.store
            .remove(&StoreKey::stream_state(&self.user_id, session_id))
    }

    pub fn rename_session(&mut self, session_id: &str, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(TetherError::EmptyTitle);
        }
        self.api.rename_session(session_id, title)
    }

    /// Most recently updated first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut sessions = self.api.list_sessions()?;
        sessions.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
        Ok(sessions)
    }

    /// Stops any live stream and freezes the session's rollback baseline.
    fn leave_current(&mut self) -> Result<()> {
        if !self.stream.is_idle() {
            self.stop()?;
        }
        self.timers.cancel_stream_timers();
        self.recovering = false;
        self.rollback
            .leave(&self.session_id, self.stream.message_count)?;
        Ok(())
    }

    /// Orderly shutdown. The persisted stream record is left in place so a
    /// later start can pick it up.
    pub fn close(&mut self) {
        self.closed = true;
        self.timers.cancel_connection_timers();
        self.timers.cancel_stream_timers();
        self.connection.close();
        self.notify_connection();
        info!(session_id = %self.session_id, "Session client closed");
    }
}
