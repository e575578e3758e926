//! Seams to the outside world.
//!
//! The core never opens sockets or speaks HTTP itself. A [`Transport`] dials
//! the session channel, a [`Channel`] carries frames, and a [`BackendApi`]
//! covers the REST collaborators. The CLI supplies real implementations; tests
//! use the fakes in the `testing` module.

use std::time::Duration as StdDuration;

use tether_protocol::{
    ConnectParams, HistoryResponse, OutboundMessage, RollbackRequest, RollbackResponse,
    SessionSummary, TaskStatusResponse,
};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Text(String),
    /// Nothing arrived within the timeout.
    Idle,
    Closed { reason: String },
}

pub trait Channel {
    fn send(&mut self, message: &OutboundMessage) -> Result<()>;

    /// Waits at most `timeout` for the next frame.
    fn recv(&mut self, timeout: StdDuration) -> Result<ChannelEvent>;

    fn close(&mut self);
}

pub trait Transport {
    fn connect(&mut self, params: &ConnectParams) -> Result<Box<dyn Channel>>;
}

pub trait BackendApi {
    fn fetch_history(&self, session_id: &str) -> Result<HistoryResponse>;

    fn rollback_to_message(&self, request: &RollbackRequest) -> Result<RollbackResponse>;

    fn list_sessions(&self) -> Result<Vec<SessionSummary>>;

    fn rename_session(&self, session_id: &str, title: &str) -> Result<()>;

    fn delete_session(&self, session_id: &str) -> Result<()>;

    fn task_status(&self, task_id: &str) -> Result<TaskStatusResponse>;
}
