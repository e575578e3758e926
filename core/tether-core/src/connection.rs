//! Channel lifecycle: connect, bounded fixed-delay reconnect, hard reset.
//!
//! The manager owns the live [`Channel`] but not the clock. Whenever it wants
//! to try again later it says so in its return value ([`ConnectionEvent`]) and
//! the client arms a timer.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Serialize;
use tether_protocol::{ConnectParams, OutboundMessage};
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::error::{Result, TetherError};
use crate::transport::{Channel, ChannelEvent, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Retry budget spent; only an explicit reconnect tries again.
    Exhausted,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    RetryScheduled { attempt: u32, delay: Duration },
    Exhausted,
}

pub struct ConnectionManager {
    transport: Box<dyn Transport>,
    channel: Option<Box<dyn Channel>>,
    status: ConnectionStatus,
    retries: u32,
    config: ReconnectConfig,
    /// Status queries wait here while the channel is down.
    queued: Vec<OutboundMessage>,
}

impl ConnectionManager {
    pub fn new(transport: Box<dyn Transport>, config: ReconnectConfig) -> Self {
        Self {
            transport,
            channel: None,
            status: ConnectionStatus::Disconnected,
            retries: 0,
            config,
            queued: Vec::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some() && self.status.is_connected()
    }

    pub fn open(&mut self, params: &ConnectParams) -> ConnectionEvent {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.status = ConnectionStatus::Connecting;

        match self.transport.connect(params) {
            Ok(channel) => {
                self.channel = Some(channel);
                self.retries = 0;
                self.status = ConnectionStatus::Connected;
                info!(
                    session_id = %params.session_id,
                    active_tools = ?params.active_tools,
                    "Session channel open"
                );
                self.flush_queued();
                ConnectionEvent::Opened
            }
            Err(err) => {
                warn!(session_id = %params.session_id, error = %err, "Session channel connect failed");
                self.schedule_retry()
            }
        }
    }

    /// Marks the channel dead and decides whether to retry.
    pub fn handle_closed(&mut self, reason: &str) -> ConnectionEvent {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        info!(reason = %reason, retries = self.retries, "Session channel closed");
        self.schedule_retry()
    }

    fn schedule_retry(&mut self) -> ConnectionEvent {
        self.channel = None;
        if self.retries < self.config.max_attempts {
            self.retries += 1;
            self.status = ConnectionStatus::Reconnecting {
                attempt: self.retries,
            };
            debug!(
                attempt = self.retries,
                max_attempts = self.config.max_attempts,
                "Scheduling reconnect"
            );
            ConnectionEvent::RetryScheduled {
                attempt: self.retries,
                delay: self.config.delay(),
            }
        } else {
            self.status = ConnectionStatus::Exhausted;
            warn!(
                max_attempts = self.config.max_attempts,
                "Reconnect attempts exhausted"
            );
            ConnectionEvent::Exhausted
        }
    }

    /// Hard reset: drop the channel, the retry budget and anything queued for
    /// the old connection. Returns how long to wait before opening again.
    pub fn reset(&mut self) -> Duration {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.queued.clear();
        self.retries = 0;
        self.status = ConnectionStatus::Connecting;
        self.config.settle()
    }

    /// Orderly teardown; no retry follows.
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.queued.clear();
        self.status = ConnectionStatus::Disconnected;
    }

    pub fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        if !self.status.is_connected() {
            return Err(TetherError::NotConnected);
        }
        let channel = self.channel.as_mut().ok_or(TetherError::NotConnected)?;
        debug!(kind = message.kind(), "Sending channel message");
        channel.send(message)
    }

    /// Sends now if connected, otherwise holds the message until the next open.
    /// Duplicate queued messages collapse to one.
    pub fn send_or_queue(&mut self, message: OutboundMessage) -> Result<()> {
        if self.is_connected() {
            return self.send(&message);
        }
        if !self.queued.contains(&message) {
            debug!(kind = message.kind(), "Queueing message until channel opens");
            self.queued.push(message);
        }
        Ok(())
    }

    pub fn queued(&self) -> &[OutboundMessage] {
        &self.queued
    }

    fn flush_queued(&mut self) {
        let queued = std::mem::take(&mut self.queued);
        for message in queued {
            if let Err(err) = self.send(&message) {
                warn!(kind = message.kind(), error = %err, "Failed to flush queued message");
                self.queued.push(message);
            }
        }
    }

    /// Reads the next channel event. With no channel this returns `Idle`
    /// immediately; the caller decides how to wait.
    pub fn recv(&mut self, timeout: StdDuration) -> ChannelEvent {
        let Some(channel) = self.channel.as_mut() else {
            return ChannelEvent::Idle;
        };
        match channel.recv(timeout) {
            Ok(event) => event,
            Err(err) => ChannelEvent::Closed {
                reason: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;

    fn params() -> ConnectParams {
        ConnectParams {
            session_id: "session_1_abc".to_string(),
            active_tools: vec!["todo".to_string()],
        }
    }

    #[test]
    fn open_resets_retries_and_flushes_queue() {
        let transport = FakeTransport::new();
        let mut manager = ConnectionManager::new(Box::new(transport.clone()), ReconnectConfig::default());

        let check = OutboundMessage::CheckStatus {
            session_id: "session_1_abc".to_string(),
        };
        manager.send_or_queue(check.clone()).unwrap();
        manager.send_or_queue(check.clone()).unwrap();
        assert_eq!(manager.queued().len(), 1);

        assert_eq!(manager.open(&params()), ConnectionEvent::Opened);
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert!(manager.queued().is_empty());
        assert_eq!(transport.sent(), vec![check]);
        assert_eq!(transport.connects(), vec![params()]);
    }

    #[test]
    fn retries_are_bounded_then_exhausted() {
        let transport = FakeTransport::new();
        let mut manager = ConnectionManager::new(Box::new(transport.clone()), ReconnectConfig::default());
        assert_eq!(manager.open(&params()), ConnectionEvent::Opened);

        transport.refuse_connections(true);
        let mut event = manager.handle_closed("network");
        let mut attempts = Vec::new();
        while let ConnectionEvent::RetryScheduled { attempt, delay } = event {
            assert_eq!(delay, Duration::seconds(2));
            attempts.push(attempt);
            event = manager.open(&params());
        }

        assert_eq!(attempts, vec![1, 2, 3, 4, 5]);
        assert_eq!(event, ConnectionEvent::Exhausted);
        assert_eq!(manager.status(), ConnectionStatus::Exhausted);
        assert_eq!(transport.connect_count(), 6);
    }

    #[test]
    fn reset_restores_retry_budget() {
        let transport = FakeTransport::new();
        let mut manager = ConnectionManager::new(Box::new(transport.clone()), ReconnectConfig::default());
        manager.open(&params());
        manager.handle_closed("network");
        assert_eq!(manager.retries(), 1);

        let settle = manager.reset();
        assert_eq!(settle, Duration::milliseconds(100));
        assert_eq!(manager.retries(), 0);
        assert!(!manager.is_connected());
    }

    #[test]
    fn send_requires_connection() {
        let transport = FakeTransport::new();
        let mut manager = ConnectionManager::new(Box::new(transport), ReconnectConfig::default());
        let err = manager
            .send(&OutboundMessage::Stop)
            .expect_err("should fail while disconnected");
        assert!(matches!(err, TetherError::NotConnected));
    }
}
