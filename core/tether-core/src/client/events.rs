//! Inbound frames, timers and stream recovery for [`SessionClient`].
//!
//! # Recovery
//!
//! A stream is "recovering" when the client can no longer vouch for it from
//! live frames alone: it was rebuilt from durable state after a restart, or
//! the channel dropped while it was in flight. Recovery always starts the same
//! way: a `check_status` (queued if the channel is down) and a first-stage
//! watchdog. From there:
//!
//! - `status_response` or a chunk cancels every pending stream timer;
//! - a "keep waiting" verdict or a chunk re-arms a fresh first-stage watchdog;
//! - an idle verdict arms the grace timer, after which the stream is
//!   force-finished unless a terminal signal arrived first;
//! - the first-stage watchdog repeats the status query and arms the second
//!   stage, which force-finishes unconditionally.
//!
//! Every terminal transition bumps `stream_epoch`, so a timer that slips
//! through cancellation is recognised as stale when it fires.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tether_protocol::{
    parse_inbound, HistoryResponse, InboundMessage, OutboundMessage, Role, StatusReport,
};
use tracing::{debug, info, warn};

use super::SessionClient;
use crate::connection::ConnectionEvent;
use crate::durable::{load_json, save_json};
use crate::error::Result;
use crate::notice::ClientNotice;
use crate::reconcile::{
    assess_history, assess_status, validate_persisted, HistoryVerdict, RecordVerdict,
    StatusVerdict,
};
use crate::stream::{reduce, Persist, StreamEvent, StreamRecord, Transition};
use crate::timers::{Timer, TimerKind};
use crate::transport::ChannelEvent;

const FIRST_STAGE: u8 = 1;
const FINAL_STAGE: u8 = 2;

impl SessionClient {
    // ─────────────────────────────────────────────────────────────────────
    // Driving the loop
    // ─────────────────────────────────────────────────────────────────────

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    /// Fires due timers, waits up to `max_wait` (or the next deadline, if
    /// sooner) for one channel event, handles it, then fires timers again.
    /// Without a channel the wait is a plain sleep on the clock.
    pub fn poll(&mut self, max_wait: StdDuration) -> Result<()> {
        self.fire_due_timers()?;

        let wait = match self.next_deadline() {
            Some(deadline) => (deadline - self.clock.now())
                .to_std()
                .unwrap_or(StdDuration::ZERO)
                .min(max_wait),
            None => max_wait,
        };

        if !self.connection.is_connected() {
            // No channel to block on; wait out the interval here instead.
            self.clock.sleep(wait);
            return self.fire_due_timers();
        }

        match self.connection.recv(wait) {
            ChannelEvent::Text(frame) => self.handle_frame(&frame)?,
            ChannelEvent::Idle => {}
            ChannelEvent::Closed { reason } => self.handle_closed(&reason),
        }

        self.fire_due_timers()
    }

    pub fn fire_due_timers(&mut self) -> Result<()> {
        let now = self.clock.now();
        for timer in self.timers.take_due(now) {
            self.fire(timer)?;
        }
        Ok(())
    }

    fn fire(&mut self, timer: Timer) -> Result<()> {
        match timer.kind {
            TimerKind::Reconnect | TimerKind::Settle => {
                self.connect_now();
                Ok(())
            }
            TimerKind::StatusGrace { epoch } => {
                if !self.is_live_epoch(epoch) {
                    debug!(epoch, current = self.stream_epoch, "Ignoring stale grace timer");
                    return Ok(());
                }
                info!(session_id = %self.session_id, "Backend confirmed idle; finishing stream");
                self.force_finish(None)
            }
            TimerKind::RecoveryWatchdog { epoch, stage } => {
                if !self.is_live_epoch(epoch) {
                    debug!(epoch, stage, "Ignoring stale recovery watchdog");
                    return Ok(());
                }
                if stage < FINAL_STAGE {
                    warn!(session_id = %self.session_id, stage, "Recovery watchdog fired; asking again");
                    self.request_status();
                    self.arm_watchdog(stage + 1);
                    Ok(())
                } else {
                    warn!(session_id = %self.session_id, "Recovery timed out; forcing sync");
                    self.force_finish(None)
                }
            }
        }
    }

    fn is_live_epoch(&self, epoch: u64) -> bool {
        epoch == self.stream_epoch && !self.stream.is_idle()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Channel events
    // ─────────────────────────────────────────────────────────────────────

    /// Malformed and unknown frames are logged and dropped.
    pub fn handle_frame(&mut self, frame: &str) -> Result<()> {
        match parse_inbound(frame) {
            Ok(InboundMessage::Unrecognized { kind }) => {
                debug!(kind = %kind, "Ignoring unrecognized inbound message");
                Ok(())
            }
            Ok(message) => self.handle_inbound(&message),
            Err(err) => {
                warn!(code = %err.code, error = %err.message, "Dropping malformed frame");
                Ok(())
            }
        }
    }

    pub fn handle_inbound(&mut self, message: &InboundMessage) -> Result<()> {
        if let InboundMessage::StatusResponse(report) = message {
            return self.handle_status(report);
        }

        let transition = reduce(&self.stream, StreamEvent::Inbound(message));
        self.apply(transition)?;

        let live_signal = matches!(
            message,
            InboundMessage::StreamChunk { .. } | InboundMessage::StreamStart
        );
        if live_signal && !self.stream.is_idle() {
            // Fresh output outranks any pending grace or watchdog verdict.
            let was_watched = self.recovering || self.timers.has_stream_timers();
            self.timers.cancel_stream_timers();
            if was_watched {
                self.arm_watchdog(FIRST_STAGE);
            }
        }
        Ok(())
    }

    fn handle_status(&mut self, report: &StatusReport) -> Result<()> {
        if self.stream.is_idle() {
            debug!(?report, "Status response with no stream in flight");
            return Ok(());
        }

        self.timers.cancel_stream_timers();
        let verdict = assess_status(report);
        debug!(?report, ?verdict, "Status response");

        match verdict {
            StatusVerdict::SyncNow => self.force_finish(None),
            StatusVerdict::KeepWaiting => {
                self.arm_watchdog(FIRST_STAGE);
                Ok(())
            }
            StatusVerdict::ConfirmAfterGrace => {
                let deadline = self.clock.now() + self.recovery.status_grace();
                self.timers.arm(
                    TimerKind::StatusGrace {
                        epoch: self.stream_epoch,
                    },
                    deadline,
                );
                Ok(())
            }
        }
    }

    fn handle_closed(&mut self, reason: &str) {
        let event = self.connection.handle_closed(reason);
        self.on_connection_event(event);
        if !self.stream.is_idle() {
            self.begin_recovery();
        }
    }

    pub(super) fn connect_now(&mut self) {
        if self.closed {
            return;
        }
        let params = self.connect_params();
        let event = self.connection.open(&params);
        self.on_connection_event(event);
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        if let ConnectionEvent::RetryScheduled { delay, .. } = event {
            let deadline = self.clock.now() + delay;
            self.timers.arm(TimerKind::Reconnect, deadline);
        }
        self.notify_connection();
    }

    pub(super) fn notify_connection(&mut self) {
        self.notices.push_back(ClientNotice::Connection {
            status: self.connection.status(),
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stream state
    // ─────────────────────────────────────────────────────────────────────

    /// Applies a reducer transition: durable record, timers, transcript, notices.
    pub(super) fn apply(&mut self, transition: Transition) -> Result<()> {
        let Transition {
            state,
            persist,
            terminal,
            notices,
            completed,
        } = transition;
        self.stream = state;

        match persist {
            Persist::Write => {
                let record = StreamRecord::capture(&self.stream, &self.session_id, self.clock.now());
                save_json(self.store.as_ref(), &self.stream_key(), &record)?;
            }
            Persist::Clear => self.store.remove(&self.stream_key())?,
            Persist::Unchanged => {}
        }

        if terminal {
            self.end_stream_epoch();
        }

        if let Some(content) = completed {
            let index = self.stream.message_count.saturating_sub(1);
            self.transcript.push(index, Role::Assistant, &content);
        }

        self.notices.extend(notices);
        Ok(())
    }

    fn end_stream_epoch(&mut self) {
        self.timers.cancel_stream_timers();
        self.stream_epoch += 1;
        self.recovering = false;
    }

    pub(super) fn adopt_history(&mut self, history: &HistoryResponse) {
        self.transcript.replace_with_history(history);
        self.stream.message_count = history.total_messages;
        self.notices.push_back(ClientNotice::HistoryLoaded {
            total_messages: history.total_messages,
        });
    }

    /// Terminates the stream on the client's own authority and resyncs from
    /// history. `history` skips the refetch when it is already in hand.
    fn force_finish(&mut self, history: Option<&HistoryResponse>) -> Result<()> {
        let mut transition = reduce(&self.stream, StreamEvent::ForceFinish);
        if !transition.terminal {
            return Ok(());
        }
        let partial = transition.completed.take();
        self.apply(transition)?;

        match history {
            Some(history) => self.adopt_history(history),
            None => {
                if self.refresh_history().is_err() {
                    if let Some(content) = partial {
                        let index = self.stream.message_count.saturating_sub(1);
                        self.transcript.push(index, Role::Assistant, &content);
                    }
                }
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Recovery
    // ─────────────────────────────────────────────────────────────────────

    /// Adopts `history` (if it was fetched) and reconciles the persisted
    /// stream record for the current session.
    pub(super) fn restore(&mut self, history: Result<HistoryResponse>) -> Result<()> {
        let history = match history {
            Ok(history) => {
                self.adopt_history(&history);
                Some(history)
            }
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "History unavailable on restore");
                self.notices.push_back(ClientNotice::HistoryUnavailable {
                    reason: err.to_string(),
                });
                None
            }
        };

        let key = self.stream_key();
        let record = load_json::<StreamRecord>(self.store.as_ref(), &key)?;
        let now = self.clock.now();
        let verdict = validate_persisted(
            record.as_ref(),
            &self.session_id,
            now,
            self.recovery.stale_after(),
        );

        match verdict {
            RecordVerdict::Resume { buffer } => {
                info!(
                    session_id = %self.session_id,
                    buffered = buffer.len(),
                    "Resuming stream from durable state"
                );
                let transition = reduce(&self.stream, StreamEvent::Resume { buffer: &buffer });
                self.apply(transition)?;
                self.recovering = true;

                match assess_history(history.as_ref()) {
                    HistoryVerdict::Complete => {
                        info!(session_id = %self.session_id, "History already holds the reply");
                        self.force_finish(history.as_ref())?;
                    }
                    HistoryVerdict::Inconclusive => self.begin_recovery(),
                }
            }
            discarded if discarded.should_discard() => {
                info!(session_id = %self.session_id, verdict = ?discarded, "Discarding persisted stream");
                self.store.remove(&key)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Asks the backend where the in-flight stream stands and arms the
    /// first-stage watchdog.
    pub(super) fn begin_recovery(&mut self) {
        self.recovering = true;
        self.timers.cancel_stream_timers();
        self.request_status();
        self.arm_watchdog(FIRST_STAGE);
    }

    fn request_status(&mut self) {
        let check = OutboundMessage::CheckStatus {
            session_id: self.session_id.clone(),
        };
        if let Err(err) = self.connection.send_or_queue(check) {
            warn!(error = %err, "Failed to send status query");
        }
    }

    fn arm_watchdog(&mut self, stage: u8) {
        let deadline = self.clock.now() + self.recovery.watchdog();
        self.timers.arm(
            TimerKind::RecoveryWatchdog {
                epoch: self.stream_epoch,
                stage,
            },
            deadline,
        );
    }
}
