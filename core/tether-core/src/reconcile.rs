//! Recovery decisions.
//!
//! After a restart (or any suspected desync) the client has three sources of
//! truth that may disagree: the persisted [`StreamRecord`], the backend's
//! message history, and the backend's answer to `check_status`. The functions
//! here turn each source into a verdict; the client acts on the verdicts and
//! owns the timers.
//!
//! Escalation when nothing conclusive arrives:
//!
//! ```text
//! resume ─▶ history complete? ── yes ─▶ force-finish
//!              │ no / fetch failed
//!              ▼
//!         check_status ─▶ watchdog (stage 1) ─▶ check_status ─▶ watchdog (stage 2) ─▶ force-finish
//! ```

use chrono::{DateTime, Duration, Utc};
use tether_protocol::{HistoryResponse, StatusReport};

use crate::stream::StreamRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordVerdict {
    Resume { buffer: String },
    Missing,
    Inactive,
    Stale { age: Duration },
    SessionMismatch { stored: String },
}

impl RecordVerdict {
    /// Whatever is stored should be deleted.
    pub fn should_discard(&self) -> bool {
        matches!(
            self,
            RecordVerdict::Inactive | RecordVerdict::Stale { .. } | RecordVerdict::SessionMismatch { .. }
        )
    }
}

pub fn validate_persisted(
    record: Option<&StreamRecord>,
    session_id: &str,
    now: DateTime<Utc>,
    max_age: Duration,
) -> RecordVerdict {
    let Some(record) = record else {
        return RecordVerdict::Missing;
    };
    if record.session_id != session_id {
        return RecordVerdict::SessionMismatch {
            stored: record.session_id.clone(),
        };
    }
    if record.is_stale(now, max_age) {
        return RecordVerdict::Stale {
            age: record.age(now),
        };
    }
    if !record.active {
        return RecordVerdict::Inactive;
    }
    RecordVerdict::Resume {
        buffer: record.buffer.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryVerdict {
    /// The backend already holds the finished reply.
    Complete,
    Inconclusive,
}

/// `None` means the fetch failed, which is never conclusive.
pub fn assess_history(history: Option<&HistoryResponse>) -> HistoryVerdict {
    match history {
        Some(history) if history.ends_with_complete_assistant_turn() => HistoryVerdict::Complete,
        _ => HistoryVerdict::Inconclusive,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusVerdict {
    SyncNow,
    KeepWaiting,
    /// Backend reports idle; terminate after the grace delay unless a terminal
    /// signal lands first.
    ConfirmAfterGrace,
}

pub fn assess_status(report: &StatusReport) -> StatusVerdict {
    if report.should_sync_immediately {
        StatusVerdict::SyncNow
    } else if report.has_pending_messages {
        StatusVerdict::KeepWaiting
    } else if !report.is_processing {
        StatusVerdict::ConfirmAfterGrace
    } else {
        StatusVerdict::KeepWaiting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{conversation, history_message};
    use tether_protocol::Role;

    fn record(session_id: &str, active: bool, at: DateTime<Utc>) -> StreamRecord {
        StreamRecord {
            active,
            buffer: "Hello".to_string(),
            timestamp: at.timestamp_millis(),
            session_id: session_id.to_string(),
        }
    }

    #[test]
    fn fresh_active_record_resumes() {
        let now = Utc::now();
        let stored = record("s1", true, now - Duration::seconds(10));
        assert_eq!(
            validate_persisted(Some(&stored), "s1", now, Duration::minutes(5)),
            RecordVerdict::Resume {
                buffer: "Hello".to_string()
            }
        );
    }

    #[test]
    fn old_record_is_stale_even_if_active() {
        let now = Utc::now();
        let stored = record("s1", true, now - Duration::minutes(10));
        let verdict = validate_persisted(Some(&stored), "s1", now, Duration::minutes(5));
        assert!(matches!(verdict, RecordVerdict::Stale { age } if age == Duration::minutes(10)));
        assert!(verdict.should_discard());
    }

    #[test]
    fn record_for_other_session_is_discarded() {
        let now = Utc::now();
        let stored = record("s0", true, now);
        let verdict = validate_persisted(Some(&stored), "s1", now, Duration::minutes(5));
        assert_eq!(
            verdict,
            RecordVerdict::SessionMismatch {
                stored: "s0".to_string()
            }
        );
    }

    #[test]
    fn inactive_and_missing_records() {
        let now = Utc::now();
        let stored = record("s1", false, now);
        assert_eq!(
            validate_persisted(Some(&stored), "s1", now, Duration::minutes(5)),
            RecordVerdict::Inactive
        );
        let missing = validate_persisted(None, "s1", now, Duration::minutes(5));
        assert_eq!(missing, RecordVerdict::Missing);
        assert!(!missing.should_discard());
    }

    #[test]
    fn history_complete_only_for_finished_assistant_turn() {
        assert_eq!(assess_history(Some(&conversation(2))), HistoryVerdict::Complete);
        assert_eq!(
            assess_history(Some(&conversation(3))),
            HistoryVerdict::Inconclusive
        );
        assert_eq!(assess_history(None), HistoryVerdict::Inconclusive);

        let mut with_tools = conversation(1);
        let mut reply = history_message(1, Role::Assistant, "calling a tool");
        reply.tool_calls = Some(vec![serde_json::json!({"name": "todo"})]);
        with_tools.messages.push(reply);
        assert_eq!(assess_history(Some(&with_tools)), HistoryVerdict::Inconclusive);
    }

    #[test]
    fn status_verdicts() {
        let report = |processing, pending, sync| StatusReport {
            is_processing: processing,
            has_pending_messages: pending,
            last_message_role: None,
            should_sync_immediately: sync,
        };
        assert_eq!(assess_status(&report(true, true, true)), StatusVerdict::SyncNow);
        assert_eq!(assess_status(&report(false, true, false)), StatusVerdict::KeepWaiting);
        assert_eq!(assess_status(&report(true, false, false)), StatusVerdict::KeepWaiting);
        assert_eq!(
            assess_status(&report(false, false, false)),
            StatusVerdict::ConfirmAfterGrace
        );
    }
}
