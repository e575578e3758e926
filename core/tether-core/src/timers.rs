//! Explicit timer handles for the client's single-threaded loop.
//!
//! Nothing here sleeps. The client arms deadlines, the loop asks for the next
//! deadline to bound its channel poll, and due timers are taken in deadline
//! order. Stream timers carry the stream epoch they were armed in; the client
//! bumps the epoch on every terminal transition and ignores any timer whose
//! epoch no longer matches, on top of cancelling them eagerly.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Automatic reconnect after a close (fixed delay).
    Reconnect,
    /// Re-open after a hard reset.
    Settle,
    /// Confirmation delay before force-terminating an idle-reported stream.
    StatusGrace { epoch: u64 },
    /// Recovery watchdog; stage 1 repeats the status query, stage 2 gives up.
    RecoveryWatchdog { epoch: u64, stage: u8 },
}

impl TimerKind {
    pub fn is_stream(&self) -> bool {
        matches!(
            self,
            TimerKind::StatusGrace { .. } | TimerKind::RecoveryWatchdog { .. }
        )
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, TimerKind::Reconnect | TimerKind::Settle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub id: TimerId,
    pub kind: TimerKind,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    timers: Vec<Timer>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, kind: TimerKind, deadline: DateTime<Utc>) {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.push(Timer { id, kind, deadline });
    }

    pub fn has_stream_timers(&self) -> bool {
        self.timers.iter().any(|timer| timer.kind.is_stream())
    }

    pub fn cancel_stream_timers(&mut self) -> usize {
        self.cancel_where(|kind| kind.is_stream())
    }

    pub fn cancel_connection_timers(&mut self) -> usize {
        self.cancel_where(|kind| kind.is_connection())
    }

    fn cancel_where(&mut self, predicate: impl Fn(&TimerKind) -> bool) -> usize {
        let before = self.timers.len();
        self.timers.retain(|timer| !predicate(&timer.kind));
        before - self.timers.len()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.iter().map(|timer| timer.deadline).min()
    }

    /// Removes and returns every timer due at `now`, earliest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Timer> {
        let mut due: Vec<Timer> = Vec::new();
        self.timers.retain(|timer| {
            if timer.deadline <= now {
                due.push(*timer);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|timer| (timer.deadline, timer.id));
        due
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn take_due_returns_in_deadline_order() {
        let now = Utc::now();
        let mut queue = TimerQueue::new();
        queue.arm(TimerKind::Reconnect, now + Duration::seconds(2));
        queue.arm(
            TimerKind::StatusGrace { epoch: 1 },
            now + Duration::seconds(1),
        );
        queue.arm(TimerKind::Settle, now + Duration::seconds(10));

        assert!(queue.take_due(now).is_empty());
        assert_eq!(queue.next_deadline(), Some(now + Duration::seconds(1)));

        let due = queue.take_due(now + Duration::seconds(2));
        let kinds: Vec<_> = due.iter().map(|timer| timer.kind).collect();
        assert_eq!(
            kinds,
            vec![TimerKind::StatusGrace { epoch: 1 }, TimerKind::Reconnect]
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn cancel_by_group_leaves_the_other_group() {
        let now = Utc::now();
        let mut queue = TimerQueue::new();
        queue.arm(TimerKind::Reconnect, now);
        queue.arm(
            TimerKind::RecoveryWatchdog { epoch: 3, stage: 1 },
            now,
        );
        queue.arm(TimerKind::StatusGrace { epoch: 3 }, now);

        assert!(queue.has_stream_timers());
        assert_eq!(queue.cancel_stream_timers(), 2);
        assert!(!queue.has_stream_timers());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.cancel_connection_timers(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.next_deadline(), None);
    }
}
