//! Downtime session tracking.
//!
//! Keeps one open session per target while it is down. Sessions live only
//! in process memory; a restart forgets outages that were in flight, so
//! their recovery notifications are silently skipped.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::db::TargetStatus;

#[derive(Debug, Clone, Copy)]
struct Session {
    started_at: DateTime<Utc>,
}

/// What a status transition implies for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DowntimeEvent {
    /// The target just went down.
    WentDown,
    /// The target recovered after this many whole minutes of downtime.
    Recovered { minutes: i64 },
}

/// Per-target downtime state machine.
#[derive(Default)]
pub struct DowntimeTracker {
    sessions: Mutex<HashMap<i64, Session>>,
}

impl DowntimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status transition and return the alert-worthy event, if
    /// any. Repeated down checks keep the original session; a recovery
    /// without an open session (post-restart) is a no-op.
    pub fn transition(
        &self,
        target_id: i64,
        previous: TargetStatus,
        current: TargetStatus,
        now: DateTime<Utc>,
    ) -> Option<DowntimeEvent> {
        let was_down = previous == TargetStatus::Down;
        let is_down = current == TargetStatus::Down;

        let mut sessions = self.sessions.lock().unwrap();

        if !was_down && is_down {
            sessions.insert(target_id, Session { started_at: now });
            return Some(DowntimeEvent::WentDown);
        }

        if was_down && !is_down {
            if let Some(session) = sessions.remove(&target_id) {
                let minutes = (now - session.started_at).num_minutes();
                return Some(DowntimeEvent::Recovered { minutes });
            }
        }

        None
    }

    /// Drop any open session for a deleted target.
    pub fn forget(&self, target_id: i64) {
        self.sessions.lock().unwrap().remove(&target_id);
    }

    /// Number of currently open sessions.
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_going_down_opens_one_session() {
        let tracker = DowntimeTracker::new();
        let now = Utc::now();

        let event = tracker.transition(1, TargetStatus::Up, TargetStatus::Down, now);
        assert_eq!(event, Some(DowntimeEvent::WentDown));
        assert_eq!(tracker.open_sessions(), 1);
    }

    #[test]
    fn test_unknown_to_down_opens_session() {
        let tracker = DowntimeTracker::new();
        let event = tracker.transition(1, TargetStatus::Unknown, TargetStatus::Down, Utc::now());
        assert_eq!(event, Some(DowntimeEvent::WentDown));
    }

    #[test]
    fn test_repeated_down_is_no_op() {
        let tracker = DowntimeTracker::new();
        let start = Utc::now();

        tracker.transition(1, TargetStatus::Up, TargetStatus::Down, start);
        let event = tracker.transition(
            1,
            TargetStatus::Down,
            TargetStatus::Down,
            start + Duration::minutes(5),
        );

        assert_eq!(event, None);
        assert_eq!(tracker.open_sessions(), 1);

        // Recovery still measures from the original session start
        let event = tracker.transition(
            1,
            TargetStatus::Down,
            TargetStatus::Up,
            start + Duration::minutes(10),
        );
        assert_eq!(event, Some(DowntimeEvent::Recovered { minutes: 10 }));
    }

    #[test]
    fn test_recovery_floors_duration_to_minutes() {
        let tracker = DowntimeTracker::new();
        let start = Utc::now();

        tracker.transition(7, TargetStatus::Up, TargetStatus::Down, start);
        let event = tracker.transition(
            7,
            TargetStatus::Down,
            TargetStatus::Up,
            start + Duration::seconds(90),
        );

        assert_eq!(event, Some(DowntimeEvent::Recovered { minutes: 1 }));
        assert_eq!(tracker.open_sessions(), 0);
    }

    #[test]
    fn test_up_to_up_is_no_op() {
        let tracker = DowntimeTracker::new();
        let event = tracker.transition(1, TargetStatus::Up, TargetStatus::Up, Utc::now());
        assert_eq!(event, None);
        assert_eq!(tracker.open_sessions(), 0);
    }

    #[test]
    fn test_recovery_without_session_is_no_op() {
        // A restart mid-outage loses the session; the recovery check
        // must not fabricate a duration
        let tracker = DowntimeTracker::new();
        let event = tracker.transition(1, TargetStatus::Down, TargetStatus::Up, Utc::now());
        assert_eq!(event, None);
    }

    #[test]
    fn test_forget_drops_session() {
        let tracker = DowntimeTracker::new();
        tracker.transition(1, TargetStatus::Up, TargetStatus::Down, Utc::now());
        tracker.forget(1);
        assert_eq!(tracker.open_sessions(), 0);
    }
}
