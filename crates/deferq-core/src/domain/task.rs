//! Task record: the durable unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{HttpMethod, TaskId, TaskStatus};

/// A delayed HTTP call tracked through its status lifecycle.
///
/// Design:
/// - The store copy is the single source of truth; this struct is a snapshot.
/// - Status changes go through [`TaskRecord::transition`] so the state machine
///   and the `update_time` monotonicity are checked in one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,

    /// `create_time + delay`. Informational only.
    pub next_time: DateTime<Utc>,

    pub status: TaskStatus,
    pub method: HttpMethod,
    pub target: String,
}

impl TaskRecord {
    /// A freshly created `Pending` record due `delay` after `now`.
    pub fn pending(
        id: TaskId,
        now: DateTime<Utc>,
        delay: Duration,
        method: HttpMethod,
        target: impl Into<String>,
    ) -> Self {
        let next_time = Self::due_at(now, delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id,
            create_time: now,
            update_time: now,
            next_time,
            status: TaskStatus::Pending,
            method,
            target: target.into(),
        }
    }

    /// `now + delay`, or `None` if that is not a representable instant.
    pub fn due_at(now: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
        let delay = chrono::Duration::from_std(delay).ok()?;
        now.checked_add_signed(delay)
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// Move to `next` at instant `at`.
    ///
    /// Returns `false` (and leaves the record untouched) when the edge is not
    /// part of the state machine. `update_time` never goes backwards, even if
    /// `at` does.
    pub fn transition(&mut self, next: TaskStatus, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.update_time = at.max(self.update_time);
        true
    }

    /// Time left until the record is due, zero if already due.
    pub fn remaining_delay(&self, now: DateTime<Utc>) -> Duration {
        (self.next_time - now).to_std().unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, secs).unwrap()
    }

    #[test]
    fn pending_record_has_consistent_times() {
        let rec = TaskRecord::pending(
            TaskId::new(1),
            at(0),
            Duration::from_secs(30),
            HttpMethod::Get,
            "http://ok",
        );

        assert_eq!(rec.status, TaskStatus::Pending);
        assert_eq!(rec.create_time, rec.update_time);
        assert_eq!(rec.next_time, at(30));
        assert_eq!(rec.remaining_delay(at(10)), Duration::from_secs(20));
        assert_eq!(rec.remaining_delay(at(45)), Duration::ZERO);
    }

    #[test]
    fn transition_follows_state_machine() {
        let mut rec =
            TaskRecord::pending(TaskId::new(1), at(0), Duration::ZERO, HttpMethod::Post, "x");

        assert!(rec.transition(TaskStatus::Executing, at(1)));
        assert!(!rec.transition(TaskStatus::Cancelled, at(2)));
        assert_eq!(rec.status, TaskStatus::Executing);
        assert_eq!(rec.update_time, at(1));

        assert!(rec.transition(TaskStatus::Failed, at(3)));
        assert!(!rec.transition(TaskStatus::Pending, at(4)));
        assert_eq!(rec.status, TaskStatus::Failed);
    }

    #[test]
    fn update_time_never_goes_backwards() {
        let mut rec =
            TaskRecord::pending(TaskId::new(1), at(10), Duration::ZERO, HttpMethod::Get, "x");

        assert!(rec.transition(TaskStatus::Cancelled, at(5)));
        assert_eq!(rec.update_time, at(10));
        assert!(rec.update_time >= rec.create_time);
    }

    #[test]
    fn due_at_rejects_unrepresentable_delays() {
        assert_eq!(TaskRecord::due_at(at(0), Duration::from_secs(5)), Some(at(5)));
        assert_eq!(TaskRecord::due_at(at(0), Duration::MAX), None);
        assert_eq!(TaskRecord::due_at(at(0), Duration::from_secs(u64::MAX / 2)), None);
    }
}
