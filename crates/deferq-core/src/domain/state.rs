//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a task record.
///
/// State transitions:
/// - Pending -> Executing -> Completed
/// - Pending -> Executing -> Failed
/// - Pending -> Cancelled
///
/// Nothing ever moves back to `Pending`, and `Executing` is only left for a
/// terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its timer to fire.
    Pending,

    /// A process holds the task lock and is calling the executor.
    Executing,

    /// The executor reported success.
    Completed,

    /// Cancelled before execution started.
    Cancelled,

    /// The executor reported failure.
    Failed,
}

impl TaskStatus {
    /// Integer code stored in the `status` hash field.
    pub fn code(self) -> u8 {
        match self {
            TaskStatus::Pending => 1,
            TaskStatus::Executing => 2,
            TaskStatus::Completed => 3,
            TaskStatus::Cancelled => 4,
            TaskStatus::Failed => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TaskStatus::Pending),
            2 => Some(TaskStatus::Executing),
            3 => Some(TaskStatus::Completed),
            4 => Some(TaskStatus::Cancelled),
            5 => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Is this a terminal status (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Executing)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Executing, TaskStatus::Completed)
                | (TaskStatus::Executing, TaskStatus::Failed)
        )
    }

    /// Terminal status for an executor result.
    pub fn from_outcome(success: bool) -> Self {
        if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Executing => "executing",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Executing,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
        TaskStatus::Failed,
    ];

    #[rstest]
    #[case(TaskStatus::Pending, 1)]
    #[case(TaskStatus::Executing, 2)]
    #[case(TaskStatus::Completed, 3)]
    #[case(TaskStatus::Cancelled, 4)]
    #[case(TaskStatus::Failed, 5)]
    fn status_codes_are_stable(#[case] status: TaskStatus, #[case] code: u8) {
        assert_eq!(status.code(), code);
        assert_eq!(TaskStatus::from_code(code), Some(status));
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert_eq!(TaskStatus::from_code(0), None);
        assert_eq!(TaskStatus::from_code(6), None);
    }

    #[test]
    fn nothing_returns_to_pending() {
        for from in ALL {
            assert!(!from.can_transition_to(TaskStatus::Pending), "{from} -> pending");
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[rstest]
    #[case(TaskStatus::Executing, TaskStatus::Cancelled)]
    #[case(TaskStatus::Pending, TaskStatus::Completed)]
    #[case(TaskStatus::Pending, TaskStatus::Failed)]
    fn shortcut_transitions_are_invalid(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn outcome_maps_to_terminal_status() {
        assert_eq!(TaskStatus::from_outcome(true), TaskStatus::Completed);
        assert_eq!(TaskStatus::from_outcome(false), TaskStatus::Failed);
    }
}
