//! Contention policy: how long to wait between lock attempts, and when to stop.

use std::time::Duration;

use crate::config::TaskOptions;

/// Retry policy for a contended task lock.
///
/// Fixed backoff. The loop in `execute` also stops as soon as it sees the task
/// leave `Pending`, so `max_attempts` only matters when a lock holder keeps
/// the task `Pending` for a long time (e.g. a crashed process whose lock has
/// not expired yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentionPolicy {
    pub backoff: Duration,

    /// `None` means retry until the task leaves `Pending`.
    pub max_attempts: Option<u32>,
}

impl ContentionPolicy {
    pub fn from_options(options: &TaskOptions) -> Self {
        Self {
            backoff: options.retry_backoff(),
            max_attempts: options.max_lock_attempts,
        }
    }

    /// Delay before attempt `attempts + 1`, or `None` once the budget is spent.
    ///
    /// # Arguments
    /// * `attempts` - Number of attempts already made (1-indexed).
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempts >= max => None,
            _ => Some(self.backoff),
        }
    }
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        Self::from_options(&TaskOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_unbounded_one_second() {
        let policy = ContentionPolicy::default();
        assert_eq!(policy.backoff, Duration::from_secs(1));
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(10_000), Some(Duration::from_secs(1)));
    }

    #[test]
    fn bounded_policy_stops_at_max() {
        let policy = ContentionPolicy {
            backoff: Duration::from_millis(10),
            max_attempts: Some(3),
        };

        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(10)));
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn built_from_task_options() {
        let opts = TaskOptions {
            retry_backoff_ms: 250,
            max_lock_attempts: Some(8),
            ..TaskOptions::default()
        };
        let policy = ContentionPolicy::from_options(&opts);
        assert_eq!(policy.backoff, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, Some(8));
    }
}
