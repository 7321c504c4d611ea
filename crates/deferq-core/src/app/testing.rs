//! Test doubles shared by the app tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::lifecycle::TaskLifecycle;
use crate::config::TaskOptions;
use crate::domain::{HttpMethod, TaskId, TaskRecord};
use crate::ports::Executor;

/// Executor that records its calls instead of doing I/O.
pub(crate) struct StubExecutor {
    calls: AtomicUsize,
    succeed: bool,
    latency: Duration,
    seen: Mutex<Vec<(String, HttpMethod)>>,
}

impl StubExecutor {
    fn with(succeed: bool, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            succeed,
            latency,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn ok() -> Arc<Self> {
        Self::with(true, Duration::ZERO)
    }

    pub(crate) fn failing() -> Arc<Self> {
        Self::with(false, Duration::ZERO)
    }

    pub(crate) fn slow(latency: Duration) -> Arc<Self> {
        Self::with(true, latency)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn targets(&self) -> Vec<(String, HttpMethod)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for StubExecutor {
    async fn execute(&self, target: &str, method: HttpMethod) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((target.to_string(), method));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.succeed
    }
}

/// Short lock/backoff so contention tests finish quickly.
pub(crate) fn fast_options(prefix: &str) -> TaskOptions {
    TaskOptions {
        lock_expire_ms: 2_000,
        retry_backoff_ms: 20,
        ..TaskOptions::with_prefix(prefix)
    }
}

/// Poll until the task reaches a terminal status.
pub(crate) async fn wait_terminal(lc: &TaskLifecycle, id: TaskId) -> TaskRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(record) = lc.get(id).await.unwrap() {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task did not reach a terminal status")
}
