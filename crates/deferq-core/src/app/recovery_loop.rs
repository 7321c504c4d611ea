//! RecoveryLoop - pending タスクの定期的な再アーム
//!
//! タイマーはプロセスローカルなので、作成したプロセスが落ちると
//! そのタスクを起こす者がいなくなります。このループは一定間隔で
//! pending index を走査し、ローカルにタイマーの無いタスクを再アームします。
//!
//! - `shutdown_tx` を送るとループが止まる
//! - `shutdown_and_join()` で終了を待てる

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::lifecycle::TaskLifecycle;

/// Scans are never closer together than this.
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_millis(1);

pub struct RecoveryLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RecoveryLoop {
    /// Scan immediately, then every `interval` (at least [`MIN_SCAN_INTERVAL`]).
    pub fn spawn(lifecycle: TaskLifecycle, interval: Duration) -> Self {
        let interval = interval.max(MIN_SCAN_INTERVAL);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown_rx.changed() => continue,
                    _ = ticker.tick() => {}
                }
                match lifecycle.recover_pending().await {
                    Ok(armed) => debug!(armed, "recovery scan done"),
                    // store blips are expected; try again next tick
                    Err(err) => warn!(error = %err, "recovery scan failed"),
                }
            }
        });
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            error!(error = %err, "recovery loop terminated abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::app::LifecycleBuilder;
    use crate::app::testing::{StubExecutor, fast_options, wait_terminal};
    use crate::domain::{HttpMethod, TaskStatus};
    use crate::impls::InMemoryStore;

    #[tokio::test]
    async fn picks_up_tasks_left_by_a_stopped_process() {
        let store = InMemoryStore::new();
        let exec_a = StubExecutor::ok();
        let exec_b = StubExecutor::ok();
        let a = LifecycleBuilder::new(Arc::new(store.clone()), exec_a.clone())
            .options(fast_options("loop"))
            .build()
            .await
            .unwrap();
        let b = LifecycleBuilder::new(Arc::new(store.clone()), exec_b.clone())
            .options(fast_options("loop"))
            .build()
            .await
            .unwrap();

        let id = a
            .create(Duration::from_millis(30), HttpMethod::Get, "http://ok")
            .await
            .unwrap()
            .id;
        a.shutdown().await;

        let recovery = RecoveryLoop::spawn(b.clone(), Duration::from_millis(20));
        assert_eq!(wait_terminal(&b, id).await.status, TaskStatus::Completed);
        recovery.shutdown_and_join().await;

        assert_eq!(exec_a.calls(), 0);
        assert_eq!(exec_b.calls(), 1);
    }

    #[tokio::test]
    async fn keeps_running_through_store_outages() {
        let store = InMemoryStore::new();
        let lc = LifecycleBuilder::new(Arc::new(store.clone()), StubExecutor::ok())
            .options(fast_options("outage"))
            .build()
            .await
            .unwrap();

        store.set_available(false);
        let recovery = RecoveryLoop::spawn(lc.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!recovery.join.is_finished());

        store.set_available(true);
        recovery.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn zero_interval_is_clamped_not_fatal() {
        let store = InMemoryStore::new();
        let exec = StubExecutor::ok();
        let lc = LifecycleBuilder::new(Arc::new(store.clone()), exec.clone())
            .options(fast_options("zero"))
            .build()
            .await
            .unwrap();
        let id = lc
            .create(Duration::from_secs(3600), HttpMethod::Get, "http://ok")
            .await
            .unwrap()
            .id;
        lc.shutdown().await;

        let recovery = RecoveryLoop::spawn(lc.clone(), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!recovery.join.is_finished());
        assert!(lc.is_armed(id));

        recovery.shutdown_and_join().await;
    }
}
