//! LifecycleBuilder - エンジンの構築とワイヤリング
//!
//! `build()` はストアに ping し、id カウンタを（未作成なら）0 で初期化します。
//! ストアに届かない場合はここで失敗させます（Fail-fast）。

use std::sync::Arc;

use tracing::info;

use super::keys::KeySpace;
use super::lifecycle::TaskLifecycle;
use crate::config::{SchedulerConfig, TaskOptions};
use crate::domain::{Result, SchedulerError};
use crate::impls::{HttpExecutor, RedisStore};
use crate::ports::{Clock, Executor, Store, SystemClock};

/// # 使用例
/// ```ignore
/// let lifecycle = LifecycleBuilder::new(store, executor)
///     .options(TaskOptions::with_prefix("mail"))
///     .build()
///     .await?;
/// ```
pub struct LifecycleBuilder {
    store: Arc<dyn Store>,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
    options: TaskOptions,
}

impl LifecycleBuilder {
    pub fn new(store: Arc<dyn Store>, executor: Arc<dyn Executor>) -> Self {
        Self {
            store,
            executor,
            clock: Arc::new(SystemClock),
            options: TaskOptions::default(),
        }
    }

    /// Redis ストアと HTTP Executor を設定から組み立てる
    pub async fn from_config(config: &SchedulerConfig) -> Result<Self> {
        let store = RedisStore::connect(&config.store.url).await?;
        let executor = HttpExecutor::new(config.executor.timeout())
            .map_err(|e| SchedulerError::Config(format!("http client: {e}")))?;
        Ok(Self::new(Arc::new(store), Arc::new(executor)).options(config.task.clone()))
    }

    pub fn options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn build(self) -> Result<TaskLifecycle> {
        let options = self.options.normalized()?;
        self.store.ping().await?;

        let keys = KeySpace::new(options.prefix.clone());
        let created = self.store.set_nx(keys.counter(), "0", None).await?;
        info!(
            prefix = keys.prefix(),
            counter_created = created,
            lock_expire_ms = options.lock_expire_ms,
            "task lifecycle ready"
        );

        Ok(TaskLifecycle::from_parts(
            self.store,
            self.executor,
            self.clock,
            options,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::StubExecutor;
    use crate::impls::InMemoryStore;

    #[tokio::test]
    async fn build_initialises_the_counter_once() {
        let store = InMemoryStore::new();
        let exec = StubExecutor::ok();

        let lc = LifecycleBuilder::new(Arc::new(store.clone()), exec.clone())
            .options(TaskOptions::with_prefix("init"))
            .build()
            .await
            .unwrap();
        assert!(store.exists("tasks:ids:init").await.unwrap());
        assert_eq!(store.incr("tasks:ids:init").await.unwrap(), 1);

        // a second process must not reset it
        LifecycleBuilder::new(Arc::new(store.clone()), exec)
            .options(TaskOptions::with_prefix("init"))
            .build()
            .await
            .unwrap();
        assert_eq!(store.incr("tasks:ids:init").await.unwrap(), 2);
        assert_eq!(lc.keys().prefix(), "init");
    }

    #[tokio::test]
    async fn build_fails_fast_without_a_store() {
        let store = InMemoryStore::new();
        store.set_available(false);

        let err = LifecycleBuilder::new(Arc::new(store), StubExecutor::ok())
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SchedulerError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn zero_options_fall_back_to_defaults() {
        let store = InMemoryStore::new();
        let opts = TaskOptions {
            lock_expire_ms: 0,
            expire_secs: 0,
            retry_backoff_ms: 0,
            ..TaskOptions::with_prefix("zero")
        };

        let lc = LifecycleBuilder::new(Arc::new(store), StubExecutor::ok())
            .options(opts)
            .build()
            .await
            .unwrap();
        assert_eq!(lc.options().lock_expire_ms, 500);
        assert_eq!(lc.options().expire_secs, 604_800);
        assert_eq!(lc.options().retry_backoff_ms, 1_000);
    }

    #[tokio::test]
    async fn empty_prefix_is_rejected() {
        let err = LifecycleBuilder::new(Arc::new(InMemoryStore::new()), StubExecutor::ok())
            .options(TaskOptions::with_prefix(""))
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SchedulerError::Config(_)));
    }
}
