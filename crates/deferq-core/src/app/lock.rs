//! DistributedLock - タスク単位の分散ロック
//!
//! `SET tasks:lock:<id> 1 NX PX <ttl>` で取得し、`DEL` で解放します。
//!
//! # 注意: lease（延長）はありません
//! Executor の実行が TTL を超えると、ロックは実行途中で失効します。
//! その後に別プロセスがロックを取っても、ロック下で status を読み直すので
//! `Executing` のタスクを再実行することはありません。ただし
//! 「status 読み込み → Executing 書き込み」の間に TTL が切れると二重実行の
//! 余地が残るため、TTL は Executor の想定最大レイテンシより十分長く設定すること。

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::keys::KeySpace;
use crate::domain::TaskId;
use crate::ports::{Store, StoreError};

const LOCK_MARKER: &str = "1";

/// Result of one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    /// Somebody else currently holds the lock.
    Contended,
}

impl LockAttempt {
    pub fn is_acquired(self) -> bool {
        self == LockAttempt::Acquired
    }
}

/// TTL-bound, cross-process mutual exclusion keyed by task id.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn Store>,
    keys: KeySpace,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn Store>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    pub async fn acquire(&self, id: TaskId, ttl: Duration) -> Result<LockAttempt, StoreError> {
        let created = self
            .store
            .set_nx(&self.keys.lock(id), LOCK_MARKER, Some(ttl))
            .await?;
        debug!(task_id = %id, acquired = created, "lock attempt");
        Ok(if created {
            LockAttempt::Acquired
        } else {
            LockAttempt::Contended
        })
    }

    /// Delete the lock key unconditionally. Callers must own the lock.
    pub async fn release(&self, id: TaskId) -> Result<(), StoreError> {
        self.store.del(&self.keys.lock(id)).await?;
        Ok(())
    }

    pub async fn is_held(&self, id: TaskId) -> Result<bool, StoreError> {
        self.store.exists(&self.keys.lock(id)).await
    }
}
