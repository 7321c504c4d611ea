//! Store port - 共有ストア（Redis または InMemory）
//!
//! Store は全プロセスの正本（source of truth）です。
//! - タスクの状態・pending index・ロックはすべてここに置く
//! - プロセス間の判断はすべてストアが仲裁する
//! - ローカルのタイマーは「いつ試すか」を決めるだけで、正しさには関与しない
//!
//! # 実装
//! - `InMemoryStore`（テスト・単一ノード用）
//! - `RedisStore`（本番用）

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connectivity or server-side failure.
    #[error("store unreachable: {0}")]
    Unavailable(String),

    /// The key holds a different kind of value than the operation expects.
    #[error("wrong value type at key {0}")]
    WrongType(String),

    /// A multi-operation transaction was rejected; nothing was applied.
    #[error("transaction aborted: {0}")]
    Transaction(String),

    /// The store returned something that does not fit the expected reply.
    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// One step of an atomic [`Store::transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Set (overwrite) the given fields of a hash.
    HashSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
    /// Delete a key; deleting an absent key is not an error.
    Delete { key: String },
    /// Attach a server-side expiry to an existing key.
    Expire { key: String, ttl: Duration },
}

/// Key-value store capabilities the lifecycle engine relies on.
///
/// # 設計原則
/// - `transaction` は all-or-nothing（途中の状態は観測されない）
/// - `set_nx` はロックの基盤（作成できたときだけ `true`）
/// - 失敗時に部分的な副作用を残さない
#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Create `key` with `value` only if it does not exist yet.
    /// Returns `true` when this call created the key.
    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Atomically increment an integer key (absent counts as 0).
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// All fields of a hash; empty when the key is absent.
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Set some fields of a hash, leaving the others untouched.
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns whether a key was actually removed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Apply every op or none of them.
    async fn transaction(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;
}
