//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: テスト・単一ノード用のストア
//! - **RedisStore**: 本番用のストア（複数プロセスで共有）
//! - **HttpExecutor**: reqwest で target を呼び出す Executor

pub mod http_executor;
pub mod memory_store;
pub mod redis_store;

pub use self::http_executor::HttpExecutor;
pub use self::memory_store::InMemoryStore;
pub use self::redis_store::RedisStore;
