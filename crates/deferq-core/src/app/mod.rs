//! App - アプリケーション層
//!
//! ports を組み合わせてタスクのライフサイクルを実装します。
//!
//! # 主要コンポーネント
//! - **LifecycleBuilder**: エンジンの構築とワイヤリング
//! - **TaskLifecycle**: Create / Execute / Complete / Cancel
//! - **DistributedLock**: タスク単位の分散ロック
//! - **TimerRegistry**: プロセスローカルのタイマー
//! - **RecoveryLoop**: pending タスクの再アーム

pub mod builder;
pub mod keys;
pub mod lifecycle;
pub mod lock;
pub mod recovery_loop;
pub mod retry;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use self::builder::LifecycleBuilder;
pub use self::keys::KeySpace;
pub use self::lifecycle::{ExecuteOutcome, TaskLifecycle};
pub use self::lock::{DistributedLock, LockAttempt};
pub use self::recovery_loop::RecoveryLoop;
pub use self::retry::ContentionPolicy;
pub use self::timer::{Drained, TimerRegistry};
