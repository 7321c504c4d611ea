//! deferq-core
//!
//! Redis を共有ストアとする分散遅延タスクスケジューラのコア。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, method, state, task, errors）
//! - **codec**: TaskRecord とストアのハッシュ表現の相互変換
//! - **ports**: 抽象化レイヤー（Store, Executor, Clock）
//! - **impls**: 実装（InMemoryStore, RedisStore, HttpExecutor）
//! - **app**: ライフサイクルエンジン（lock, timer, lifecycle, builder, recovery_loop）
//! - **config**: figment による設定読み込み

pub mod app;
pub mod codec;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use crate::app::{ExecuteOutcome, LifecycleBuilder, RecoveryLoop, TaskLifecycle};
pub use crate::config::{SchedulerConfig, TaskOptions};
pub use crate::domain::{HttpMethod, Result, SchedulerError, TaskId, TaskRecord, TaskStatus};
