//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（Redis, HTTP など）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 共有ストアが source of truth（正本）
//! - Executor は成功・失敗だけを返す
//! - 時刻は Clock 経由で取得（テストで固定できる）

pub mod clock;
pub mod executor;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::Executor;
pub use self::store::{Store, StoreError, StoreOp};
