//! Errors - エラー型と分類
//!
//! - インフラ障害（ストア到達不可など）は `StoreUnavailable`
//! - 他プロセスが先に処理済み、は異常ではなく想定内の結果（`TaskAlreadyHandled`）
//! - ロック競合そのものはエラーにしない（`LockAttempt::Contended` で表現）

use thiserror::Error;

use super::TaskId;
use crate::codec::CodecError;
use crate::ports::StoreError;

/// Operational classification of a [`SchedulerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Infrastructure failure; retrying later may succeed.
    Infrastructure,
    /// Expected outcome of losing a race; not a fault.
    Expected,
    /// Caller passed something unusable.
    Invalid,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("task {0} already handled")]
    TaskAlreadyHandled(TaskId),

    #[error("timer not found: {0}")]
    TimerNotFound(String),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("corrupt task record: {0}")]
    Codec(#[from] CodecError),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::StoreUnavailable(_) | SchedulerError::Codec(_) => {
                ErrorKind::Infrastructure
            }
            SchedulerError::TaskAlreadyHandled(_) | SchedulerError::TimerNotFound(_) => {
                ErrorKind::Expected
            }
            SchedulerError::TaskNotFound(_)
            | SchedulerError::InvalidTask(_)
            | SchedulerError::Config(_) => ErrorKind::Invalid,
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
