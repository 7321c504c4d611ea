//! Executor port - タスクの副作用（HTTP 呼び出しなど）
//!
//! エンジンは target を解釈しません。成功・失敗の真偽値だけを受け取ります。

use async_trait::async_trait;

use crate::domain::HttpMethod;

/// Performs the side effect of a task.
///
/// Returns `true` on success. Transport errors are folded into `false`; the
/// engine records them as `Failed` and never retries.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, target: &str, method: HttpMethod) -> bool;
}
