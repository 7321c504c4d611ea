//! TaskLifecycle - タスクのライフサイクルエンジン
//!
//! Create / Execute / Complete / Cancel をストア・分散ロック・タイマー・
//! Executor の上で組み立てます。
//!
//! # 不変条件
//! - pending index に id がある ⇔ record.status == Pending
//! - Pending から出る遷移は、index からの削除と同一トランザクション
//! - status の変更はロック保持中のみ（作成時の Pending 書き込みを除く）
//! - インフラ障害でプロセスを落とさない（エラーを返すかログに残す）

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::keys::KeySpace;
use super::lock::{DistributedLock, LockAttempt};
use super::retry::ContentionPolicy;
use super::timer::TimerRegistry;
use crate::codec;
use crate::config::TaskOptions;
use crate::domain::{
    ErrorKind, HttpMethod, Result, SchedulerError, TaskId, TaskRecord, TaskStatus,
};
use crate::ports::{Clock, Executor, Store, StoreError, StoreOp};

/// What a timer-driven execution attempt ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// This process ran the executor; the task ended in this status.
    Finished(TaskStatus),

    /// While waiting for the lock, the task left `Pending` elsewhere.
    /// `attempts` counts lock attempts including the first.
    Superseded { status: TaskStatus, attempts: u32 },

    /// Stopped contending after `attempts` tries; the task is still `Pending`.
    Abandoned { attempts: u32 },
}

pub(crate) struct Engine {
    store: Arc<dyn Store>,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
    keys: KeySpace,
    lock: DistributedLock,
    timers: TimerRegistry,
    options: TaskOptions,
    contention: ContentionPolicy,
    closing: AtomicBool,
}

/// Handle to the lifecycle engine of one scheduler namespace.
///
/// Cheap to clone. When the last clone is dropped the engine's sleeping
/// timers are aborted; tasks they would have run stay `Pending` in the store
/// for [`recover_pending`](Self::recover_pending) to pick up.
#[derive(Clone)]
pub struct TaskLifecycle {
    engine: Arc<Engine>,
}

impl TaskLifecycle {
    /// Assemble an engine. Store initialisation is the builder's job.
    pub(crate) fn from_parts(
        store: Arc<dyn Store>,
        executor: Arc<dyn Executor>,
        clock: Arc<dyn Clock>,
        options: TaskOptions,
    ) -> Self {
        let keys = KeySpace::new(options.prefix.clone());
        let lock = DistributedLock::new(Arc::clone(&store), keys.clone());
        let contention = ContentionPolicy::from_options(&options);
        Self {
            engine: Arc::new(Engine {
                store,
                executor,
                clock,
                keys,
                lock,
                timers: TimerRegistry::new(),
                options,
                contention,
                closing: AtomicBool::new(false),
            }),
        }
    }

    pub fn options(&self) -> &TaskOptions {
        &self.engine.options
    }

    pub fn keys(&self) -> &KeySpace {
        &self.engine.keys
    }

    /// Register a task that runs `delay` from now.
    ///
    /// The record and its pending-index entry are written in one transaction;
    /// the local timer is armed only after that succeeds.
    pub async fn create(
        &self,
        delay: Duration,
        method: HttpMethod,
        target: impl Into<String>,
    ) -> Result<TaskRecord> {
        let target = target.into();
        if target.trim().is_empty() {
            return Err(SchedulerError::InvalidTask("target must not be empty".into()));
        }

        let e = &self.engine;
        let now = e.clock.now();
        match TaskRecord::due_at(now, delay) {
            Some(due) if codec::is_encodable(due) => {}
            _ => {
                return Err(SchedulerError::InvalidTask(format!(
                    "delay {delay:?} puts the task beyond year 9999"
                )));
            }
        }

        let raw = e.store.incr(e.keys.counter()).await?;
        let id = u64::try_from(raw)
            .map(TaskId::new)
            .map_err(|_| StoreError::Malformed(format!("task counter went negative: {raw}")))?;

        let record = TaskRecord::pending(id, now, delay, method, target);
        e.store
            .transaction(vec![
                StoreOp::HashSet {
                    key: e.keys.record(id),
                    fields: codec::encode(&record),
                },
                StoreOp::SetAdd {
                    key: e.keys.pending().to_string(),
                    member: id.to_string(),
                },
            ])
            .await?;

        e.arm(id, delay);
        info!(
            task_id = %id,
            prefix = e.keys.prefix(),
            %method,
            target = %record.target,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "task created"
        );
        Ok(record)
    }

    /// Cancel a task that has not started executing.
    ///
    /// Fails with `TaskAlreadyHandled` if the task is executing (its lock is
    /// held) or already terminal.
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        let e = &self.engine;
        let ttl = e.options.lock_expire();

        let mut attempt = e.lock.acquire(id, ttl).await?;
        if !attempt.is_acquired() {
            tokio::time::sleep(e.contention.backoff).await;
            attempt = e.lock.acquire(id, ttl).await?;
        }
        if !attempt.is_acquired() {
            debug!(task_id = %id, "cancel lost the lock race");
            return Err(SchedulerError::TaskAlreadyHandled(id));
        }

        let mut record = match e.load(id).await {
            Ok(record) => record,
            Err(err) => {
                e.release_quietly(id).await;
                return Err(err);
            }
        };
        if !record.transition(TaskStatus::Cancelled, e.clock.now()) {
            e.release_quietly(id).await;
            return Err(SchedulerError::TaskAlreadyHandled(id));
        }

        // The transaction also deletes the lock.
        if let Err(err) = e
            .store
            .transaction(e.terminate_ops(id, TaskStatus::Cancelled, record.update_time))
            .await
        {
            e.release_quietly(id).await;
            return Err(err.into());
        }

        if let Err(err) = e.timers.stop(&e.keys.record(id)) {
            // armed by another process, or lost with a restart
            debug!(task_id = %id, error = %err, "no local timer to stop");
        }
        info!(task_id = %id, "task cancelled");
        Ok(())
    }

    /// Current record, `None` if it never existed or has expired.
    pub async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        let e = &self.engine;
        let fields = e.store.hget_all(&e.keys.record(id)).await?;
        Ok(codec::decode(&fields)?)
    }

    /// Ids currently in the pending index, ascending.
    pub async fn pending_ids(&self) -> Result<Vec<TaskId>> {
        let e = &self.engine;
        let mut ids: Vec<TaskId> = e
            .store
            .set_members(e.keys.pending())
            .await?
            .into_iter()
            .filter_map(|raw| match raw.parse::<TaskId>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(member = %raw, "ignoring malformed pending index entry");
                    None
                }
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Arm a local timer for every pending task that has none in this process.
    ///
    /// Returns how many timers were armed. Overdue tasks fire immediately.
    pub async fn recover_pending(&self) -> Result<usize> {
        let e = &self.engine;
        let mut armed = 0;
        for id in self.pending_ids().await? {
            if e.timers.contains(&e.keys.record(id)) {
                continue;
            }
            match e.load(id).await {
                Ok(record) if record.is_pending() => {
                    e.arm(id, record.remaining_delay(e.clock.now()));
                    armed += 1;
                }
                Ok(record) => {
                    warn!(task_id = %id, status = %record.status, "pending index out of sync with record");
                }
                Err(SchedulerError::TaskNotFound(_)) => {
                    warn!(task_id = %id, "pending index lists a missing record");
                }
                Err(err) => return Err(err),
            }
        }
        if armed > 0 {
            info!(armed, prefix = e.keys.prefix(), "re-armed pending tasks");
        }
        Ok(armed)
    }

    pub fn is_armed(&self, id: TaskId) -> bool {
        self.engine.timers.contains(&self.engine.keys.record(id))
    }

    pub fn armed_timers(&self) -> usize {
        self.engine.timers.len()
    }

    /// Stop the engine's timers.
    ///
    /// Timers still sleeping are aborted and their tasks stay `Pending` in
    /// the store. Timers that already fired are awaited, so a task that is
    /// executing reaches its terminal status first. Contention and
    /// terminal-write retries give up once shutdown has begun.
    ///
    /// Returns how many sleeping timers were aborted.
    pub async fn shutdown(&self) -> usize {
        self.engine.closing.store(true, Ordering::SeqCst);
        let drained = self.engine.timers.shutdown();
        let running = drained.running.len();
        for handle in drained.running {
            if let Err(err) = handle.await {
                error!(error = %err, "timer callback failed during shutdown");
            }
        }
        info!(aborted = drained.aborted, running, "lifecycle timers stopped");
        drained.aborted
    }
}

impl Engine {
    fn arm(self: &Arc<Self>, id: TaskId, delay: Duration) {
        let key = self.keys.record(id);
        let own_key = key.clone();
        let engine = Arc::downgrade(self);
        self.timers.arm(key, delay, async move {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            engine.fire(id).await;
            engine.timers.remove(&own_key);
        });
    }

    /// Timer callback: run `execute` and log whatever happens.
    async fn fire(&self, id: TaskId) {
        match self.execute(id).await {
            Ok(ExecuteOutcome::Finished(status)) => {
                debug!(task_id = %id, %status, "timer run finished");
            }
            Ok(ExecuteOutcome::Superseded { status, .. }) => {
                info!(task_id = %id, %status, "task handled by another process");
            }
            Ok(ExecuteOutcome::Abandoned { attempts }) => {
                warn!(task_id = %id, attempts, "gave up waiting for task lock; task stays pending");
            }
            Err(err) => match err.kind() {
                ErrorKind::Expected => info!(task_id = %id, error = %err, "task already handled"),
                ErrorKind::Infrastructure => {
                    error!(task_id = %id, error = %err, "task execution aborted")
                }
                ErrorKind::Invalid => warn!(task_id = %id, error = %err, "task cannot run"),
            },
        }
    }

    /// Acquire the task lock (retrying under contention) and run the task.
    pub(crate) async fn execute(&self, id: TaskId) -> Result<ExecuteOutcome> {
        let ttl = self.options.lock_expire();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.lock.acquire(id, ttl).await? {
                LockAttempt::Acquired => break,
                LockAttempt::Contended => {
                    let record = self.load(id).await?;
                    if !record.is_pending() {
                        return Ok(ExecuteOutcome::Superseded {
                            status: record.status,
                            attempts,
                        });
                    }
                    if self.is_closing() {
                        return Ok(ExecuteOutcome::Abandoned { attempts });
                    }
                    match self.contention.next_delay(attempts) {
                        Some(delay) => {
                            debug!(task_id = %id, attempts, "task lock contended, backing off");
                            tokio::time::sleep(delay).await;
                        }
                        None => return Ok(ExecuteOutcome::Abandoned { attempts }),
                    }
                }
            }
        }
        self.run_locked(id).await
    }

    /// Everything after a successful acquire. Releases the lock on every
    /// path that does not reach the terminate transaction.
    async fn run_locked(&self, id: TaskId) -> Result<ExecuteOutcome> {
        let mut record = match self.load(id).await {
            Ok(record) => record,
            Err(err) => {
                self.release_quietly(id).await;
                return Err(err);
            }
        };
        if !record.transition(TaskStatus::Executing, self.clock.now()) {
            self.release_quietly(id).await;
            return Err(SchedulerError::TaskAlreadyHandled(id));
        }

        let fields = codec::encode_status(record.status, record.update_time);
        if let Err(err) = self.store.hset(&self.keys.record(id), &fields).await {
            self.release_quietly(id).await;
            return Err(err.into());
        }

        info!(task_id = %id, method = %record.method, target = %record.target, "executing task");
        let success = self.executor.execute(&record.target, record.method).await;

        // The call has happened; keep trying until the outcome is recorded.
        let mut failures = 0u32;
        loop {
            match self.complete(id, success).await {
                Ok(status) => return Ok(ExecuteOutcome::Finished(status)),
                Err(err) if err.kind() == ErrorKind::Infrastructure && !self.is_closing() => {
                    failures += 1;
                    warn!(task_id = %id, failures, error = %err, "terminal write failed, retrying");
                    tokio::time::sleep(self.contention.backoff).await;
                }
                Err(err) => {
                    error!(task_id = %id, success, error = %err, "task executed but outcome not recorded");
                    return Err(err);
                }
            }
        }
    }

    /// Write the terminal status for an executed task, drop it from the
    /// pending index, delete its lock and forget its timer.
    pub(crate) async fn complete(&self, id: TaskId, success: bool) -> Result<TaskStatus> {
        let status = TaskStatus::from_outcome(success);
        let record = self.load(id).await?;
        let at = self.clock.now().max(record.update_time);
        self.store
            .transaction(self.terminate_ops(id, status, at))
            .await?;
        self.timers.remove(&self.keys.record(id));
        info!(task_id = %id, %status, "task finished");
        Ok(status)
    }

    fn terminate_ops(&self, id: TaskId, status: TaskStatus, at: DateTime<Utc>) -> Vec<StoreOp> {
        let record_key = self.keys.record(id);
        vec![
            StoreOp::HashSet {
                key: record_key.clone(),
                fields: codec::encode_status(status, at),
            },
            StoreOp::SetRemove {
                key: self.keys.pending().to_string(),
                member: id.to_string(),
            },
            StoreOp::Delete {
                key: self.keys.lock(id),
            },
            StoreOp::Expire {
                key: record_key,
                ttl: self.options.expire(),
            },
        ]
    }

    async fn load(&self, id: TaskId) -> Result<TaskRecord> {
        let fields = self.store.hget_all(&self.keys.record(id)).await?;
        codec::decode(&fields)?.ok_or(SchedulerError::TaskNotFound(id))
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    async fn release_quietly(&self, id: TaskId) {
        if let Err(err) = self.lock.release(id).await {
            warn!(task_id = %id, error = %err, "failed to release task lock; it will expire");
        }
    }
}
