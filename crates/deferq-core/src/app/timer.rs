//! Process-local timer registry.
//!
//! Maps a task key to the tokio task sleeping until the task is due. The
//! registry is owned by one engine and dies with it; dropping it aborts every
//! timer that has not fired yet.
//!
//! A timer is aborted only while it is still sleeping. Once the delay has
//! elapsed its callback owns the task and runs to completion; `shutdown`
//! hands those callbacks back so the owner can wait for them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::domain::SchedulerError;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const ABORTED: u8 = 2;

/// A scheduled, cancelable deferred callback.
#[derive(Debug)]
pub(crate) struct TimerHandle {
    handle: JoinHandle<()>,
    state: Arc<AtomicU8>,
}

impl TimerHandle {
    /// Abort unless the callback has already started. Returns the handle back
    /// when it has.
    fn abort_if_sleeping(self) -> Option<JoinHandle<()>> {
        match self
            .state
            .compare_exchange(ARMED, ABORTED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.handle.abort();
                None
            }
            Err(_) => Some(self.handle),
        }
    }
}

/// What [`TimerRegistry::shutdown`] did.
#[derive(Debug, Default)]
pub struct Drained {
    /// Timers stopped before their delay elapsed.
    pub aborted: usize,

    /// Callbacks that were already running; await them to let them finish.
    pub running: Vec<JoinHandle<()>>,
}

#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<String, TimerHandle>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<String, TimerHandle>> {
        // A panic while holding the guard cannot leave the map half-updated.
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `callback` once `delay` has elapsed.
    ///
    /// Re-arming a key aborts the timer it replaces. Delays too large for the
    /// clock sleep forever. Must be called from within a tokio runtime.
    pub fn arm<F>(&self, key: impl Into<String>, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let state = Arc::new(AtomicU8::new(ARMED));
        let task_state = Arc::clone(&state);
        // Spawn while holding the guard: a callback that finishes instantly
        // and removes its own key must not run before the insert below.
        let mut timers = self.timers();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if task_state
                .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                callback.await;
            }
        });
        if let Some(old) = timers.insert(key, TimerHandle { handle, state }) {
            old.handle.abort();
        }
    }

    /// Abort and forget the timer for `key`, even if its callback is running.
    /// `false` if none was armed.
    pub fn cancel(&self, key: &str) -> bool {
        match self.timers().remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Like [`cancel`](Self::cancel) but reports a missing timer as an error.
    pub fn stop(&self, key: &str) -> Result<(), SchedulerError> {
        if self.cancel(key) {
            Ok(())
        } else {
            Err(SchedulerError::TimerNotFound(key.to_string()))
        }
    }

    /// Forget the timer for `key` without aborting it. Used by the callback
    /// itself once it has run.
    pub fn remove(&self, key: &str) -> bool {
        self.timers().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.timers().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.timers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers().is_empty()
    }

    /// Empty the registry: abort sleeping timers, return running callbacks.
    pub fn shutdown(&self) -> Drained {
        let drained: Vec<_> = self.timers().drain().map(|(_, timer)| timer).collect();
        let mut out = Drained::default();
        for timer in drained {
            match timer.abort_if_sleeping() {
                None => out.aborted += 1,
                Some(handle) => out.running.push(handle),
            }
        }
        out
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, timer) in timers.drain() {
            // running callbacks are detached
            let _ = timer.abort_if_sleeping();
        }
    }
}
