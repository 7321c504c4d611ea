use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::domain::SchedulerError;

pub const DEFAULT_PREFIX: &str = "default";
pub const DEFAULT_LOCK_EXPIRE_MS: u64 = 500;
pub const DEFAULT_EXPIRE_SECS: u64 = 7 * 24 * 3600;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1/";
pub const DEFAULT_EXECUTOR_TIMEOUT_MS: u64 = 10_000;

/// Top-level config (deferq.toml + DEFERQ_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub task: TaskOptions,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

/// Per-namespace task options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Namespace for every key this scheduler writes.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// TTL of the per-task execution lock. There is no renewal: this is the
    /// longest an executor call may take before another process could take
    /// the lock over.
    #[serde(default = "default_lock_expire_ms")]
    pub lock_expire_ms: u64,

    /// How long terminal records are kept before the store expires them.
    #[serde(default = "default_expire_secs")]
    pub expire_secs: u64,

    /// Pause between lock attempts while another process holds the lock.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Give up contending for a lock after this many attempts (unbounded if unset).
    #[serde(default)]
    pub max_lock_attempts: Option<u32>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            lock_expire_ms: DEFAULT_LOCK_EXPIRE_MS,
            expire_secs: DEFAULT_EXPIRE_SECS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_lock_attempts: None,
        }
    }
}

impl TaskOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Replace zero values with defaults and reject an empty prefix.
    pub fn normalized(mut self) -> Result<Self, SchedulerError> {
        if self.prefix.trim().is_empty() {
            return Err(SchedulerError::Config("task prefix must not be empty".into()));
        }
        if self.lock_expire_ms == 0 {
            self.lock_expire_ms = DEFAULT_LOCK_EXPIRE_MS;
        }
        if self.expire_secs == 0 {
            self.expire_secs = DEFAULT_EXPIRE_SECS;
        }
        if self.retry_backoff_ms == 0 {
            self.retry_backoff_ms = DEFAULT_RETRY_BACKOFF_MS;
        }
        if self.max_lock_attempts == Some(0) {
            self.max_lock_attempts = None;
        }
        Ok(self)
    }

    pub fn lock_expire(&self) -> Duration {
        Duration::from_millis(self.lock_expire_ms)
    }

    pub fn expire(&self) -> Duration {
        Duration::from_secs(self.expire_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_executor_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_EXECUTOR_TIMEOUT_MS,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SchedulerConfig {
    /// Load defaults, then `path` (if given and present), then `DEFERQ_*`
    /// env vars (`DEFERQ_TASK__PREFIX=jobs`).
    pub fn load(path: Option<&str>) -> Result<Self, SchedulerError> {
        let mut figment = Figment::from(Serialized::defaults(SchedulerConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        Self::extract(figment.merge(Env::prefixed("DEFERQ_").split("__")))
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, SchedulerError> {
        Self::extract(
            Figment::from(Serialized::defaults(SchedulerConfig::default()))
                .merge(Toml::string(toml)),
        )
    }

    fn extract(figment: Figment) -> Result<Self, SchedulerError> {
        let mut config: SchedulerConfig = figment
            .extract()
            .map_err(|e| SchedulerError::Config(e.to_string()))?;
        config.task = config.task.normalized()?;
        Ok(config)
    }
}

fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_lock_expire_ms() -> u64 {
    DEFAULT_LOCK_EXPIRE_MS
}

fn default_expire_secs() -> u64 {
    DEFAULT_EXPIRE_SECS
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_executor_timeout_ms() -> u64 {
    DEFAULT_EXECUTOR_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = TaskOptions::default();
        assert_eq!(opts.lock_expire(), Duration::from_millis(500));
        assert_eq!(opts.expire(), Duration::from_secs(604_800));
        assert_eq!(opts.retry_backoff(), Duration::from_secs(1));
        assert_eq!(opts.max_lock_attempts, None);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            [store]
            url = "redis://cache:6379/2"

            [task]
            prefix = "billing"
            lock_expire_ms = 30000
            max_lock_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.store.url, "redis://cache:6379/2");
        assert_eq!(config.task.prefix, "billing");
        assert_eq!(config.task.lock_expire(), Duration::from_secs(30));
        assert_eq!(config.task.max_lock_attempts, Some(5));
        assert_eq!(config.task.expire_secs, DEFAULT_EXPIRE_SECS);
        assert_eq!(config.executor.timeout_ms, DEFAULT_EXECUTOR_TIMEOUT_MS);
    }

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            [task]
            lock_expire_ms = 0
            expire_secs = 0
            max_lock_attempts = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.task.lock_expire_ms, DEFAULT_LOCK_EXPIRE_MS);
        assert_eq!(config.task.expire_secs, DEFAULT_EXPIRE_SECS);
        assert_eq!(config.task.max_lock_attempts, None);
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let err = SchedulerConfig::from_toml_str("[task]\nprefix = \"  \"\n").unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }
}
