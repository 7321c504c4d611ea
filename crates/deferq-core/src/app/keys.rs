//! Store key layout for one scheduler namespace.
//!
//! | key | kind |
//! |-----|------|
//! | `tasks:ids:<prefix>` | id counter |
//! | `tasks:<prefix>:<id>` | record hash |
//! | `tasks:waiting:<prefix>` | pending index (set of ids) |
//! | `tasks:lock:<id>` | execution lock (TTL) |
//!
//! The lock key carries no prefix; namespaces sharing one store share lock
//! keys for equal ids.

use crate::domain::TaskId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
    counter: String,
    pending: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            counter: format!("tasks:ids:{prefix}"),
            pending: format!("tasks:waiting:{prefix}"),
            prefix,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn counter(&self) -> &str {
        &self.counter
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Record key; also the timer registry key.
    pub fn record(&self, id: TaskId) -> String {
        format!("tasks:{}:{}", self.prefix, id)
    }

    pub fn lock(&self, id: TaskId) -> String {
        format!("tasks:lock:{id}")
    }
}
