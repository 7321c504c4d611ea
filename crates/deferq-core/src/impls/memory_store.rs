//! In-memory store implementation.
//!
//! One `tokio::sync::Mutex` guards the whole key space, so every call (and
//! every transaction) is trivially atomic. Expiry is lazy: an expired key is
//! dropped the next time anything looks at it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ports::{Store, StoreError, StoreOp};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    /// Live entry at `key`, evicting it first if it has expired.
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>, StoreError> {
        if self.live(key).is_none() {
            self.entries
                .insert(key.to_string(), Entry::new(Value::Hash(HashMap::new())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Hash(h)) => Ok(h),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut BTreeSet<String>, StoreError> {
        if self.live(key).is_none() {
            self.entries
                .insert(key.to_string(), Entry::new(Value::Set(BTreeSet::new())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Set(s)) => Ok(s),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    /// Type check an op without touching anything.
    fn check(&mut self, op: &StoreOp) -> Result<(), StoreError> {
        let (key, ok) = match op {
            StoreOp::HashSet { key, .. } => (
                key,
                self.live(key)
                    .is_none_or(|e| matches!(e.value, Value::Hash(_))),
            ),
            StoreOp::SetAdd { key, .. } | StoreOp::SetRemove { key, .. } => (
                key,
                self.live(key)
                    .is_none_or(|e| matches!(e.value, Value::Set(_))),
            ),
            StoreOp::Delete { .. } | StoreOp::Expire { .. } => return Ok(()),
        };
        if ok {
            Ok(())
        } else {
            Err(StoreError::WrongType(key.clone()))
        }
    }

    fn apply(&mut self, op: StoreOp) -> Result<(), StoreError> {
        match op {
            StoreOp::HashSet { key, fields } => {
                self.hash_mut(&key)?.extend(fields);
            }
            StoreOp::SetAdd { key, member } => {
                self.set_mut(&key)?.insert(member);
            }
            StoreOp::SetRemove { key, member } => {
                if let Some(Entry {
                    value: Value::Set(set),
                    ..
                }) = self.live(&key)
                {
                    set.remove(&member);
                    if set.is_empty() {
                        self.entries.remove(&key);
                    }
                }
            }
            StoreOp::Delete { key } => {
                self.entries.remove(&key);
            }
            StoreOp::Expire { key, ttl } => {
                if let Some(entry) = self.live(&key) {
                    entry.expires_at = expiry(ttl);
                }
            }
        }
        Ok(())
    }
}

/// Deadline `ttl` from now; `None` (never) if it lies beyond what `Instant` holds.
fn expiry(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

/// In-memory [`Store`], shareable between several engines to play the part
/// of one Redis server seen by several processes.
///
/// Fault injection:
/// - `set_available(false)` makes every call fail with `Unavailable`.
/// - `fail_transactions(true)` makes only `transaction` fail (nothing applied).
#[derive(Clone, Default)]
pub struct InMemoryStore {
    keyspace: Arc<Mutex<Keyspace>>,
    unavailable: Arc<AtomicBool>,
    reject_transactions: Arc<AtomicBool>,
    transactions: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn fail_transactions(&self, fail: bool) {
        self.reject_transactions.store(fail, Ordering::SeqCst);
    }

    /// Number of transactions successfully applied so far.
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Remaining time to live of a key, if it has one.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut ks = self.keyspace.lock().await;
        let at = ks.live(key)?.expires_at?;
        Some(at.saturating_duration_since(Instant::now()))
    }

    fn guard(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.guard()
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.guard()?;
        let mut ks = self.keyspace.lock().await;
        if ks.live(key).is_some() {
            return Ok(false);
        }
        ks.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.and_then(expiry),
            },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.guard()?;
        let mut ks = self.keyspace.lock().await;
        let current = match ks.live(key).map(|e| &e.value) {
            None => 0,
            Some(Value::Str(s)) => s
                .parse::<i64>()
                .map_err(|_| StoreError::WrongType(key.to_string()))?,
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        let next = current + 1;
        match ks.live(key) {
            Some(entry) => entry.value = Value::Str(next.to_string()),
            None => {
                ks.entries
                    .insert(key.to_string(), Entry::new(Value::Str(next.to_string())));
            }
        }
        Ok(next)
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.guard()?;
        let mut ks = self.keyspace.lock().await;
        match ks.live(key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(h)) => Ok(h.clone()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        self.guard()?;
        let mut ks = self.keyspace.lock().await;
        ks.hash_mut(key)?.extend(fields.iter().cloned());
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.guard()?;
        let mut ks = self.keyspace.lock().await;
        match ks.live(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::Set(s)) => Ok(s.iter().cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.guard()?;
        let mut ks = self.keyspace.lock().await;
        Ok(ks.live(key).is_some())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.guard()?;
        let mut ks = self.keyspace.lock().await;
        let existed = ks.live(key).is_some();
        ks.entries.remove(key);
        Ok(existed)
    }

    async fn transaction(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        self.guard()?;
        if self.reject_transactions.load(Ordering::SeqCst) {
            return Err(StoreError::Transaction("rejected by fault injection".into()));
        }
        let mut ks = self.keyspace.lock().await;
        // Validate first so a bad op cannot leave half the batch applied.
        for op in &ops {
            ks.check(op)?;
        }
        for op in ops {
            ks.apply(op)?;
        }
        self.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(k: &str, v: &str) -> (String, String) {
        (k.to_string(), v.to_string())
    }

    #[tokio::test]
    async fn set_nx_only_creates_once() {
        let store = InMemoryStore::new();
        assert!(store.set_nx("k", "1", None).await.unwrap());
        assert!(!store.set_nx("k", "2", None).await.unwrap());
        assert!(store.del("k").await.unwrap());
        assert!(store.set_nx("k", "3", None).await.unwrap());
    }

    #[tokio::test]
    async fn set_nx_key_expires() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_millis(30);
        assert!(store.set_nx("lock", "1", Some(ttl)).await.unwrap());
        assert!(store.ttl("lock").await.is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!store.exists("lock").await.unwrap());
        assert!(store.set_nx("lock", "1", Some(ttl)).await.unwrap());
    }

    #[tokio::test]
    async fn incr_counts_from_zero_and_respects_initial_value() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr("a").await.unwrap(), 1);
        assert_eq!(store.incr("a").await.unwrap(), 2);

        store.set_nx("b", "0", None).await.unwrap();
        assert_eq!(store.incr("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn transaction_applies_everything() {
        let store = InMemoryStore::new();
        store
            .transaction(vec![
                StoreOp::HashSet {
                    key: "h".into(),
                    fields: vec![pair("a", "1"), pair("b", "2")],
                },
                StoreOp::SetAdd {
                    key: "s".into(),
                    member: "7".into(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(store.hget_all("h").await.unwrap().len(), 2);
        assert_eq!(store.set_members("s").await.unwrap(), vec!["7".to_string()]);
        assert_eq!(store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn transaction_with_bad_op_applies_nothing() {
        let store = InMemoryStore::new();
        store.set_nx("s", "scalar", None).await.unwrap();

        let err = store
            .transaction(vec![
                StoreOp::HashSet {
                    key: "h".into(),
                    fields: vec![pair("a", "1")],
                },
                StoreOp::SetAdd {
                    key: "s".into(),
                    member: "7".into(),
                },
            ])
            .await
            .unwrap_err();

        assert_eq!(err, StoreError::WrongType("s".into()));
        assert!(store.hget_all("h").await.unwrap().is_empty());
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn expire_inside_transaction() {
        let store = InMemoryStore::new();
        store.hset("h", &[pair("a", "1")]).await.unwrap();
        store
            .transaction(vec![StoreOp::Expire {
                key: "h".into(),
                ttl: Duration::from_millis(20),
            }])
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.hget_all("h").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_ttl_never_expires_instead_of_panicking() {
        let store = InMemoryStore::new();
        assert!(store.set_nx("lock", "1", Some(Duration::MAX)).await.unwrap());
        store.hset("h", &[pair("a", "1")]).await.unwrap();
        store
            .transaction(vec![StoreOp::Expire {
                key: "h".into(),
                ttl: Duration::MAX,
            }])
            .await
            .unwrap();

        assert!(store.exists("lock").await.unwrap());
        assert!(!store.hget_all("h").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        store.set_available(false);

        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(store.incr("a").await.is_err());
        assert!(store.set_nx("k", "1", None).await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn removing_last_member_drops_the_set() {
        let store = InMemoryStore::new();
        store
            .transaction(vec![StoreOp::SetAdd {
                key: "s".into(),
                member: "1".into(),
            }])
            .await
            .unwrap();
        store
            .transaction(vec![
                StoreOp::SetRemove {
                    key: "s".into(),
                    member: "1".into(),
                },
                StoreOp::SetRemove {
                    key: "s".into(),
                    member: "1".into(),
                },
            ])
            .await
            .unwrap();
        assert!(!store.exists("s").await.unwrap());
    }
}
