//! Redis store implementation.
//!
//! Uses a multiplexed `ConnectionManager` (reconnects on its own) and maps
//! every operation onto a single Redis command. Transactions are
//! `MULTI ... EXEC` pipelines, which Redis applies as one unit.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{ErrorKind, RedisError};
use tracing::{debug, info, instrument};

use crate::ports::{Store, StoreError, StoreOp};

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Open a client for `url` and check the server answers.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        info!(%url, "connecting to redis");
        let client = redis::Client::open(url).map_err(map_err)?;
        let conn = client.get_connection_manager().await.map_err(map_err)?;
        let store = Self { conn };
        store.ping().await?;
        Ok(store)
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn map_err(e: RedisError) -> StoreError {
    match e.kind() {
        ErrorKind::ExecAbortError => StoreError::Transaction(e.to_string()),
        ErrorKind::TypeError => StoreError::Malformed(e.to_string()),
        _ if e.code() == Some("WRONGTYPE") => StoreError::WrongType(e.to_string()),
        _ => StoreError::Unavailable(e.to_string()),
    }
}

/// Upper bound for PX / PEXPIRE arguments (about 100 years); Redis rejects
/// expiry times that overflow when added to its clock.
const MAX_TTL_MILLIS: u64 = 100 * 365 * 24 * 60 * 60 * 1000;

fn millis(d: Duration) -> u64 {
    // PX / PEXPIRE reject 0.
    u64::try_from(d.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, MAX_TTL_MILLIS)
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut self.conn()).await.map_err(map_err)?;
        debug!(key, created = reply.is_some(), "SET NX");
        Ok(reply.is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let _: i64 = cmd.query_async(&mut self.conn()).await.map_err(map_err)?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let n: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(n > 0)
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let n: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(n > 0)
    }

    #[instrument(skip(self, ops), fields(ops = ops.len()))]
    async fn transaction(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                StoreOp::HashSet { key, fields } => {
                    let cmd = pipe.cmd("HSET").arg(key);
                    for (field, value) in fields {
                        cmd.arg(field).arg(value);
                    }
                    cmd.ignore();
                }
                StoreOp::SetAdd { key, member } => {
                    pipe.cmd("SADD").arg(key).arg(member).ignore();
                }
                StoreOp::SetRemove { key, member } => {
                    pipe.cmd("SREM").arg(key).arg(member).ignore();
                }
                StoreOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
                StoreOp::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE").arg(key).arg(millis(*ttl)).ignore();
                }
            }
        }
        let _: () = pipe.query_async(&mut self.conn()).await.map_err(map_err)?;
        Ok(())
    }
}
