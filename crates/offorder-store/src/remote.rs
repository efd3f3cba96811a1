//! Redis backend.
//!
//! Plain commands share one multiplexed connection. `WATCH` state lives on
//! a connection, so every [`Store::watch`] opens a dedicated one and hands
//! it back through the [`WatchSet`]; the matching `exec` sends
//! `MULTI`/`EXEC` on it. A nil `EXEC` reply is [`StoreError::TxAborted`].
//!
//! A command Redis rejects inside `EXEC` fails the whole `exec` with
//! [`StoreError::Backend`]. Redis does not roll back the other commands of
//! that transaction.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Pipeline, RedisError, Value};

use crate::client::{Op, OpResult, RangeOrder, Reply, Store, StoreError, StoreResult, WatchSet};
use crate::Key;

/// [`Store`] over a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to `url` (`redis://host:port/db`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::debug!(url, "connected to redis");
        Ok(Self { client, conn })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("server", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Map a server error on `key` onto the store's error variants.
fn classify(err: &RedisError, key: &Key) -> StoreError {
    let message = err.to_string();
    if err.code() == Some("WRONGTYPE") || message.contains("WRONGTYPE") {
        return StoreError::WrongType {
            key: key.to_string(),
        };
    }
    if message.contains("not an integer") || message.contains("overflow") {
        return StoreError::NotInteger {
            key: key.to_string(),
        };
    }
    StoreError::Backend(message)
}

/// Expiry in whole milliseconds, at least one.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn set_cmd(key: &Key, value: &str, ttl: Option<Duration>, nx: bool) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key.as_bytes()).arg(value);
    if nx {
        cmd.arg("NX");
    }
    if let Some(ttl) = ttl {
        cmd.arg("PX").arg(ttl_millis(ttl));
    }
    cmd
}

fn queue(pipe: &mut Pipeline, op: &Op) {
    match op {
        Op::Set { key, value, ttl } => {
            pipe.add_command(set_cmd(key, value, *ttl, false));
        }
        Op::Del { key } => {
            pipe.cmd("DEL").arg(key.as_bytes());
        }
        Op::Incr { key } => {
            pipe.cmd("INCR").arg(key.as_bytes());
        }
        Op::ZAdd { key, score, member } => {
            pipe.cmd("ZADD").arg(key.as_bytes()).arg(*score).arg(member);
        }
        Op::ZRem { key, member } => {
            pipe.cmd("ZREM").arg(key.as_bytes()).arg(member);
        }
    }
}

/// Reply to one queued op, as found in the `EXEC` array.
fn reply(value: Value, key: &Key) -> OpResult {
    match value {
        Value::Okay => Ok(Reply::Ok),
        Value::SimpleString(status) if status == "OK" => Ok(Reply::Ok),
        Value::Int(n) => Ok(Reply::Int(n)),
        other => Err(StoreError::Backend(format!(
            "unexpected reply for {key}: {other:?}"
        ))),
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &Key) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("GET")
            .arg(key.as_bytes())
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&e, key))?;
        Ok(value)
    }

    async fn set(&self, key: &Key, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn();
        let () = set_cmd(key, value, ttl, false)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&e, key))?;
        Ok(())
    }

    async fn set_nx(&self, key: &Key, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut conn = self.conn();
        let reply: Value = set_cmd(key, value, ttl, true)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&e, key))?;
        Ok(!matches!(reply, Value::Nil))
    }

    async fn del(&self, key: &Key) -> StoreResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("DEL")
            .arg(key.as_bytes())
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&e, key))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &Key) -> StoreResult<bool> {
        let mut conn = self.conn();
        let found: i64 = redis::cmd("EXISTS")
            .arg(key.as_bytes())
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&e, key))?;
        Ok(found > 0)
    }

    async fn incr(&self, key: &Key) -> StoreResult<i64> {
        let mut conn = self.conn();
        let value: i64 = redis::cmd("INCR")
            .arg(key.as_bytes())
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&e, key))?;
        Ok(value)
    }

    async fn zadd(&self, key: &Key, score: f64, member: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        let added: u64 = redis::cmd("ZADD")
            .arg(key.as_bytes())
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&e, key))?;
        Ok(added)
    }

    async fn zrem(&self, key: &Key, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("ZREM")
            .arg(key.as_bytes())
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&e, key))?;
        Ok(removed > 0)
    }

    async fn zscore(&self, key: &Key, member: &str) -> StoreResult<Option<f64>> {
        let mut conn = self.conn();
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(key.as_bytes())
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&e, key))?;
        Ok(score)
    }

    async fn zcard(&self, key: &Key) -> StoreResult<u64> {
        let mut conn = self.conn();
        let len: u64 = redis::cmd("ZCARD")
            .arg(key.as_bytes())
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&e, key))?;
        Ok(len)
    }

    async fn zrange(
        &self,
        key: &Key,
        start: i64,
        stop: i64,
        order: RangeOrder,
    ) -> StoreResult<Vec<String>> {
        let command = match order {
            RangeOrder::Ascending => "ZRANGE",
            RangeOrder::Descending => "ZREVRANGE",
        };
        let mut conn = self.conn();
        let members: Vec<String> = redis::cmd(command)
            .arg(key.as_bytes())
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&e, key))?;
        Ok(members)
    }

    async fn watch(&self, keys: &[Key]) -> StoreResult<WatchSet> {
        if keys.is_empty() {
            return Ok(WatchSet::default());
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let mut cmd = redis::cmd("WATCH");
        for key in keys {
            cmd.arg(key.as_bytes());
        }
        let () = cmd.query_async(&mut conn).await?;
        let entries = keys.iter().map(|key| (key.clone(), 0)).collect();
        Ok(WatchSet::with_session(entries, conn))
    }

    async fn exec(&self, watch: Option<&WatchSet>, ops: Vec<Op>) -> StoreResult<Vec<OpResult>> {
        let watched = watch.filter(|w| !w.is_empty());
        let mut conn = match watched {
            Some(w) => w
                .session::<MultiplexedConnection>()
                .cloned()
                .ok_or_else(|| StoreError::Backend("watch set was not taken by redis".into()))?,
            None => self.conn(),
        };

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            queue(&mut pipe, op);
        }
        if ops.is_empty() {
            // An empty MULTI block is never sent; EXEC still has to run.
            pipe.cmd("PING").ignore();
        }

        let replies: Option<Vec<Value>> = pipe.query_async(&mut conn).await?;
        let Some(replies) = replies else {
            tracing::trace!(ops = ops.len(), "watched key modified, aborting exec");
            return Err(StoreError::TxAborted);
        };
        if replies.len() != ops.len() {
            return Err(StoreError::Backend(format!(
                "exec returned {} replies for {} ops",
                replies.len(),
                ops.len()
            )));
        }
        Ok(replies
            .into_iter()
            .zip(&ops)
            .map(|(value, op)| reply(value, op.key()))
            .collect())
    }
}
