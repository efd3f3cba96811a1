//! Optimistic watched transactions.
//!
//! A [`Tx`] snapshots its watch keys on `begin`, serves reads straight from
//! the store, queues writes locally and hands the queue to `exec` on
//! `commit`. If a watched key moved in between, the commit applies nothing
//! and fails with [`OffOrderError::TxAborted`].

use std::time::Duration;

use async_trait::async_trait;
use offorder_types::{OffOrderError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::client::{Batch, OpResult, Reply, Store, WatchSet};
use crate::Key;

/// A watched transaction in progress.
pub struct Tx<'a> {
    store: &'a dyn Store,
    watch: WatchSet,
    batch: Batch,
}

impl<'a> Tx<'a> {
    /// Watch `keys` and open a transaction over them.
    pub async fn begin(store: &'a dyn Store, keys: &[Key]) -> Result<Self> {
        let watch = store.watch(keys).await?;
        Ok(Self {
            store,
            watch,
            batch: Batch::new(),
        })
    }

    pub async fn get(&self, key: &Key) -> Result<Option<String>> {
        Ok(self.store.get(key).await?)
    }

    /// Read and JSON-decode a value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &Key) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, key: &Key) -> Result<bool> {
        Ok(self.store.exists(key).await?)
    }

    pub async fn zscore(&self, key: &Key, member: &str) -> Result<Option<f64>> {
        Ok(self.store.zscore(key, member).await?)
    }

    pub fn set(&mut self, key: Key, value: impl Into<String>, ttl: Option<Duration>) -> &mut Self {
        self.batch.set(key, value, ttl);
        self
    }

    /// Queue a JSON-encoded write.
    pub fn set_json<T: Serialize + ?Sized>(&mut self, key: Key, value: &T) -> Result<&mut Self> {
        let encoded = serde_json::to_string(value)?;
        self.batch.set(key, encoded, None);
        Ok(self)
    }

    pub fn del(&mut self, key: Key) -> &mut Self {
        self.batch.del(key);
        self
    }

    pub fn incr(&mut self, key: Key) -> &mut Self {
        self.batch.incr(key);
        self
    }

    pub fn zadd(&mut self, key: Key, score: f64, member: impl Into<String>) -> &mut Self {
        self.batch.zadd(key, score, member);
        self
    }

    pub fn zrem(&mut self, key: Key, member: impl Into<String>) -> &mut Self {
        self.batch.zrem(key, member);
        self
    }

    /// Number of writes queued so far.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.batch.len()
    }

    /// Execute the queued writes if no watched key changed.
    pub async fn commit(self) -> Result<Vec<OpResult>> {
        Ok(self
            .store
            .exec(Some(&self.watch), self.batch.into_ops())
            .await?)
    }
}

/// Collapse per-op results, failing on the first op the store rejected.
pub fn all_ok(results: Vec<OpResult>) -> Result<Vec<Reply>> {
    results
        .into_iter()
        .map(|r| r.map_err(OffOrderError::from))
        .collect()
}

/// Body of a watched transaction: reads through `tx` and queues writes on it.
#[async_trait]
pub trait TxBody: Send + Sync {
    async fn apply(&self, tx: &mut Tx<'_>) -> Result<()>;
}

/// Run `body` once under a watch on `keys`.
pub async fn run_watched(
    store: &dyn Store,
    keys: &[Key],
    body: &dyn TxBody,
) -> Result<Vec<OpResult>> {
    let mut tx = Tx::begin(store, keys).await?;
    body.apply(&mut tx).await?;
    tx.commit().await
}

/// Run `body` until it commits, re-watching on every abort, for at most
/// `max_attempts` attempts. Errors other than an abort end the loop at once.
pub async fn run_watched_with_retry(
    store: &dyn Store,
    keys: &[Key],
    body: &dyn TxBody,
    max_attempts: u32,
) -> Result<Vec<OpResult>> {
    for attempt in 1..=max_attempts {
        match run_watched(store, keys, body).await {
            Err(OffOrderError::TxAborted) => {
                tracing::debug!(attempt, max_attempts, "watched transaction aborted, retrying");
                tokio::task::yield_now().await;
            }
            other => return other,
        }
    }
    Err(OffOrderError::TxRetriesExhausted {
        attempts: max_attempts,
    })
}
