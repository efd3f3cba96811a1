//! Namespace binding: one store connection plus one key prefix.
//!
//! [`App`] is a cheap, cloneable handle. [`Market`] and [`User`] views are
//! built from it without touching the store; all they carry is the prefix
//! and their own identity, which they only use to derive keys.

use std::sync::Arc;
use std::time::Duration;

use offorder_store::{Batch, Key, OpResult, Store};
use offorder_types::{Address, OffOrderConfig, Result, WorkerConfig, constants};

use crate::market::Market;
use crate::user::User;
use crate::worker::Worker;

/// A store connection scoped to a namespace prefix.
#[derive(Clone)]
pub struct App {
    store: Arc<dyn Store>,
    prefix: Arc<str>,
    lock_lease: Duration,
    tx_retry_limit: u32,
}

impl App {
    /// Bind `store` to `prefix` with default lease and retry settings.
    pub fn new(store: Arc<dyn Store>, prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            store,
            prefix: Arc::from(prefix),
            lock_lease: Duration::from_millis(constants::DEFAULT_LOCK_LEASE_MS),
            tx_retry_limit: constants::DEFAULT_TX_RETRY_LIMIT,
        }
    }

    /// Bind `store` using a validated configuration.
    pub fn from_config(store: Arc<dyn Store>, cfg: &OffOrderConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            store,
            prefix: Arc::from(cfg.namespace.as_str()),
            lock_lease: cfg.lock_lease(),
            tx_retry_limit: cfg.tx_retry_limit,
        })
    }

    #[must_use]
    pub fn market(&self, base: impl Into<String>, quote: impl Into<String>) -> Market {
        Market::new(self.clone(), base.into(), quote.into())
    }

    #[must_use]
    pub fn user(&self, addr: impl Into<Address>) -> User {
        User::new(self.clone(), addr.into())
    }

    /// Start staging writes to be executed as one atomic round trip.
    #[must_use]
    pub fn pipe(&self) -> Pipe {
        Pipe {
            store: Arc::clone(&self.store),
            prefix: Arc::clone(&self.prefix),
            batch: Batch::new(),
        }
    }

    /// Spawn a background worker on this app's store.
    #[must_use]
    pub fn worker(&self, config: WorkerConfig) -> Worker {
        Worker::spawn(Arc::clone(&self.store), config)
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    #[must_use]
    pub fn lock_lease(&self) -> Duration {
        self.lock_lease
    }

    #[must_use]
    pub fn tx_retry_limit(&self) -> u32 {
        self.tx_retry_limit
    }

    /// First segment of every key in this namespace.
    pub(crate) fn root_key(&self) -> Key {
        Key::root(&self.prefix)
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("prefix", &self.prefix)
            .field("lock_lease", &self.lock_lease)
            .field("tx_retry_limit", &self.tx_retry_limit)
            .finish_non_exhaustive()
    }
}

/// Staged writes, executed together by [`Pipe::exec`].
///
/// Nothing reaches the store until `exec`. The result vector has one entry
/// per staged write, in order; inspect it if individual failures matter.
pub struct Pipe {
    store: Arc<dyn Store>,
    prefix: Arc<str>,
    batch: Batch,
}

impl Pipe {
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn set(&mut self, key: Key, value: impl Into<String>, ttl: Option<Duration>) -> &mut Self {
        self.batch.set(key, value, ttl);
        self
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

    #[must_use]
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Execute every staged write in one round trip.
    pub async fn exec(self) -> Result<Vec<OpResult>> {
        if self.batch.is_empty() {
            return Ok(Vec::new());
        }
        let ops = self.batch.into_ops();
        tracing::trace!(prefix = %self.prefix, ops = ops.len(), "executing pipe");
        Ok(self.store.exec(None, ops).await?)
    }
}
