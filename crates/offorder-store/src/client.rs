//! The store client contract.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use offorder_types::OffOrderError;
use thiserror::Error;

use crate::Key;

/// Failure reported by a store backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Network or server-side failure.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A watched key changed before `exec`; nothing was applied.
    #[error("transaction aborted: watched key modified")]
    TxAborted,

    /// The key holds a value of another type (e.g. `get` on a sorted index).
    #[error("wrong type for key {key}")]
    WrongType { key: String },

    /// `incr` on a value that is not a 64-bit integer, or that would overflow.
    #[error("value at {key} is not an integer or out of range")]
    NotInteger { key: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for OffOrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TxAborted => Self::TxAborted,
            other => Self::Store(other.to_string()),
        }
    }
}

/// Direction of a rank range read on a sorted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOrder {
    /// Lowest score first.
    Ascending,
    /// Highest score first.
    Descending,
}

/// A write queued inside a batch or transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Set {
        key: Key,
        value: String,
        ttl: Option<Duration>,
    },
    Del {
        key: Key,
    },
    Incr {
        key: Key,
    },
    ZAdd {
        key: Key,
        score: f64,
        member: String,
    },
    ZRem {
        key: Key,
        member: String,
    },
}

impl Op {
    #[must_use]
    pub fn key(&self) -> &Key {
        match self {
            Self::Set { key, .. }
            | Self::Del { key }
            | Self::Incr { key }
            | Self::ZAdd { key, .. }
            | Self::ZRem { key, .. } => key,
        }
    }
}

/// Reply to one queued [`Op`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// `Set` succeeded.
    Ok,
    /// `Del` / `ZRem` / `ZAdd` count, or the new value after `Incr`.
    Int(i64),
}

impl Reply {
    #[must_use]
    pub fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(n),
            Self::Ok => None,
        }
    }
}

/// Per-operation outcome of an `exec`.
pub type OpResult = StoreResult<Reply>;

/// Modification stamps of a set of watched keys, taken by [`Store::watch`].
///
/// Backends whose watch state lives on a connection carry that connection
/// as an opaque session and take it back in `exec`.
#[derive(Clone, Default)]
pub struct WatchSet {
    entries: Vec<(Key, u64)>,
    session: Option<Arc<dyn Any + Send + Sync>>,
}

impl WatchSet {
    #[must_use]
    pub fn new(entries: Vec<(Key, u64)>) -> Self {
        Self {
            entries,
            session: None,
        }
    }

    #[must_use]
    pub fn with_session<T: Any + Send + Sync>(entries: Vec<(Key, u64)>, session: T) -> Self {
        Self {
            entries,
            session: Some(Arc::new(session)),
        }
    }

    /// The backend session, if it is a `T`.
    #[must_use]
    pub fn session<T: Any>(&self) -> Option<&T> {
        self.session.as_deref()?.downcast_ref::<T>()
    }

    #[must_use]
    pub fn entries(&self) -> &[(Key, u64)] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for WatchSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSet")
            .field("entries", &self.entries)
            .field("session", &self.session.is_some())
            .finish()
    }
}

/// Ordered list of writes executed as one atomic round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: Key, value: impl Into<String>, ttl: Option<Duration>) -> &mut Self {
        self.ops.push(Op::Set {
            key,
            value: value.into(),
            ttl,
        });
        self
    }

    pub fn del(&mut self, key: Key) -> &mut Self {
        self.ops.push(Op::Del { key });
        self
    }

    pub fn incr(&mut self, key: Key) -> &mut Self {
        self.ops.push(Op::Incr { key });
        self
    }

    pub fn zadd(&mut self, key: Key, score: f64, member: impl Into<String>) -> &mut Self {
        self.ops.push(Op::ZAdd {
            key,
            score,
            member: member.into(),
        });
        self
    }

    pub fn zrem(&mut self, key: Key, member: impl Into<String>) -> &mut Self {
        self.ops.push(Op::ZRem {
            key,
            member: member.into(),
        });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }
}

/// A remote mapping store with atomic single-key operations, sorted indexes
/// and optimistic watched transactions.
///
/// Every call is one round trip. A missing key is never an error: reads
/// return `None`/`false`/empty instead.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &Key) -> StoreResult<Option<String>>;

    /// Unconditional write. Without `ttl` any previous expiry is cleared.
    async fn set(&self, key: &Key, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Write only if the key does not exist. Returns whether it was written.
    async fn set_nx(&self, key: &Key, value: &str, ttl: Option<Duration>) -> StoreResult<bool>;

    /// Returns whether a key was removed.
    async fn del(&self, key: &Key) -> StoreResult<bool>;

    async fn exists(&self, key: &Key) -> StoreResult<bool>;

    /// Atomic increment; a missing key counts as 0. Returns the new value.
    async fn incr(&self, key: &Key) -> StoreResult<i64>;

    /// Insert or re-score `member`. Returns how many members were newly added.
    async fn zadd(&self, key: &Key, score: f64, member: &str) -> StoreResult<u64>;

    async fn zrem(&self, key: &Key, member: &str) -> StoreResult<bool>;

    async fn zscore(&self, key: &Key, member: &str) -> StoreResult<Option<f64>>;

    async fn zcard(&self, key: &Key) -> StoreResult<u64>;

    /// Members between ranks `start` and `stop` inclusive, in `order`.
    /// Negative ranks count from the end (`-1` is the last member).
    async fn zrange(
        &self,
        key: &Key,
        start: i64,
        stop: i64,
        order: RangeOrder,
    ) -> StoreResult<Vec<String>>;

    /// Snapshot the modification state of `keys`.
    async fn watch(&self, keys: &[Key]) -> StoreResult<WatchSet>;

    /// Apply `ops` atomically. With a watch set, fails with
    /// [`StoreError::TxAborted`] and applies nothing if any watched key was
    /// modified since the snapshot. Per-op failures do not stop the others.
    async fn exec(&self, watch: Option<&WatchSet>, ops: Vec<Op>) -> StoreResult<Vec<OpResult>>;
}
