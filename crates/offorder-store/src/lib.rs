//! # offorder-store
//!
//! The remote key-value store as seen by OffOrder.
//!
//! ## Architecture
//!
//! The order-book layer never talks to a concrete client. It talks to the
//! [`Store`] trait, which exposes exactly the primitives the layer relies on:
//!
//! 1. **Scalars**: `get` / `set` (optional expiry) / `set_nx` / `del` / `exists` / `incr`
//! 2. **Sorted indexes**: `zadd` / `zrem` / `zscore` / `zcard` / `zrange` by rank
//! 3. **Watched transactions**: `watch` a key set, then `exec` a batch of
//!    [`Op`]s that is applied only if none of the watched keys changed
//!
//! [`Tx`] wraps the watch/exec pair into a single transaction object;
//! [`run_watched`] and [`run_watched_with_retry`] drive a [`TxBody`] through it.
//! [`MemoryStore`] is the in-process backend used by tests and single-node
//! deployments. [`RedisStore`] talks to a Redis server.
//!
//! ```text
//! Tx::begin(keys) ─▶ reads ─▶ queue writes ─▶ commit ─┬─▶ applied
//!                                                     └─▶ TxAborted (watched key changed)
//! ```

pub mod client;
pub mod key;
pub mod memory;
pub mod remote;
pub mod txn;

pub use client::{Batch, Op, OpResult, RangeOrder, Reply, Store, StoreError, StoreResult, WatchSet};
pub use key::Key;
pub use memory::MemoryStore;
pub use remote::RedisStore;
pub use txn::{Tx, TxBody, all_ok, run_watched, run_watched_with_retry};
