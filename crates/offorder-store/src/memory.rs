//! In-process [`Store`] backend.
//!
//! Holds string and sorted-index values behind one async mutex, so every
//! call and every `exec` batch is atomic with respect to the others. Each
//! key carries a modification stamp from a store-wide clock; `watch`
//! records stamps and `exec` compares them. Expiry is lazy and measured
//! with `tokio::time::Instant`, so paused-time tests can advance past a
//! lease without sleeping.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::client::{Op, OpResult, RangeOrder, Reply, Store, StoreError, StoreResult, WatchSet};
use crate::Key;

#[derive(Debug)]
enum Value {
    Str(String),
    Sorted(HashMap<String, f64>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<Key, Entry>,
    /// Last modification stamp per key. Survives deletion so a watch sees
    /// delete-then-recreate as a change.
    stamps: HashMap<Key, u64>,
    clock: u64,
}

fn wrong_type(key: &Key) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

fn not_integer(key: &Key) -> StoreError {
    StoreError::NotInteger {
        key: key.to_string(),
    }
}

/// Inclusive rank window `[start, stop]` over `len` members, Redis style.
fn rank_window(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    if len == 0 {
        return None;
    }
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}

impl State {
    fn touch(&mut self, key: &Key) {
        self.clock += 1;
        self.stamps.insert(key.clone(), self.clock);
    }

    fn stamp(&self, key: &Key) -> u64 {
        self.stamps.get(key).copied().unwrap_or(0)
    }

    fn expire(&mut self, key: &Key, now: Instant) {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            self.entries.remove(key);
            self.touch(key);
        }
    }

    fn live(&mut self, key: &Key, now: Instant) -> Option<&mut Entry> {
        self.expire(key, now);
        self.entries.get_mut(key)
    }

    fn get(&mut self, key: &Key, now: Instant) -> StoreResult<Option<String>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set(&mut self, key: &Key, value: String, ttl: Option<Duration>, now: Instant) {
        self.entries.insert(
            key.clone(),
            Entry {
                value: Value::Str(value),
                expires_at: ttl.map(|t| now + t),
            },
        );
        self.touch(key);
    }

    fn set_nx(&mut self, key: &Key, value: String, ttl: Option<Duration>, now: Instant) -> bool {
        if self.live(key, now).is_some() {
            return false;
        }
        self.set(key, value, ttl, now);
        true
    }

    fn del(&mut self, key: &Key, now: Instant) -> bool {
        self.expire(key, now);
        if self.entries.remove(key).is_some() {
            self.touch(key);
            true
        } else {
            false
        }
    }

    fn incr(&mut self, key: &Key, now: Instant) -> StoreResult<i64> {
        let (current, expires_at) = match self.live(key, now) {
            None => (0, None),
            Some(Entry {
                value: Value::Str(s),
                expires_at,
            }) => (s.parse::<i64>().map_err(|_| not_integer(key))?, *expires_at),
            Some(_) => return Err(wrong_type(key)),
        };
        let next = current.checked_add(1).ok_or_else(|| not_integer(key))?;
        self.entries.insert(
            key.clone(),
            Entry {
                value: Value::Str(next.to_string()),
                expires_at,
            },
        );
        self.touch(key);
        Ok(next)
    }

    fn zadd(&mut self, key: &Key, score: f64, member: &str, now: Instant) -> StoreResult<bool> {
        self.expire(key, now);
        let entry = self.entries.entry(key.clone()).or_insert_with(|| Entry {
            value: Value::Sorted(HashMap::new()),
            expires_at: None,
        });
        let Value::Sorted(set) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let (added, changed) = match set.insert(member.to_string(), score) {
            None => (true, true),
            Some(prev) => (false, prev.to_bits() != score.to_bits()),
        };
        if changed {
            self.touch(key);
        }
        Ok(added)
    }

    fn zrem(&mut self, key: &Key, member: &str, now: Instant) -> StoreResult<bool> {
        let (removed, now_empty) = match self.live(key, now) {
            None => return Ok(false),
            Some(Entry {
                value: Value::Sorted(set),
                ..
            }) => (set.remove(member).is_some(), set.is_empty()),
            Some(_) => return Err(wrong_type(key)),
        };
        if now_empty {
            self.entries.remove(key);
        }
        if removed {
            self.touch(key);
        }
        Ok(removed)
    }

    fn sorted(&mut self, key: &Key, now: Instant) -> StoreResult<Option<&HashMap<String, f64>>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Sorted(set),
                ..
            }) => Ok(Some(&*set)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn zrange(
        &mut self,
        key: &Key,
        start: i64,
        stop: i64,
        order: RangeOrder,
        now: Instant,
    ) -> StoreResult<Vec<String>> {
        let Some(set) = self.sorted(key, now)? else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(&String, f64)> = set.iter().map(|(m, s)| (m, *s)).collect();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        if order == RangeOrder::Descending {
            members.reverse();
        }
        let Some((from, to)) = rank_window(members.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(members[from..=to].iter().map(|(m, _)| (*m).clone()).collect())
    }

    fn apply(&mut self, op: Op, now: Instant) -> OpResult {
        match op {
            Op::Set { key, value, ttl } => {
                self.set(&key, value, ttl, now);
                Ok(Reply::Ok)
            }
            Op::Del { key } => Ok(Reply::Int(i64::from(self.del(&key, now)))),
            Op::Incr { key } => self.incr(&key, now).map(Reply::Int),
            Op::ZAdd { key, score, member } => self
                .zadd(&key, score, &member, now)
                .map(|added| Reply::Int(i64::from(added))),
            Op::ZRem { key, member } => self
                .zrem(&key, &member, now)
                .map(|removed| Reply::Int(i64::from(removed))),
        }
    }
}

/// Store backend living in this process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every key. Watches taken before the flush will abort.
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        let keys: Vec<Key> = state.entries.keys().cloned().collect();
        state.entries.clear();
        for key in &keys {
            state.touch(key);
        }
    }

    /// Number of live keys.
    pub async fn key_count(&self) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let keys: Vec<Key> = state.entries.keys().cloned().collect();
        for key in &keys {
            state.expire(key, now);
        }
        state.entries.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &Key) -> StoreResult<Option<String>> {
        self.state.lock().await.get(key, Instant::now())
    }

    async fn set(&self, key: &Key, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .set(key, value.to_string(), ttl, Instant::now());
        Ok(())
    }

    async fn set_nx(&self, key: &Key, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .set_nx(key, value.to_string(), ttl, Instant::now()))
    }

    async fn del(&self, key: &Key) -> StoreResult<bool> {
        Ok(self.state.lock().await.del(key, Instant::now()))
    }

    async fn exists(&self, key: &Key) -> StoreResult<bool> {
        Ok(self.state.lock().await.live(key, Instant::now()).is_some())
    }

    async fn incr(&self, key: &Key) -> StoreResult<i64> {
        self.state.lock().await.incr(key, Instant::now())
    }

    async fn zadd(&self, key: &Key, score: f64, member: &str) -> StoreResult<u64> {
        self.state
            .lock()
            .await
            .zadd(key, score, member, Instant::now())
            .map(u64::from)
    }

    async fn zrem(&self, key: &Key, member: &str) -> StoreResult<bool> {
        self.state.lock().await.zrem(key, member, Instant::now())
    }

    async fn zscore(&self, key: &Key, member: &str) -> StoreResult<Option<f64>> {
        let mut state = self.state.lock().await;
        Ok(state
            .sorted(key, Instant::now())?
            .and_then(|set| set.get(member).copied()))
    }

    async fn zcard(&self, key: &Key) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state
            .sorted(key, Instant::now())?
            .map_or(0, |set| u64::try_from(set.len()).unwrap_or(u64::MAX)))
    }

    async fn zrange(
        &self,
        key: &Key,
        start: i64,
        stop: i64,
        order: RangeOrder,
    ) -> StoreResult<Vec<String>> {
        self.state
            .lock()
            .await
            .zrange(key, start, stop, order, Instant::now())
    }

    async fn watch(&self, keys: &[Key]) -> StoreResult<WatchSet> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let entries = keys
            .iter()
            .map(|key| {
                state.expire(key, now);
                (key.clone(), state.stamp(key))
            })
            .collect();
        Ok(WatchSet::new(entries))
    }

    async fn exec(&self, watch: Option<&WatchSet>, ops: Vec<Op>) -> StoreResult<Vec<OpResult>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some(watch) = watch {
            for (key, stamp) in watch.entries() {
                state.expire(key, now);
                if state.stamp(key) != *stamp {
                    tracing::trace!(key = %key, "watched key modified, aborting exec");
                    return Err(StoreError::TxAborted);
                }
            }
        }
        Ok(ops.into_iter().map(|op| state.apply(op, now)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Key {
        Key::from(s)
    }

    #[tokio::test]
    async fn get_set_del_exists() {
        let store = MemoryStore::new();
        assert_eq!(store.get(&key("a")).await.unwrap(), None);
        assert!(!store.exists(&key("a")).await.unwrap());

        store.set(&key("a"), "1", None).await.unwrap();
        assert_eq!(store.get(&key("a")).await.unwrap().as_deref(), Some("1"));
        assert!(store.exists(&key("a")).await.unwrap());

        assert!(store.del(&key("a")).await.unwrap());
        assert!(!store.del(&key("a")).await.unwrap());
        assert!(!store.exists(&key("a")).await.unwrap());
    }

    #[tokio::test]
    async fn incr_from_missing_and_from_string() {
        let store = MemoryStore::new();
        assert_eq!(store.incr(&key("n")).await.unwrap(), 1);
        assert_eq!(store.incr(&key("n")).await.unwrap(), 2);

        store.set(&key("m"), "0", None).await.unwrap();
        assert_eq!(store.incr(&key("m")).await.unwrap(), 1);
        assert_eq!(store.get(&key("m")).await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn incr_rejects_non_integer_and_overflow() {
        let store = MemoryStore::new();
        store.set(&key("s"), "abc", None).await.unwrap();
        assert!(matches!(
            store.incr(&key("s")).await,
            Err(StoreError::NotInteger { .. })
        ));
        store.set(&key("max"), &i64::MAX.to_string(), None).await.unwrap();
        assert!(matches!(
            store.incr(&key("max")).await,
            Err(StoreError::NotInteger { .. })
        ));
    }

    #[tokio::test]
    async fn wrong_type_between_strings_and_indexes() {
        let store = MemoryStore::new();
        store.zadd(&key("z"), 1.0, "m").await.unwrap();
        assert!(matches!(
            store.get(&key("z")).await,
            Err(StoreError::WrongType { .. })
        ));
        store.set(&key("s"), "v", None).await.unwrap();
        assert!(matches!(
            store.zadd(&key("s"), 1.0, "m").await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_lazily() {
        let store = MemoryStore::new();
        assert!(
            store
                .set_nx(&key("lock"), "1", Some(Duration::from_secs(60)))
                .await
                .unwrap()
        );
        assert!(
            !store
                .set_nx(&key("lock"), "1", Some(Duration::from_secs(60)))
                .await
                .unwrap()
        );

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.exists(&key("lock")).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.exists(&key("lock")).await.unwrap());
        assert!(
            store
                .set_nx(&key("lock"), "1", Some(Duration::from_secs(60)))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn zadd_counts_only_new_members() {
        let store = MemoryStore::new();
        assert_eq!(store.zadd(&key("z"), 5.0, "a").await.unwrap(), 1);
        assert_eq!(store.zadd(&key("z"), 7.0, "a").await.unwrap(), 0);
        assert_eq!(store.zscore(&key("z"), "a").await.unwrap(), Some(7.0));
        assert_eq!(store.zcard(&key("z")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn zrange_orders_by_score_then_member() {
        let store = MemoryStore::new();
        for (score, member) in [(30.0, "c"), (10.0, "a"), (50.0, "e"), (20.0, "b"), (20.0, "bb")] {
            store.zadd(&key("z"), score, member).await.unwrap();
        }
        let asc = store
            .zrange(&key("z"), 0, -1, RangeOrder::Ascending)
            .await
            .unwrap();
        assert_eq!(asc, ["a", "b", "bb", "c", "e"]);

        let desc = store
            .zrange(&key("z"), 0, -1, RangeOrder::Descending)
            .await
            .unwrap();
        assert_eq!(desc, ["e", "c", "bb", "b", "a"]);

        let tail = store
            .zrange(&key("z"), 3, -1, RangeOrder::Ascending)
            .await
            .unwrap();
        assert_eq!(tail, ["c", "e"]);

        let past_end = store
            .zrange(&key("z"), 5, -1, RangeOrder::Ascending)
            .await
            .unwrap();
        assert!(past_end.is_empty());
    }

    #[test]
    fn rank_window_edges() {
        assert_eq!(rank_window(0, 0, -1), None);
        assert_eq!(rank_window(5, 0, -1), Some((0, 4)));
        assert_eq!(rank_window(5, -2, -1), Some((3, 4)));
        assert_eq!(rank_window(5, -10, 100), Some((0, 4)));
        assert_eq!(rank_window(5, 3, 1), None);
        assert_eq!(rank_window(5, 0, -6), None);
    }

    #[tokio::test]
    async fn zrem_drops_empty_index() {
        let store = MemoryStore::new();
        store.zadd(&key("z"), 1.0, "a").await.unwrap();
        assert!(store.zrem(&key("z"), "a").await.unwrap());
        assert!(!store.zrem(&key("z"), "a").await.unwrap());
        assert!(!store.exists(&key("z")).await.unwrap());
    }

    #[tokio::test]
    async fn exec_applies_when_watch_is_clean() {
        let store = MemoryStore::new();
        store.set(&key("bal"), "100", None).await.unwrap();
        let watch = store.watch(&[key("bal")]).await.unwrap();
        let results = store
            .exec(
                Some(&watch),
                vec![
                    Op::Set {
                        key: key("bal"),
                        value: "50".into(),
                        ttl: None,
                    },
                    Op::Incr { key: key("n") },
                ],
            )
            .await
            .unwrap();
        assert_eq!(results, vec![Ok(Reply::Ok), Ok(Reply::Int(1))]);
        assert_eq!(store.get(&key("bal")).await.unwrap().as_deref(), Some("50"));
    }

    #[tokio::test]
    async fn exec_aborts_when_watched_key_changes() {
        let store = MemoryStore::new();
        store.set(&key("bal"), "100", None).await.unwrap();
        let watch = store.watch(&[key("bal")]).await.unwrap();

        store.set(&key("bal"), "90", None).await.unwrap();

        let err = store
            .exec(Some(&watch), vec![Op::Del { key: key("other") }])
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::TxAborted);
        assert_eq!(store.get(&key("bal")).await.unwrap().as_deref(), Some("90"));
    }

    #[tokio::test]
    async fn watch_sees_delete_and_recreate() {
        let store = MemoryStore::new();
        store.set(&key("k"), "v", None).await.unwrap();
        let watch = store.watch(&[key("k")]).await.unwrap();
        store.del(&key("k")).await.unwrap();
        store.set(&key("k"), "v", None).await.unwrap();
        assert_eq!(
            store.exec(Some(&watch), Vec::new()).await.unwrap_err(),
            StoreError::TxAborted
        );
    }

    #[tokio::test]
    async fn watch_on_missing_key_aborts_when_created() {
        let store = MemoryStore::new();
        let watch = store.watch(&[key("k")]).await.unwrap();
        store.set(&key("k"), "v", None).await.unwrap();
        assert!(store.exec(Some(&watch), Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn per_op_errors_do_not_stop_the_batch() {
        let store = MemoryStore::new();
        store.set(&key("s"), "abc", None).await.unwrap();
        let results = store
            .exec(
                None,
                vec![
                    Op::Incr { key: key("s") },
                    Op::Set {
                        key: key("t"),
                        value: "1".into(),
                        ttl: None,
                    },
                ],
            )
            .await
            .unwrap();
        assert!(results[0].is_err());
        assert_eq!(results[1], Ok(Reply::Ok));
        assert!(store.exists(&key("t")).await.unwrap());
    }

    #[tokio::test]
    async fn flush_clears_everything() {
        let store = MemoryStore::new();
        store.set(&key("a"), "1", None).await.unwrap();
        store.zadd(&key("z"), 1.0, "m").await.unwrap();
        assert_eq!(store.key_count().await, 2);
        store.flush().await;
        assert_eq!(store.key_count().await, 0);
    }
}
