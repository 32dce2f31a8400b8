//! In-process shared store
//!
//! Holds the whole keyspace behind one mutex, so every trait method is atomic
//! with respect to every other. Expiry is measured on `tokio::time::Instant`,
//! which lets tests drive TTLs with a paused runtime clock.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::clock::deadline_after;

use super::{ttl_millis, KvStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    order: BTreeSet<(i64, String)>,
}

impl SortedSet {
    /// Returns true if the member was not present before
    fn insert(&mut self, member: &str, score: i64, overwrite: bool) -> bool {
        match self.scores.get(member).copied() {
            Some(_) if !overwrite => false,
            Some(old) => {
                self.order.remove(&(old, member.to_string()));
                self.order.insert((score, member.to_string()));
                self.scores.insert(member.to_string(), score);
                false
            }
            None => {
                self.order.insert((score, member.to_string()));
                self.scores.insert(member.to_string(), score);
                true
            }
        }
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.order.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn range(&self, min: i64, max: i64) -> impl Iterator<Item = &(i64, String)> {
        self.order
            .range((min, String::new())..)
            .take_while(move |(score, _)| *score <= max)
    }

    fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[derive(Debug)]
enum Value {
    Text(String),
    Sorted(SortedSet),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    /// Look up a live entry, evicting it first if it has expired
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn text(&mut self, key: &str) -> StoreResult<Option<&mut Entry>> {
        match self.live(key) {
            Some(entry) if matches!(entry.value, Value::Text(_)) => Ok(Some(entry)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    fn sorted(&mut self, key: &str) -> StoreResult<Option<&mut SortedSet>> {
        match self.live(key) {
            Some(Entry {
                value: Value::Sorted(set),
                ..
            }) => Ok(Some(set)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    fn sorted_or_create(&mut self, key: &str) -> StoreResult<&mut SortedSet> {
        if self.sorted(key)?.is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Sorted(SortedSet::default()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key) {
            Some(Entry {
                value: Value::Sorted(set),
                ..
            }) => Ok(set),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    /// Drop an ordered set that has become empty, as Redis does
    fn prune_empty(&mut self, key: &str) {
        if let Some(Entry {
            value: Value::Sorted(set),
            ..
        }) = self.entries.get(key)
        {
            if set.is_empty() {
                self.entries.remove(key);
            }
        }
    }
}

fn text_value(entry: &Entry) -> Option<&str> {
    match &entry.value {
        Value::Text(s) => Some(s),
        Value::Sorted(_) => None,
    }
}

/// In-memory implementation of [`KvStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Keyspace> {
        self.keyspace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// True if no live keys exist
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let millis = ttl_millis(ttl)?;
        let mut keyspace = self.lock();
        if keyspace.live(key).is_some() {
            return Ok(false);
        }

        keyspace.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(deadline_after(Duration::from_millis(millis))),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut keyspace = self.lock();
        Ok(keyspace
            .text(key)?
            .and_then(|entry| text_value(entry).map(str::to_string)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let millis = ttl_millis(ttl)?;
        let mut keyspace = self.lock();
        match keyspace.live(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline_after(Duration::from_millis(millis)));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        let mut keyspace = self.lock();
        match keyspace.text(key)? {
            Some(entry) => {
                let current: i64 = text_value(entry)
                    .unwrap_or_default()
                    .parse()
                    .map_err(|_| {
                        StoreError::invalid_argument(format!("value at '{key}' is not an integer"))
                    })?;
                let next = current.checked_add(1).ok_or_else(|| {
                    StoreError::invalid_argument(format!("increment at '{key}' would overflow"))
                })?;
                entry.value = Value::Text(next.to_string());
                Ok(next)
            }
            None => {
                keyspace.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Text("1".to_string()),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut keyspace = self.lock();
        if keyspace.live(key).is_none() {
            return Ok(false);
        }
        Ok(keyspace.entries.remove(key).is_some())
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut keyspace = self.lock();
        let now = Instant::now();
        Ok(keyspace
            .live(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut keyspace = self.lock();
        let matches = keyspace
            .live(key)
            .and_then(|entry| text_value(entry))
            .is_some_and(|value| value == expected);
        if matches {
            keyspace.entries.remove(key);
        }
        Ok(matches)
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let millis = ttl_millis(ttl)?;
        let mut keyspace = self.lock();
        match keyspace.live(key) {
            Some(entry) if text_value(entry) == Some(expected) => {
                entry.expires_at = Some(deadline_after(Duration::from_millis(millis)));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn zadd(
        &self,
        set: &str,
        members: &[String],
        score: i64,
        overwrite: bool,
    ) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }

        let mut keyspace = self.lock();
        let sorted = keyspace.sorted_or_create(set)?;
        let added = members
            .iter()
            .filter(|member| sorted.insert(member, score, overwrite))
            .count();
        Ok(added as u64)
    }

    async fn zrange_by_score_and_remove(
        &self,
        set: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        let mut keyspace = self.lock();
        let Some(sorted) = keyspace.sorted(set)? else {
            return Ok(Vec::new());
        };

        let due: Vec<String> = sorted
            .range(i64::MIN, max_score)
            .take(limit)
            .map(|(_, member)| member.clone())
            .collect();
        for member in &due {
            sorted.remove(member);
        }

        keyspace.prune_empty(set);
        Ok(due)
    }

    async fn zcard(&self, set: &str) -> StoreResult<u64> {
        let mut keyspace = self.lock();
        Ok(keyspace
            .sorted(set)?
            .map_or(0, |sorted| sorted.scores.len() as u64))
    }

    async fn zcount(&self, set: &str, min: i64, max: i64) -> StoreResult<u64> {
        let mut keyspace = self.lock();
        Ok(keyspace
            .sorted(set)?
            .map_or(0, |sorted| sorted.range(min, max).count() as u64))
    }

    async fn zrange_by_score(
        &self,
        set: &str,
        min: i64,
        max: i64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>> {
        let mut keyspace = self.lock();
        Ok(keyspace.sorted(set)?.map_or_else(Vec::new, |sorted| {
            sorted
                .range(min, max)
                .skip(offset)
                .take(limit)
                .map(|(score, member)| (member.clone(), *score))
                .collect()
        }))
    }

    async fn zrem(&self, set: &str, members: &[String]) -> StoreResult<u64> {
        let mut keyspace = self.lock();
        let Some(sorted) = keyspace.sorted(set)? else {
            return Ok(0);
        };

        let removed = members.iter().filter(|m| sorted.remove(m)).count();
        keyspace.prune_empty(set);
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_if_absent_only_first_wins() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);

        assert!(store.set_if_absent("k", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", "b", ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_does_not_overflow() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "a", Duration::MAX).await.unwrap());
        assert!(store.expire("k", Duration::MAX).await.unwrap());
        assert!(store.compare_and_extend("k", "a", Duration::MAX).await.unwrap());

        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_range_bounds_are_inclusive() {
        let store = MemoryStore::new();
        for (member, score) in [("a", -5), ("b", 0), ("c", 7), ("d", 7), ("e", 12)] {
            store.zadd("z", &members(&[member]), score, true).await.unwrap();
        }

        let hits = store.zrange_by_score("z", 0, 7, 0, 10).await.unwrap();
        assert_eq!(
            hits,
            vec![("b".to_string(), 0), ("c".to_string(), 7), ("d".to_string(), 7)]
        );
        assert_eq!(store.zcount("z", i64::MIN, -5).await.unwrap(), 1);
        assert_eq!(store.zcount("z", 8, 11).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set_if_absent("k", "a", Duration::from_secs(2))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.set_if_absent("k", "b", Duration::from_secs(2)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_and_extend() {
        let store = MemoryStore::new();
        store
            .set_if_absent("k", "owner", Duration::from_secs(3))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store
            .compare_and_extend("k", "other", Duration::from_secs(3))
            .await
            .unwrap());
        assert!(store
            .compare_and_extend("k", "owner", Duration::from_secs(3))
            .await
            .unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("k").await.unwrap().is_some());
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let store = MemoryStore::new();
        store
            .set_if_absent("k", "owner", Duration::from_secs(3))
            .await
            .unwrap();

        assert!(!store.compare_and_delete("k", "other").await.unwrap());
        assert!(store.compare_and_delete("k", "owner").await.unwrap());
        assert!(!store.compare_and_delete("k", "owner").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_increment() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("n").await.unwrap(), 1);
        assert_eq!(store.increment("n").await.unwrap(), 2);

        store
            .set_if_absent("s", "text", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(store.increment("s").await.is_err());
    }

    #[tokio::test]
    async fn test_zadd_overwrite_rules() {
        let store = MemoryStore::new();
        assert_eq!(store.zadd("q", &members(&["a"]), 10, true).await.unwrap(), 1);
        assert_eq!(store.zadd("q", &members(&["a"]), 20, false).await.unwrap(), 0);
        assert_eq!(
            store.zrange_by_score("q", i64::MIN, i64::MAX, 0, 10).await.unwrap(),
            vec![("a".to_string(), 10)]
        );

        assert_eq!(store.zadd("q", &members(&["a"]), 30, true).await.unwrap(), 0);
        assert_eq!(
            store.zrange_by_score("q", i64::MIN, i64::MAX, 0, 10).await.unwrap(),
            vec![("a".to_string(), 30)]
        );
    }

    #[tokio::test]
    async fn test_range_and_remove_is_ordered_and_inclusive() {
        let store = MemoryStore::new();
        store.zadd("q", &members(&["late"]), 30, true).await.unwrap();
        store.zadd("q", &members(&["early"]), 10, true).await.unwrap();
        store.zadd("q", &members(&["edge"]), 20, true).await.unwrap();

        let due = store.zrange_by_score_and_remove("q", 20, 10).await.unwrap();
        assert_eq!(due, members(&["early", "edge"]));
        assert_eq!(store.zcard("q").await.unwrap(), 1);
        assert_eq!(store.zcount("q", 21, i64::MAX).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_range_and_remove_honours_limit() {
        let store = MemoryStore::new();
        store
            .zadd("q", &members(&["a", "b", "c"]), 5, true)
            .await
            .unwrap();

        let first = store.zrange_by_score_and_remove("q", 5, 2).await.unwrap();
        assert_eq!(first, members(&["a", "b"]));
        let rest = store.zrange_by_score_and_remove("q", 5, 2).await.unwrap();
        assert_eq!(rest, members(&["c"]));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.zadd("q", &members(&["a"]), 1, true).await.unwrap();
        assert!(matches!(
            store.get("q").await,
            Err(StoreError::WrongType(_))
        ));
    }
}
