use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use super::{BatchOp, KvStore, StoreBackend, StoreError, StoreStats, StoredValue, WriteBatch};
use crate::util::sync::lock_mutex;

const SOURCE: &str = "store::memory";

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Hash(HashMap<String, String>),
    SortedSet(BTreeMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process store with Redis-like expiry semantics.
///
/// Expiry uses `tokio::time::Instant`, so tests running with a paused
/// clock can advance time deterministically. [`MemoryStore::set_available`]
/// simulates an outage: every call fails with [`StoreError::Unavailable`].
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("memory store is offline"))
        }
    }

    fn with_entries<R>(&self, op: &'static str, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        let mut guard = lock_mutex(&self.entries, SOURCE, op);
        let now = Instant::now();
        guard.retain(|_, entry| entry.is_live(now));
        f(&mut guard)
    }
}

fn deadline(ttl: Duration) -> Option<Instant> {
    Some(Instant::now() + ttl.max(Duration::from_secs(1)))
}

fn wrong_type(key: &str, expected: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        reason: format!("expected {expected}"),
    }
}

fn apply(entries: &mut HashMap<String, Entry>, op: BatchOp) -> Result<(), StoreError> {
    match op {
        BatchOp::SetEx { key, value, ttl } => {
            entries.insert(
                key,
                Entry {
                    value: Value::Bytes(value),
                    expires_at: deadline(ttl),
                },
            );
        }
        BatchOp::HSet { key, fields } => {
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            let Value::Hash(hash) = &mut entry.value else {
                return Err(wrong_type(&key, "hash"));
            };
            hash.extend(fields);
        }
        BatchOp::ZAdd { key, member, score } => {
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::SortedSet(BTreeMap::new()),
                expires_at: None,
            });
            let Value::SortedSet(set) = &mut entry.value else {
                return Err(wrong_type(&key, "sorted set"));
            };
            set.insert(member, score);
        }
        BatchOp::Expire { key, ttl } => {
            if let Some(entry) = entries.get_mut(&key) {
                entry.expires_at = deadline(ttl);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl KvStore for MemoryStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get_with_ttl(key).await?.map(|stored| stored.value))
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        self.check()?;
        self.with_entries("get_with_ttl", |entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Bytes(bytes),
                expires_at,
            }) => Ok(Some(StoredValue {
                value: bytes.clone(),
                ttl: expires_at.map(|at| at.saturating_duration_since(Instant::now())),
            })),
            Some(_) => Err(wrong_type(key, "string")),
        })
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.with_entries("set_ex", |entries| {
            apply(
                entries,
                BatchOp::SetEx {
                    key: key.to_string(),
                    value: value.to_vec(),
                    ttl,
                },
            )
        })
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.with_entries("set_nx_ex", |entries| {
            if entries.contains_key(key) {
                return Ok(false);
            }
            apply(
                entries,
                BatchOp::SetEx {
                    key: key.to_string(),
                    value: value.to_vec(),
                    ttl,
                },
            )?;
            Ok(true)
        })
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.with_entries("del", |entries| {
            keys.iter()
                .filter(|key| entries.remove(key.as_str()).is_some())
                .count() as u64
        }))
    }

    async fn del_if_value(&self, key: &str, value: &[u8]) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.with_entries("del_if_value", |entries| {
            let holds = matches!(
                entries.get(key),
                Some(Entry { value: Value::Bytes(current), .. }) if current.as_slice() == value
            );
            if holds {
                entries.remove(key);
            }
            holds
        }))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.check()?;
        Ok(self.with_entries("ttl", |entries| {
            entries
                .get(key)
                .and_then(|entry| entry.expires_at)
                .map(|at| at.saturating_duration_since(Instant::now()))
        }))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.with_entries("expire", |entries| match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = deadline(ttl);
                true
            }
            None => false,
        }))
    }

    async fn scan_match(
        &self,
        pattern: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self.with_entries("scan_match", |entries| {
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
                .cloned()
                .collect();
            keys.sort();
            if let Some(limit) = limit {
                keys.truncate(limit);
            }
            keys
        }))
    }

    async fn hset_multiple(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        self.check()?;
        self.with_entries("hset_multiple", |entries| {
            apply(
                entries,
                BatchOp::HSet {
                    key: key.to_string(),
                    fields: fields.to_vec(),
                },
            )
        })
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check()?;
        self.with_entries("hgetall", |entries| match entries.get(key) {
            None => Ok(HashMap::new()),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key, "hash")),
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.check()?;
        self.with_entries("zadd", |entries| {
            apply(
                entries,
                BatchOp::ZAdd {
                    key: key.to_string(),
                    member: member.to_string(),
                    score,
                },
            )
        })
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.with_entries("zrange_all", |entries| match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::SortedSet(set),
                ..
            }) => {
                let mut members: Vec<(&String, f64)> =
                    set.iter().map(|(member, score)| (member, *score)).collect();
                members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
                Ok(members.into_iter().map(|(member, _)| member.clone()).collect())
            }
            Some(_) => Err(wrong_type(key, "sorted set")),
        })
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.check()?;
        Ok(self.with_entries("mget", |entries| {
            keys.iter()
                .map(|key| match entries.get(key.as_str()) {
                    Some(Entry {
                        value: Value::Bytes(bytes),
                        ..
                    }) => Some(bytes.clone()),
                    _ => None,
                })
                .collect()
        }))
    }

    async fn execute_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.check()?;
        self.with_entries("execute_batch", |entries| {
            for op in batch.into_ops() {
                apply(entries, op)?;
            }
            Ok(())
        })
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.check()?;
        Ok(self.with_entries("stats", |entries| StoreStats {
            keys: entries.len() as u64,
            used_memory: None,
        }))
    }

    async fn flush_db(&self) -> Result<(), StoreError> {
        self.check()?;
        self.with_entries("flush_db", |entries| entries.clear());
        Ok(())
    }
}

/// Redis-style glob: `*`, `?` and `\` escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some(b'?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some(b'\\') if pattern.get(p + 1) == Some(&text[t]) => {
                p += 2;
                t += 1;
                continue;
            }
            Some(&c) if c != b'\\' && c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star, matched)) => {
                p = star + 1;
                t = matched + 1;
                backtrack = Some((star, matched + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_like_redis() {
        assert!(glob_match(b"search:*", b"search:term:cr"));
        assert!(glob_match(b"cache:*cars*", b"cache:v2:cars:/api/cars:"));
        assert!(glob_match(b"lock:?", b"lock:a"));
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
        assert!(!glob_match(b"search:*", b"cache:search:x"));
        assert!(glob_match(b"*", b""));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set_ex("k", b"v", Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_nx_refuses_existing_key() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);
        assert!(store.set_nx_ex("lock:k", b"a", ttl).await.unwrap());
        assert!(!store.set_nx_ex("lock:k", b"b", ttl).await.unwrap());
        assert_eq!(store.get("lock:k").await.unwrap().as_deref(), Some(&b"a"[..]));
    }

    #[tokio::test]
    async fn conditional_delete_checks_value() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);
        store.set_ex("lock:k", b"a", ttl).await.unwrap();

        assert!(!store.del_if_value("lock:k", b"b").await.unwrap());
        assert!(store.get("lock:k").await.unwrap().is_some());
        assert!(store.del_if_value("lock:k", b"a").await.unwrap());
        assert!(store.get("lock:k").await.unwrap().is_none());
        assert!(!store.del_if_value("lock:k", b"a").await.unwrap());
    }

    #[tokio::test]
    async fn sorted_set_orders_by_score_then_member() {
        let store = MemoryStore::new();
        store.zadd("z", "b", 0.0).await.unwrap();
        store.zadd("z", "a", 0.0).await.unwrap();
        store.zadd("z", "c", -1.0).await.unwrap();
        store.zadd("z", "a", 0.0).await.unwrap();

        assert_eq!(store.zrange_all("z").await.unwrap(), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn wrong_type_is_reported() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 0.0).await.unwrap();
        assert!(matches!(
            store.get("z").await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.ping().await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn mget_preserves_positions() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);
        store.set_ex("a", b"1", ttl).await.unwrap();
        store.set_ex("c", b"3", ttl).await.unwrap();

        let values = store
            .mget(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some(b"1".to_vec()), None, Some(b"3".to_vec())]);
    }
}
