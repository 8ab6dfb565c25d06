//! Refill lock held in the shared store.
//!
//! A lock is a `SET NX EX` on `lock:{cache-key}` whose value is a token
//! minted per acquisition. It expires on its own, so a holder that crashes
//! blocks refills for at most one lock TTL. Release deletes the key only
//! while it still carries the holder's token; a holder that outlived its
//! TTL can never remove a lock someone else acquired since.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{KvStore, StoreError};

use super::keys::lock_key;

/// Proof of holding the refill lock for one cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    cache_key: String,
    token: String,
}

impl LockLease {
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Try to become the holder for `cache_key`. Never waits.
    pub async fn try_acquire(
        &self,
        cache_key: &str,
        ttl: Duration,
    ) -> Result<Option<LockLease>, StoreError> {
        let token = Uuid::new_v4().to_string();
        let acquired = self
            .store
            .set_nx_ex(&lock_key(cache_key), token.as_bytes(), ttl)
            .await?;
        debug!(key = cache_key, acquired, "lock attempt");

        Ok(acquired.then(|| LockLease {
            cache_key: cache_key.to_string(),
            token,
        }))
    }

    /// Best-effort release; a no-op once the lock expired or changed hands.
    pub async fn release(&self, lease: &LockLease) {
        match self
            .store
            .del_if_value(&lock_key(&lease.cache_key), lease.token.as_bytes())
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(
                key = %lease.cache_key,
                "refill lock already expired or taken over"
            ),
            Err(err) => warn!(
                key = %lease.cache_key,
                error = %err,
                "failed to release refill lock"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const KEY: &str = "cache:v2:cars:/api/cars:";

    #[tokio::test]
    async fn concurrent_acquire_has_one_winner() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let first = DistributedLock::new(store.clone());
        let second = DistributedLock::new(store);
        let ttl = Duration::from_secs(10);

        let (a, b) = tokio::join!(first.try_acquire(KEY, ttl), second.try_acquire(KEY, ttl));
        let winners = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|lease| lease.is_some())
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_expires_without_release() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let crashed = DistributedLock::new(store.clone());
        let next = DistributedLock::new(store);
        let ttl = Duration::from_secs(10);

        assert!(crashed.try_acquire(KEY, ttl).await.unwrap().is_some());
        assert!(next.try_acquire(KEY, ttl).await.unwrap().is_none());

        tokio::time::advance(ttl + Duration::from_millis(1)).await;
        assert!(next.try_acquire(KEY, ttl).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn late_release_keeps_the_next_holders_lock() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let lock = DistributedLock::new(store);
        let ttl = Duration::from_secs(10);

        let slow = lock.try_acquire(KEY, ttl).await.unwrap().expect("free lock");
        tokio::time::advance(ttl + Duration::from_secs(1)).await;
        let current = lock.try_acquire(KEY, ttl).await.unwrap().expect("expired lock");

        lock.release(&slow).await;
        assert!(lock.try_acquire(KEY, ttl).await.unwrap().is_none());

        lock.release(&current).await;
        assert!(lock.try_acquire(KEY, ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let lock = DistributedLock::new(store);
        let ttl = Duration::from_secs(10);

        let lease = lock.try_acquire(KEY, ttl).await.unwrap().expect("free lock");
        assert_eq!(lease.cache_key(), KEY);
        lock.release(&lease).await;
        lock.release(&lease).await;
        assert!(lock.try_acquire(KEY, ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn release_swallows_store_errors() {
        let memory = Arc::new(MemoryStore::new());
        let lock = DistributedLock::new(memory.clone());
        let lease = lock
            .try_acquire(KEY, Duration::from_secs(1))
            .await
            .unwrap()
            .expect("free lock");
        memory.set_available(false);

        lock.release(&lease).await;
        assert!(lock.try_acquire(KEY, Duration::from_secs(1)).await.is_err());
    }
}
