use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;

use super::{KvStore, StoreBackend, StoreError, StoreStats, StoredValue, WriteBatch};

/// Store used when no shared store is configured or reachable.
///
/// Reads always miss and writes are dropped. `set_nx_ex` always succeeds,
/// so a refill never waits on a lock nobody can hold.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

impl NoopStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl KvStore for NoopStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Noop
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::unavailable("no shared store configured"))
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }

    async fn get_with_ttl(&self, _key: &str) -> Result<Option<StoredValue>, StoreError> {
        Ok(None)
    }

    async fn set_ex(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), StoreError> {
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        _key: &str,
        _value: &[u8],
        _ttl: Duration,
    ) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn del(&self, _keys: &[String]) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn del_if_value(&self, _key: &str, _value: &[u8]) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, StoreError> {
        Ok(None)
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn scan_match(
        &self,
        _pattern: &str,
        _limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }

    async fn hset_multiple(
        &self,
        _key: &str,
        _fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn hgetall(&self, _key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(HashMap::new())
    }

    async fn zadd(&self, _key: &str, _member: &str, _score: f64) -> Result<(), StoreError> {
        Ok(())
    }

    async fn zrange_all(&self, _key: &str) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        Ok(vec![None; keys.len()])
    }

    async fn execute_batch(&self, _batch: WriteBatch) -> Result<(), StoreError> {
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats::default())
    }

    async fn flush_db(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
