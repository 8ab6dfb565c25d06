//! Shared key-value store capability.
//!
//! Everything the cache and the search index need from the distributed
//! store goes through [`KvStore`]. Three implementations exist:
//!
//! - [`RedisStore`]: the production backend over a `deadpool-redis` pool
//! - [`NoopStore`]: selected when the store is disabled or unreachable at
//!   startup; reads are empty, locks are always granted, writes vanish
//! - [`MemoryStore`]: in-process TTL map for tests and single-node runs
//!
//! The backend is chosen once in [`connect`], so call sites never branch
//! on whether a store exists.

mod memory;
mod noop;
mod redis_store;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::StoreSettings;

pub use memory::MemoryStore;
pub use noop::NoopStore;
pub use redis_store::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("redis command failed: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("unexpected value at `{key}`: {reason}")]
    WrongType { key: String, reason: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
    Noop,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreBackend::Redis => "redis",
            StoreBackend::Memory => "memory",
            StoreBackend::Noop => "noop",
        }
    }
}

/// A value read together with its remaining time to live.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub value: Vec<u8>,
    /// `None` when the key has no expiry.
    pub ttl: Option<Duration>,
}

/// Coarse store statistics for the operational endpoints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub keys: u64,
    pub used_memory: Option<String>,
}

/// One write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    SetEx {
        key: String,
        value: Vec<u8>,
        ttl: Duration,
    },
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

/// Writes sent to the store in a single round trip (a pipeline on Redis).
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ex(&mut self, key: impl Into<String>, value: Vec<u8>, ttl: Duration) -> &mut Self {
        self.ops.push(BatchOp::SetEx {
            key: key.into(),
            value,
            ttl,
        });
        self
    }

    pub fn hset(&mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> &mut Self {
        self.ops.push(BatchOp::HSet {
            key: key.into(),
            fields,
        });
        self
    }

    pub fn zadd(
        &mut self,
        key: impl Into<String>,
        member: impl Into<String>,
        score: f64,
    ) -> &mut Self {
        self.ops.push(BatchOp::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.ops.push(BatchOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Protocol consumed from the distributed store.
///
/// Key enumeration is always incremental (`SCAN`); no implementation may
/// issue a blocking full-keyspace listing.
#[async_trait]
pub trait KvStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn get_with_ttl(&self, key: &str) -> Result<Option<StoredValue>, StoreError>;

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Atomic set-if-absent with expiry. Returns whether the value was written.
    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration)
    -> Result<bool, StoreError>;

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Atomically delete `key` only while it still holds `value`. Returns
    /// whether the key was deleted.
    async fn del_if_value(&self, key: &str, value: &[u8]) -> Result<bool, StoreError>;

    /// Remaining time to live; `Ok(None)` when the key is missing or persistent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Incrementally enumerate keys matching a glob, stopping after `limit` keys.
    async fn scan_match(
        &self,
        pattern: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError>;

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)])
    -> Result<(), StoreError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// All members of a sorted set in rank order.
    async fn zrange_all(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;

    async fn execute_batch(&self, batch: WriteBatch) -> Result<(), StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;

    async fn flush_db(&self) -> Result<(), StoreError>;
}

/// Delete every key matching `pattern`, in chunks of `chunk` keys.
pub async fn delete_matching(
    store: &dyn KvStore,
    pattern: &str,
    chunk: usize,
) -> Result<u64, StoreError> {
    let keys = store.scan_match(pattern, None).await?;
    let mut removed = 0;
    for group in keys.chunks(chunk.max(1)) {
        removed += store.del(group).await?;
    }
    Ok(removed)
}

pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Select the store backend for this process.
///
/// A disabled or unreachable store degrades to [`NoopStore`]; the process
/// still starts and serves every request uncached.
pub async fn connect(settings: &StoreSettings) -> Arc<dyn KvStore> {
    let Some(url) = settings.url.as_deref().filter(|_| settings.enabled) else {
        info!(
            target = "motorway::store",
            backend = "noop",
            "shared store disabled, caching and distributed search are pass-through"
        );
        return Arc::new(NoopStore::new());
    };

    match RedisStore::connect(url, settings.pool_size.get() as usize, settings.timeout).await {
        Ok(store) => {
            info!(target = "motorway::store", backend = "redis", "connected to shared store");
            Arc::new(store)
        }
        Err(err) => {
            warn!(
                target = "motorway::store",
                backend = "noop",
                error = %err,
                "shared store unreachable, falling back to pass-through"
            );
            Arc::new(NoopStore::new())
        }
    }
}
