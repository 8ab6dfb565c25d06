//! Response entries in the shared store.
//!
//! Values are gzip-compressed JSON bodies written with `SETEX`. Reads return
//! the body together with its remaining TTL, classified against the caller's
//! stale window.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use serde::de::IgnoredAny;
use tracing::{debug, warn};

use crate::store::{self, KvStore, StoreBackend, StoreError, StoreStats};

use super::{
    codec,
    keys::{KeyScheme, pattern_for},
};

const DELETE_CHUNK: usize = 500;

/// How fresh a stored entry is relative to the stale window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

/// Classify a remaining TTL. A key without expiry is always fresh.
pub fn classify(remaining: Option<Duration>, stale: Duration) -> Freshness {
    match remaining {
        None => Freshness::Fresh,
        Some(ttl) if ttl.is_zero() => Freshness::Expired,
        Some(ttl) if ttl < stale => Freshness::Stale,
        Some(_) => Freshness::Fresh,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Fresh { body: Bytes, ttl: Option<Duration> },
    Stale { body: Bytes, ttl: Duration },
    Miss,
}

pub struct ResponseStore {
    store: Arc<dyn KvStore>,
    keys: KeyScheme,
}

impl ResponseStore {
    pub fn new(store: Arc<dyn KvStore>, keys: KeyScheme) -> Self {
        Self { store, keys }
    }

    pub fn keys(&self) -> &KeyScheme {
        &self.keys
    }

    pub fn backend(&self) -> StoreBackend {
        self.store.backend()
    }

    /// Read `key`. Entries that fail to decode count as misses.
    pub async fn lookup(&self, key: &str, stale: Duration) -> Result<Lookup, StoreError> {
        let Some(stored) = self.store.get_with_ttl(key).await? else {
            return Ok(Lookup::Miss);
        };

        let freshness = classify(stored.ttl, stale);
        if freshness == Freshness::Expired {
            return Ok(Lookup::Miss);
        }

        let Some(body) = decode_body(key, &stored.value) else {
            return Ok(Lookup::Miss);
        };

        Ok(match (freshness, stored.ttl) {
            (Freshness::Stale, Some(ttl)) => Lookup::Stale { body, ttl },
            (_, ttl) => Lookup::Fresh { body, ttl },
        })
    }

    /// Compress and store `body` for `ttl`.
    pub async fn put(&self, key: &str, body: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let packed = match codec::compress(body) {
            Ok(packed) => packed,
            Err(err) => {
                warn!(key, error = %err, "skipping cache write, compression failed");
                return Ok(());
            }
        };
        debug!(key, raw = body.len(), packed = packed.len(), "storing response");
        self.store.set_ex(key, &packed, ttl).await
    }

    /// Drop every key in the store, not only response entries.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.store.flush_db().await
    }

    /// Delete response entries whose key contains `fragment`.
    pub async fn invalidate(&self, fragment: &str) -> Result<u64, StoreError> {
        let pattern = pattern_for(self.keys.version(), fragment);
        store::delete_matching(self.store.as_ref(), &pattern, DELETE_CHUNK).await
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    pub async fn store_stats(&self) -> Result<StoreStats, StoreError> {
        self.store.stats().await
    }
}

fn decode_body(key: &str, stored: &[u8]) -> Option<Bytes> {
    let body = match codec::decompress(stored) {
        Ok(body) => body,
        Err(err) => {
            debug!(key, error = %err, "corrupt cache entry treated as miss");
            return None;
        }
    };

    if let Err(err) = serde_json::from_slice::<IgnoredAny>(&body) {
        debug!(key, error = %err, "cached body is not JSON, treated as miss");
        return None;
    }

    Some(Bytes::from(body))
}
