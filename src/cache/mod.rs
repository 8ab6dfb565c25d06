//! Motorway response cache.
//!
//! Caches JSON responses of read-only catalog routes in the shared store:
//!
//! - **Keys**: `cache:{version}:{namespace}:{path}:{canonical-query}`
//! - **Values**: gzip-compressed response bodies with a per-route TTL
//! - **Refill**: stampede-safe through a `SET NX EX` lock per key, with
//!   stale-while-revalidate for entries close to expiry
//!
//! The structured entity cache in [`entity`] shares the store but none of
//! the response cache's keys or locks.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! key_version = "v2"
//! lock_ttl_secs = 10
//! wait_interval_ms = 100
//! # ... see config.rs for all options
//! ```

pub mod codec;
mod config;
pub mod entity;
pub mod keys;
mod lock;
mod middleware;
mod refresh;
mod stats;
mod store;

pub use config::CacheConfig;
pub use entity::{EntityCache, EntityFields};
pub use keys::{KeyScheme, build_key, lock_key};
pub use lock::{DistributedLock, LockLease};
pub use middleware::{
    BYPASS_HEADER, CACHE_STATUS_HEADER, CACHE_TTL_HEADER, CacheEngine, CachePolicy, CacheState,
    CacheStatus, response_cache_layer,
};
pub use refresh::{
    HttpRevalidator, RevalidateError, RevalidationRequest, Revalidator, spawn_revalidation,
};
pub use stats::{CacheHealth, CacheStats, StatsSnapshot};
pub use store::{Freshness, Lookup, ResponseStore, classify};
